#![allow(missing_docs)]

//! Cross-section scans against kinematic cuts.

use evgen::kinematics::Kinematics;
use evgen::limits::Limits;
use evgen::params::ParameterBag;
use evgen::processes;
use evgen::run::{RunParameters, Runner};

fn cross_section_with_pt_cut(pt_cut: f64) -> (f64, f64) {
    let process = processes::factory()
        .read()
        .unwrap()
        .build("twobody", &ParameterBag::new())
        .unwrap();
    let mut params = RunParameters::new(process);
    params.kinematics = Kinematics::default();
    params.kinematics.cuts.central.pt_single = Limits::at_least(pt_cut);
    // identical seeds give identical sampling sequences, so tighter cuts act
    // on the very same points
    params.integrator = ParameterBag::new()
        .with("mod_name", "plain")
        .with("ncvg", 20_000_i64)
        .with("seed", 424_242_i64);
    let mut runner = Runner::new(params).unwrap();
    runner.cross_section().unwrap()
}

// raising a single-particle transverse momentum cut can only remove phase
// space: the cross section is monotone non-increasing along the scan
#[test]
fn cross_section_is_monotone_in_the_pt_cut() {
    let mut previous = f64::INFINITY;
    for step in 1..=10 {
        let pt_cut = 5.0 * f64::from(step);
        let (value, _) = cross_section_with_pt_cut(pt_cut);
        assert!(value > 0.0, "vanishing cross section at pt > {pt_cut}");
        assert!(
            value <= previous,
            "cross section grew from {previous} to {value} at pt > {pt_cut}"
        );
        previous = value;
    }
}

#[test]
fn a_deep_cut_bites_visibly() {
    let (loose, _) = cross_section_with_pt_cut(5.0);
    let (tight, _) = cross_section_with_pt_cut(6_000.0);
    assert!(tight < 0.9 * loose, "loose {loose} vs tight {tight}");
}

#[test]
fn an_impossible_cut_empties_the_phase_space() {
    // beyond the kinematic limit p* = sqrt(s)/2 nothing survives
    let (value, error) = cross_section_with_pt_cut(8_000.0);
    assert_eq!(value, 0.0);
    assert_eq!(error, 0.0);
}
