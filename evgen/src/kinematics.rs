//! Incoming-state definition and the kinematic cut tables applied to the
//! outgoing phase space.

use super::error::{Error, Result};
use super::limits::Limits;
use super::momentum::Momentum;
use super::params::{ParameterBag, Value};
use super::pdg::{self, PdgId};
use super::registry::Buildable;
use super::schema::ParametersDescription;
use rustc_hash::FxHashMap;

/// Dissociation pattern of the two outgoing beams.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Mode {
    /// Both beams survive intact.
    #[default]
    ElasticElastic,
    /// Second beam dissociates.
    ElasticInelastic,
    /// First beam dissociates.
    InelasticElastic,
    /// Both beams dissociate.
    InelasticInelastic,
}

impl Mode {
    fn from_str(mode: &str) -> Result<Self> {
        match mode {
            "elastic/elastic" => Ok(Self::ElasticElastic),
            "elastic/inelastic" => Ok(Self::ElasticInelastic),
            "inelastic/elastic" => Ok(Self::InelasticElastic),
            "inelastic/inelastic" => Ok(Self::InelasticInelastic),
            other => Err(Error::config("mode", format!("unknown beams mode \"{other}\""))),
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::ElasticElastic => "elastic/elastic",
            Self::ElasticInelastic => "elastic/inelastic",
            Self::InelasticElastic => "inelastic/elastic",
            Self::InelasticInelastic => "inelastic/inelastic",
        }
    }
}

/// One incoming beam.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Beam {
    /// Species of the beam particle.
    pub pdg_id: PdgId,
    /// Longitudinal momentum, in GeV (signed).
    pub pz: f64,
}

impl Beam {
    /// On-shell four-momentum of the beam particle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] for an unknown species.
    pub fn momentum(&self) -> Result<Momentum> {
        let mass = pdg::mass(self.pdg_id)?;
        let mut mom = Momentum::new(0.0, 0.0, self.pz, 0.0);
        mom.set_mass(mass);
        Ok(mom)
    }
}

/// Cut set applied to single particles of the central system.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CentralCuts {
    /// Transverse-momentum window.
    pub pt_single: Limits,
    /// Pseudorapidity window.
    pub eta_single: Limits,
    /// Rapidity window.
    pub rapidity_single: Limits,
    /// Energy window.
    pub energy_single: Limits,
    /// Invariant-mass window of the whole central system.
    pub mass_sum: Limits,
}

/// Cut set applied to outgoing beam remnants.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RemnantCuts {
    /// Remnant-mass window.
    pub mass_single: Limits,
    /// Absolute-rapidity window.
    pub rapidity_single: Limits,
    /// Energy window.
    pub energy_single: Limits,
}

/// All configured cuts.
#[derive(Clone, Debug, Default)]
pub struct Cuts {
    /// Cuts on any central-system particle.
    pub central: CentralCuts,
    /// Per-species overrides for central-system particles.
    pub central_particles: FxHashMap<i64, CentralCuts>,
    /// Cuts on the outgoing beam remnants.
    pub remnants: RemnantCuts,
}

impl Cuts {
    /// Is any central or remnant cut active?
    #[must_use]
    pub fn any(&self) -> bool {
        let active = |c: &CentralCuts| {
            c.pt_single.has_min()
                || c.pt_single.has_max()
                || c.eta_single.has_min()
                || c.eta_single.has_max()
                || c.rapidity_single.has_min()
                || c.rapidity_single.has_max()
                || c.energy_single.has_min()
                || c.energy_single.has_max()
                || c.mass_sum.has_min()
                || c.mass_sum.has_max()
        };
        active(&self.central)
            || !self.central_particles.is_empty()
            || self.remnants.mass_single.has_min()
            || self.remnants.mass_single.has_max()
            || self.remnants.rapidity_single.has_min()
            || self.remnants.rapidity_single.has_max()
            || self.remnants.energy_single.has_min()
            || self.remnants.energy_single.has_max()
    }
}

/// The full incoming-state and cuts description of a run.
#[derive(Clone, Debug, Default)]
pub struct Kinematics {
    /// First incoming beam.
    pub beam1: Beam,
    /// Second incoming beam.
    pub beam2: Beam,
    /// Beam dissociation pattern.
    pub mode: Mode,
    /// Cut tables.
    pub cuts: Cuts,
}

impl Default for Beam {
    fn default() -> Self {
        Self {
            pdg_id: pdg::ids::PROTON,
            pz: 6800.0,
        }
    }
}

impl Kinematics {
    /// Squared centre-of-mass energy of the two-beam system, in GeV².
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] for an unknown beam species.
    pub fn s(&self) -> Result<f64> {
        let total = self.beam1.momentum()? + self.beam2.momentum()?;
        Ok(total.mass2())
    }

    /// Centre-of-mass energy, in GeV.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] for an unknown beam species or an empty
    /// phase space.
    pub fn sqrt_s(&self) -> Result<f64> {
        let s = self.s()?;
        if s <= 0.0 {
            return Err(Error::Kinematics(format!(
                "squared centre-of-mass energy is not positive: {s}"
            )));
        }
        Ok(s.sqrt())
    }
}

fn limits_from(bag: &ParameterBag, key: &str) -> Result<Limits> {
    if !bag.contains(key) {
        return Ok(Limits::none());
    }
    let bounds: Vec<f64> = bag.get(key)?;
    match bounds.as_slice() {
        [] => Ok(Limits::none()),
        [lo] => Ok(Limits::at_least(*lo)),
        [lo, hi] => Limits::new(*lo, *hi),
        _ => Err(Error::config(
            key,
            format!("expected at most two bounds, found {}", bounds.len()),
        )),
    }
}

fn central_cuts_from(bag: &ParameterBag) -> Result<CentralCuts> {
    Ok(CentralCuts {
        pt_single: limits_from(bag, "pt")?,
        eta_single: limits_from(bag, "eta")?,
        rapidity_single: limits_from(bag, "rapidity")?,
        energy_single: limits_from(bag, "energy")?,
        mass_sum: limits_from(bag, "mass")?,
    })
}

fn beam_schema(pz: f64) -> ParametersDescription {
    let mut desc = ParametersDescription::new("incoming beam");
    desc.add("pdgid", i64::try_from(pdg::ids::PROTON).unwrap(), "beam particle species")
        .add("pz", pz, "longitudinal beam momentum, in GeV");
    desc
}

impl Buildable for Kinematics {
    fn description() -> ParametersDescription {
        let mut desc = ParametersDescription::new("incoming state and phase space cuts");
        desc.add_parameters("beam1", beam_schema(6800.0), "first incoming beam")
            .add_parameters("beam2", beam_schema(-6800.0), "second incoming beam")
            .add("mode", "elastic/elastic", "beams dissociation pattern")
            .restrict(
                "mode",
                [
                    Mode::ElasticElastic,
                    Mode::ElasticInelastic,
                    Mode::InelasticElastic,
                    Mode::InelasticInelastic,
                ]
                .map(|mode| Value::Str(mode.as_str().to_owned()))
                .to_vec(),
            )
            .add_parameters(
                "central",
                ParametersDescription::new("cuts on any central particle"),
                "cuts on any central particle ([lo, hi] windows)",
            )
            .add(
                "centralParticles",
                Vec::<ParameterBag>::new(),
                "per-species central cut overrides (each carrying a pdgid key)",
            )
            .add_parameters(
                "remnants",
                ParametersDescription::new("cuts on outgoing beam remnants"),
                "cuts on outgoing beam remnants",
            );
        desc
    }

    fn from_bag(params: &ParameterBag) -> Result<Self> {
        let beam = |key: &str, fallback: Beam| -> Result<Beam> {
            if !params.contains(key) {
                return Ok(fallback);
            }
            let bag: ParameterBag = params.get(key)?;
            Ok(Beam {
                pdg_id: bag
                    .get_or("pdgid", i64::try_from(fallback.pdg_id).unwrap())?
                    .unsigned_abs(),
                pz: bag.get_or("pz", fallback.pz)?,
            })
        };
        let beam1 = beam("beam1", Beam::default())?;
        let beam2 = beam(
            "beam2",
            Beam {
                pz: -Beam::default().pz,
                ..Beam::default()
            },
        )?;
        let mode = Mode::from_str(&params.get_or("mode", "elastic/elastic".to_owned())?)?;

        let mut cuts = Cuts::default();
        if params.contains("central") {
            cuts.central = central_cuts_from(&params.get("central")?)?;
        }
        for bag in params.get_or("centralParticles", Vec::<ParameterBag>::new())? {
            let pdg_id: i64 = bag.get("pdgid")?;
            cuts.central_particles
                .insert(pdg_id, central_cuts_from(&bag)?);
        }
        if params.contains("remnants") {
            let bag: ParameterBag = params.get("remnants")?;
            cuts.remnants = RemnantCuts {
                mass_single: limits_from(&bag, "mass")?,
                rapidity_single: limits_from(&bag, "rapidity")?,
                energy_single: limits_from(&bag, "energy")?,
            };
        }
        Ok(Self {
            beam1,
            beam2,
            mode,
            cuts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn symmetric_beams_sqrt_s() {
        let kin = Kinematics::default();
        // 2 * 6800 GeV protons
        assert_approx_eq!(f64, kin.sqrt_s().unwrap(), 13_600.0, epsilon = 1e-3);
    }

    #[test]
    fn tree_is_parsed() {
        let params = ParameterBag::new()
            .with(
                "beam1",
                ParameterBag::new().with("pdgid", 2212_i64).with("pz", 7000.0),
            )
            .with("mode", "elastic/inelastic")
            .with(
                "central",
                ParameterBag::new().with("pt", vec![10.0]).with("eta", vec![-2.5, 2.5]),
            );
        let kin = Kinematics::from_bag(&params).unwrap();
        assert_approx_eq!(f64, kin.beam1.pz, 7000.0, ulps = 2);
        assert_eq!(kin.mode, Mode::ElasticInelastic);
        assert!(kin.cuts.any());
        assert!(kin.cuts.central.pt_single.contains(11.0));
        assert!(!kin.cuts.central.pt_single.contains(9.0));
        assert!(!kin.cuts.central.eta_single.contains(3.0));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let params = ParameterBag::new().with("mode", "sideways");
        assert!(Kinematics::from_bag(&params).is_err());
    }
}
