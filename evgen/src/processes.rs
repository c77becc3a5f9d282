//! Built-in processes: a unit-weight integrand, a closure-driven functional
//! process, and a flat-matrix-element two-body central production used by
//! the cut and generation machinery.

use super::constants::GEV2_TO_PB;
use super::error::{Error, Result};
use super::event::{self, Event, Role, Status};
use super::kinematics::Kinematics;
use super::limits::Limits;
use super::momentum::Momentum;
use super::params::ParameterBag;
use super::pdg;
use super::process::{Mapping, PhaseSpace, Process};
use super::registry::Buildable;
use super::schema::ParametersDescription;
use super::registry::ModuleFactory;
use std::f64::consts::PI;
use std::sync::{Arc, OnceLock, RwLock};

/// Shared factory for all physics processes, with the built-in modules
/// registered on first access.
///
/// # Panics
///
/// Panics if a built-in module name clashes, which cannot happen short of a
/// coding error.
pub fn factory() -> &'static RwLock<ModuleFactory<dyn Process>> {
    static FACTORY: OnceLock<RwLock<ModuleFactory<dyn Process>>> = OnceLock::new();
    FACTORY.get_or_init(|| {
        let mut factory = ModuleFactory::new("process factory");
        crate::register_module!(factory, dyn Process, "unit", UnitProcess).unwrap();
        crate::register_module!(factory, dyn Process, "twobody", TwoBodyProcess).unwrap();
        RwLock::new(factory)
    })
}

/// Weight ≡ 1 over the whole hypercube; integrates to exactly one whatever
/// the dimension.
#[derive(Clone)]
pub struct UnitProcess {
    params: ParameterBag,
    ndim: usize,
    phase_space: PhaseSpace,
}

impl Buildable for UnitProcess {
    fn description() -> ParametersDescription {
        let mut desc = ParametersDescription::new("unit-weight process");
        desc.add("ndim", 3_i64, "number of integration dimensions");
        desc
    }

    fn from_bag(params: &ParameterBag) -> Result<Self> {
        Ok(Self {
            params: params.clone(),
            ndim: params.get("ndim")?,
            phase_space: PhaseSpace::new(),
        })
    }
}

impl Process for UnitProcess {
    fn name(&self) -> &str {
        "unit"
    }

    fn parameters(&self) -> &ParameterBag {
        &self.params
    }

    fn phase_space(&self) -> &PhaseSpace {
        &self.phase_space
    }

    fn phase_space_mut(&mut self) -> &mut PhaseSpace {
        &mut self.phase_space
    }

    fn prepare_kinematics(&mut self, _kinematics: &Kinematics) -> Result<()> {
        self.phase_space = PhaseSpace::new();
        for i in 0..self.ndim {
            self.phase_space.define(
                Mapping::Linear,
                Limits::new(0.0, 1.0)?,
                Limits::new(0.0, 1.0)?,
                &format!("x{i}"),
            )?;
        }
        Ok(())
    }

    fn compute_weight(&mut self) -> Result<f64> {
        Ok(1.0)
    }

    fn fill_kinematics(&mut self, _symmetrise: bool) -> Result<()> {
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Process> {
        Box::new(self.clone())
    }
}

/// A process evaluating an arbitrary function of the mapped variables over
/// [0, 1]^N; the workhorse of the integrator test suite.
#[derive(Clone)]
pub struct FunctionalProcess {
    params: ParameterBag,
    ndim: usize,
    phase_space: PhaseSpace,
    function: Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>,
}

impl FunctionalProcess {
    /// Wraps an `ndim`-dimensional function into a process.
    #[must_use]
    pub fn new(
        name: &str,
        ndim: usize,
        function: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Self {
        let mut params = ParameterBag::new();
        params.set_name(name);
        Self {
            params,
            ndim,
            phase_space: PhaseSpace::new(),
            function: Arc::new(function),
        }
    }
}

impl Process for FunctionalProcess {
    fn name(&self) -> &str {
        "functional"
    }

    fn parameters(&self) -> &ParameterBag {
        &self.params
    }

    fn phase_space(&self) -> &PhaseSpace {
        &self.phase_space
    }

    fn phase_space_mut(&mut self) -> &mut PhaseSpace {
        &mut self.phase_space
    }

    fn prepare_kinematics(&mut self, _kinematics: &Kinematics) -> Result<()> {
        self.phase_space = PhaseSpace::new();
        for i in 0..self.ndim {
            self.phase_space.define(
                Mapping::Linear,
                Limits::new(0.0, 1.0)?,
                Limits::new(0.0, 1.0)?,
                &format!("x{i}"),
            )?;
        }
        Ok(())
    }

    fn compute_weight(&mut self) -> Result<f64> {
        let point: Vec<f64> = (0..self.ndim).map(|i| self.phase_space.value(i)).collect();
        Ok((self.function)(&point))
    }

    fn fill_kinematics(&mut self, _symmetrise: bool) -> Result<()> {
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Process> {
        Box::new(self.clone())
    }
}

/// Flat-matrix-element production of an opposite-charge fermion pair in the
/// collision of two elastic beams, mapped over (cos θ*, φ) in the
/// centre-of-mass frame.
#[derive(Clone)]
pub struct TwoBodyProcess {
    params: ParameterBag,
    pair: pdg::PdgId,
    phase_space: PhaseSpace,
    event: Event,
    // run-level cache, filled by prepare_kinematics
    sqs: f64,
    pair_mass: f64,
    cos_theta: usize,
    phi: usize,
    fills: u64,
}

impl TwoBodyProcess {
    fn pstar(&self) -> f64 {
        let half_s = 0.5 * self.sqs;
        (half_s * half_s - self.pair_mass * self.pair_mass).max(0.0).sqrt()
    }

    fn pair_momenta(&self) -> (Momentum, Momentum) {
        let pstar = self.pstar();
        let cos_theta = self.phase_space.value(self.cos_theta);
        let sin_theta = cos_theta.mul_add(-cos_theta, 1.0).max(0.0).sqrt();
        let phi = self.phase_space.value(self.phi);
        let energy = 0.5 * self.sqs;
        let plus = Momentum::new(
            pstar * sin_theta * phi.cos(),
            pstar * sin_theta * phi.sin(),
            pstar * cos_theta,
            energy,
        );
        let minus = Momentum::new(-plus.px(), -plus.py(), -plus.pz(), energy);
        (plus, minus)
    }
}

impl Buildable for TwoBodyProcess {
    fn description() -> ParametersDescription {
        let mut desc = ParametersDescription::new(
            "flat-matrix-element two-body central production",
        );
        desc.add("pair", 13_i64, "species of the produced pair");
        desc
    }

    fn from_bag(params: &ParameterBag) -> Result<Self> {
        Ok(Self {
            params: params.clone(),
            pair: params.get::<i64>("pair")?.unsigned_abs(),
            phase_space: PhaseSpace::new(),
            event: Event::new(),
            sqs: 0.0,
            pair_mass: 0.0,
            cos_theta: 0,
            phi: 0,
            fills: 0,
        })
    }
}

impl Process for TwoBodyProcess {
    fn name(&self) -> &str {
        "twobody"
    }

    fn parameters(&self) -> &ParameterBag {
        &self.params
    }

    fn phase_space(&self) -> &PhaseSpace {
        &self.phase_space
    }

    fn phase_space_mut(&mut self) -> &mut PhaseSpace {
        &mut self.phase_space
    }

    fn event(&self) -> Option<&Event> {
        Some(&self.event)
    }

    fn event_mut(&mut self) -> Option<&mut Event> {
        Some(&mut self.event)
    }

    fn add_event_content(&mut self) -> Result<()> {
        let pair = i64::try_from(self.pair).unwrap_or_default();
        self.event = Event::new();
        event::build_content(
            &mut self.event,
            &[
                (Role::IncomingBeam1, 2212),
                (Role::IncomingBeam2, 2212),
                (Role::Parton1, 22),
                (Role::Parton2, 22),
                (Role::Intermediate, 22),
            ],
            &[
                (Role::OutgoingBeam1, vec![2212]),
                (Role::OutgoingBeam2, vec![2212]),
                (Role::CentralSystem, vec![pair, -pair]),
            ],
        )?;
        self.event.freeze();
        Ok(())
    }

    fn prepare_kinematics(&mut self, kinematics: &Kinematics) -> Result<()> {
        self.sqs = kinematics.sqrt_s()?;
        self.pair_mass = pdg::mass(self.pair)?;
        if self.sqs <= 2.0 * self.pair_mass {
            return Err(Error::Kinematics(format!(
                "centre-of-mass energy {} below the pair production threshold {}",
                self.sqs,
                2.0 * self.pair_mass
            )));
        }
        self.phase_space = PhaseSpace::new();
        self.cos_theta = self.phase_space.define(
            Mapping::Linear,
            Limits::new(-1.0, 1.0)?,
            Limits::new(-1.0, 1.0)?,
            "cos(theta*)",
        )?;
        self.phi = self.phase_space.define(
            Mapping::Linear,
            Limits::new(0.0, 2.0 * PI)?,
            Limits::new(0.0, 2.0 * PI)?,
            "phi",
        )?;
        Ok(())
    }

    fn compute_weight(&mut self) -> Result<f64> {
        // dσ/dΩ for a unit matrix element, in pb
        let flux = 1.0 / (64.0 * PI * PI * self.sqs * self.sqs);
        Ok(GEV2_TO_PB * flux * self.pstar() / (0.5 * self.sqs))
    }

    fn fill_kinematics(&mut self, symmetrise: bool) -> Result<()> {
        self.event.restore();
        let (mut plus, mut minus) = self.pair_momenta();
        self.fills = self.fills.wrapping_add(1);
        if symmetrise && self.fills % 2 == 0 {
            std::mem::swap(&mut plus, &mut minus);
        }
        let half_sqs = 0.5 * self.sqs;
        let beam1 = Momentum::new(0.0, 0.0, half_sqs, half_sqs);
        let beam2 = Momentum::new(0.0, 0.0, -half_sqs, half_sqs);
        for (role, momentum, status) in [
            (Role::IncomingBeam1, beam1, Status::PrimordialIncoming),
            (Role::IncomingBeam2, beam2, Status::PrimordialIncoming),
            (Role::OutgoingBeam1, beam1 - plus, Status::FinalState),
            (Role::OutgoingBeam2, beam2 - minus, Status::FinalState),
            (Role::Intermediate, plus + minus, Status::Propagator),
        ] {
            let particle = self.event.one_with_role_mut(role)?;
            particle.set_momentum(momentum);
            particle.set_status(status);
        }
        let central = self.event.ids_with_role(Role::CentralSystem);
        for (&id, momentum) in central.iter().zip([plus, minus]) {
            let particle = self
                .event
                .particle_mut(id)
                .ok_or_else(|| Error::Event("central particle vanished".to_owned()))?;
            particle.set_momentum(momentum);
            particle.set_status(Status::FinalState);
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Process> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn unit_process_weighs_one_everywhere() {
        let mut process =
            UnitProcess::from_bag(&UnitProcess::description().validate(&ParameterBag::new()).unwrap())
                .unwrap();
        process.prepare_kinematics(&Kinematics::default()).unwrap();
        assert_eq!(process.ndim(), 3);
        assert_approx_eq!(f64, process.weight(&[0.1, 0.9, 0.4]).unwrap(), 1.0, ulps = 4);
    }

    #[test]
    fn twobody_event_balances_momentum() {
        let params = TwoBodyProcess::description()
            .validate(&ParameterBag::new())
            .unwrap();
        let mut process = TwoBodyProcess::from_bag(&params).unwrap();
        process.add_event_content().unwrap();
        process.prepare_kinematics(&Kinematics::default()).unwrap();
        let weight = process.weight(&[0.3, 0.8]).unwrap();
        assert!(weight > 0.0);
        process.fill_kinematics(false).unwrap();

        let event = process.event().unwrap();
        let total_in = event.momentum_with_role(Role::IncomingBeam1)
            + event.momentum_with_role(Role::IncomingBeam2);
        let total_out = event.momentum_with_role(Role::OutgoingBeam1)
            + event.momentum_with_role(Role::OutgoingBeam2)
            + event.momentum_with_role(Role::CentralSystem);
        assert_approx_eq!(f64, total_in.energy(), total_out.energy(), epsilon = 1e-6);
        assert_approx_eq!(f64, total_in.pz(), total_out.pz(), epsilon = 1e-6);
        assert_approx_eq!(f64, total_out.px(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn pair_legs_are_back_to_back() {
        let params = TwoBodyProcess::description()
            .validate(&ParameterBag::new())
            .unwrap();
        let mut process = TwoBodyProcess::from_bag(&params).unwrap();
        process.add_event_content().unwrap();
        process.prepare_kinematics(&Kinematics::default()).unwrap();
        process.weight(&[0.25, 0.5]).unwrap();
        process.fill_kinematics(false).unwrap();
        let central = process.event().unwrap().with_role(Role::CentralSystem);
        assert_approx_eq!(
            f64,
            central[0].momentum.pt(),
            central[1].momentum.pt(),
            epsilon = 1e-9
        );
        assert_approx_eq!(
            f64,
            central[0].momentum.pz(),
            -central[1].momentum.pz(),
            epsilon = 1e-9
        );
    }
}
