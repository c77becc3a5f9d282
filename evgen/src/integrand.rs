//! Uniform (coordinates → weight) facade around a process: Jacobian folding,
//! taming functions, kinematic cuts, and the storage-mode pipeline hooks.

use super::event::{Role, Status};
use super::exporter::EventExporter;
use super::kinematics::{CentralCuts, Kinematics};
use super::modifier::EventModifier;
use super::process::Process;
use super::taming::TamingFunction;
use crate::error::Result;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// State shared by every worker of a run and guarded by the one
/// process-wide mutex: the ordered modifier and exporter pipelines and the
/// accepted-event counter.
#[derive(Default)]
pub struct SharedRun {
    /// Ordered event-modifier pipeline.
    pub modifiers: Vec<Box<dyn EventModifier>>,
    /// Ordered event-exporter pipeline.
    pub exporters: Vec<Box<dyn EventExporter>>,
    /// Number of events accepted so far, over all workers.
    pub ngen: u64,
}

impl SharedRun {
    /// Propagates the integrated cross section to every pipeline stage.
    pub fn set_cross_section(&mut self, cross_section: (f64, f64)) {
        for modifier in &mut self.modifiers {
            modifier.set_cross_section(cross_section);
        }
        for exporter in &mut self.exporters {
            exporter.set_cross_section(cross_section);
        }
    }
}

/// The integrand facade: evaluation is stateless with respect to
/// accepted-event accounting, which stays with the generation worker.
pub struct Integrand {
    process: Box<dyn Process>,
    kinematics: Kinematics,
    taming: Vec<TamingFunction>,
    shared: Arc<Mutex<SharedRun>>,
    has_modifiers: bool,
    symmetrise: bool,
    storage: bool,
}

impl Integrand {
    /// Wraps a process: declares its event content and integration
    /// variables, then freezes the configuration for the run.
    ///
    /// # Errors
    ///
    /// Propagates event-content and kinematics-preparation failures.
    ///
    /// # Panics
    ///
    /// Panics if the shared-state lock is poisoned.
    pub fn new(
        mut process: Box<dyn Process>,
        kinematics: Kinematics,
        taming: Vec<TamingFunction>,
        shared: Arc<Mutex<SharedRun>>,
        symmetrise: bool,
    ) -> Result<Self> {
        process.add_event_content()?;
        process.prepare_kinematics(&kinematics)?;
        let has_modifiers = !shared.lock().unwrap().modifiers.is_empty();
        Ok(Self {
            process,
            kinematics,
            taming,
            shared,
            has_modifiers,
            symmetrise,
            storage: false,
        })
    }

    /// Number of integration dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.process.ndim()
    }

    /// The wrapped process.
    #[must_use]
    pub fn process(&self) -> &dyn Process {
        self.process.as_ref()
    }

    /// Handle on the shared pipeline state.
    #[must_use]
    pub fn shared(&self) -> Arc<Mutex<SharedRun>> {
        Arc::clone(&self.shared)
    }

    /// Is the facade currently in its storage pass?
    #[must_use]
    pub const fn storage(&self) -> bool {
        self.storage
    }

    /// Independent evaluator for a parallel worker: the process is cloned,
    /// the pipelines and counters stay shared.
    ///
    /// # Errors
    ///
    /// Propagates the preparation failures of the cloned process.
    pub fn clone_for_worker(&self) -> Result<Self> {
        Integrand::new(
            self.process.clone_box(),
            self.kinematics.clone(),
            self.taming.clone(),
            Arc::clone(&self.shared),
            self.symmetrise,
        )
    }

    /// Propagates the integrated cross section to the pipelines.
    ///
    /// # Panics
    ///
    /// Panics if the shared-state lock is poisoned.
    pub fn set_cross_section(&self, cross_section: (f64, f64)) {
        self.shared.lock().unwrap().set_cross_section(cross_section);
    }

    /// Evaluation entry point for integration and candidate weighing: the
    /// taming and cut layers apply, the modifier and exporter pipelines are
    /// reserved for the storage pass.
    pub fn eval(&mut self, x: &[f64]) -> f64 {
        self.eval_inner(x, None)
    }

    /// Storage-mode evaluation of an accepted candidate: the worker holds
    /// the run mutex for the whole accept block and hands the guarded state
    /// in, so exporter ordering follows mutex acquisition.
    pub fn eval_accepted(&mut self, x: &[f64], shared: &mut SharedRun) -> f64 {
        self.storage = true;
        let weight = self.eval_inner(x, Some(shared));
        self.storage = false;
        weight
    }

    fn eval_inner(&mut self, x: &[f64], mut shared: Option<&mut SharedRun>) -> f64 {
        let mut weight = match self.process.weight(x) {
            Ok(weight) => weight,
            Err(err) => {
                warn!(%err, "phase space point evaluation failed; point rejected");
                return 0.0;
            }
        };
        if weight <= 0.0 {
            return 0.0;
        }
        if self.process.event().is_none() {
            return weight;
        }
        // nothing event-dependent to apply: skip the event machinery
        if !self.storage && self.taming.is_empty() && !self.kinematics.cuts.any() {
            return weight;
        }

        if let Err(err) = self.process.fill_kinematics(self.symmetrise) {
            warn!(%err, "event kinematics could not be filled; point rejected");
            return 0.0;
        }

        for taming in &self.taming {
            match taming.eval(self.process.event().unwrap()) {
                Ok(factor) => weight *= factor,
                Err(err) => {
                    warn!(%err, "taming function failed; point rejected");
                    return 0.0;
                }
            }
        }
        if weight <= 0.0 {
            return 0.0;
        }

        if !self.passes_cuts() {
            return 0.0;
        }

        // the pipelines only see the storage re-evaluation of accepted
        // candidates
        if self.storage && self.has_modifiers {
            let Some(shared) = shared.as_deref_mut() else {
                warn!("modifier pipeline unreachable; point rejected");
                return 0.0;
            };
            let full = self.storage;
            let event = self.process.event_mut().unwrap();
            for modifier in &mut shared.modifiers {
                match modifier.run(event, &mut weight, full) {
                    Ok(true) if weight > 0.0 => {}
                    Ok(_) => return 0.0,
                    Err(err) => {
                        warn!(%err, modifier = modifier.name(), "modifier failed; point rejected");
                        return 0.0;
                    }
                }
            }
        }

        if self.storage && weight > 0.0 {
            let Some(shared) = shared.as_deref_mut() else {
                return weight;
            };
            let event = self.process.event_mut().unwrap();
            event.weight = weight;
            for exporter in &mut shared.exporters {
                if let Err(err) = exporter.export(event) {
                    warn!(%err, exporter = exporter.name(), "event export failed");
                }
            }
        }
        weight
    }

    fn passes_cuts(&self) -> bool {
        let cuts = &self.kinematics.cuts;
        if !cuts.any() {
            return true;
        }
        let event = self.process.event().unwrap();

        let passes_central = |cut: &CentralCuts, momentum: &super::momentum::Momentum| {
            cut.pt_single.contains(momentum.pt())
                && cut.energy_single.contains(momentum.energy())
                && cut.eta_single.contains(momentum.eta())
                && cut.rapidity_single.contains(momentum.rapidity())
        };
        for particle in event.with_role(Role::CentralSystem) {
            if !passes_central(&cuts.central, &particle.momentum) {
                return false;
            }
            if let Some(cut) = cuts.central_particles.get(&particle.pdg_id) {
                if !passes_central(cut, &particle.momentum) {
                    return false;
                }
            }
        }
        if !cuts
            .central
            .mass_sum
            .contains(event.momentum_with_role(Role::CentralSystem).mass())
        {
            return false;
        }

        for role in [Role::OutgoingBeam1, Role::OutgoingBeam2] {
            for particle in event.with_role(role) {
                if particle.status != Status::FinalState {
                    continue;
                }
                if !cuts.remnants.mass_single.contains(particle.momentum.mass())
                    || !cuts.remnants.energy_single.contains(particle.momentum.energy())
                    || !cuts
                        .remnants
                        .rapidity_single
                        .contains(particle.momentum.rapidity().abs())
                {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::limits::Limits;
    use crate::params::ParameterBag;
    use crate::processes::{TwoBodyProcess, UnitProcess};
    use crate::registry::Buildable;
    use float_cmp::assert_approx_eq;

    fn shared() -> Arc<Mutex<SharedRun>> {
        Arc::new(Mutex::new(SharedRun::default()))
    }

    fn unit_integrand() -> Integrand {
        let params = UnitProcess::description()
            .validate(&ParameterBag::new())
            .unwrap();
        Integrand::new(
            Box::new(UnitProcess::from_bag(&params).unwrap()),
            Kinematics::default(),
            Vec::new(),
            shared(),
            false,
        )
        .unwrap()
    }

    fn twobody_integrand(kinematics: Kinematics) -> Integrand {
        let params = TwoBodyProcess::description()
            .validate(&ParameterBag::new())
            .unwrap();
        Integrand::new(
            Box::new(TwoBodyProcess::from_bag(&params).unwrap()),
            kinematics,
            Vec::new(),
            shared(),
            false,
        )
        .unwrap()
    }

    #[test]
    fn unit_integrand_is_one() {
        let mut integrand = unit_integrand();
        assert_eq!(integrand.ndim(), 3);
        assert_approx_eq!(f64, integrand.eval(&[0.2, 0.4, 0.9]), 1.0, ulps = 4);
    }

    #[test]
    fn central_cut_rejects_low_pt_points() {
        let mut kinematics = Kinematics::default();
        kinematics.cuts.central.pt_single = Limits::at_least(1_000.0);
        let mut integrand = twobody_integrand(kinematics);
        // cos(theta*) ~ 1: nearly collinear, tiny pt, must be cut away
        assert_approx_eq!(f64, integrand.eval(&[0.999, 0.2]), 0.0, ulps = 2);
        // central production keeps a comfortable pt
        assert!(integrand.eval(&[0.5, 0.2]) > 0.0);
    }

    struct Veto;

    impl EventModifier for Veto {
        fn name(&self) -> &str {
            "veto"
        }

        fn run(&mut self, _event: &mut Event, weight: &mut f64, _full: bool) -> Result<bool> {
            *weight *= 0.5;
            Ok(false)
        }
    }

    #[test]
    fn modifier_veto_zeroes_the_stored_weight_only() {
        let shared = shared();
        shared.lock().unwrap().modifiers.push(Box::new(Veto));
        let params = TwoBodyProcess::description()
            .validate(&ParameterBag::new())
            .unwrap();
        let mut integrand = Integrand::new(
            Box::new(TwoBodyProcess::from_bag(&params).unwrap()),
            Kinematics::default(),
            Vec::new(),
            Arc::clone(&shared),
            false,
        )
        .unwrap();
        // exploratory (integration-time) evaluation never reaches the
        // pipeline, so the veto has no effect on the integral
        assert!(integrand.eval(&[0.5, 0.5]) > 0.0);
        // the storage re-evaluation of an accepted candidate runs the
        // pipeline, which vetoes the event
        let mut guard = shared.lock().unwrap();
        assert_approx_eq!(
            f64,
            integrand.eval_accepted(&[0.5, 0.5], &mut guard),
            0.0,
            ulps = 2
        );
    }
}
