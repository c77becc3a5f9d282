//! Unweighted event production: worker state machine with correction
//! cycles, cooperative abort, and multi-threaded draining of one shared
//! grid cache.

use super::convert::f64_from_usize;
use super::error::{Error, Result};
use super::event::Event;
use super::grid::GridParameters;
use super::integrand::Integrand;
use super::integrator::Integrator;
use super::params::ParameterBag;
use super::registry::Buildable;
use super::schema::ParametersDescription;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

static ABORT: AtomicBool = AtomicBool::new(false);

/// Raises the process-wide abort flag; every worker returns at its next
/// poll. Meant to be called from a signal handler.
pub fn abort() {
    ABORT.store(true, Ordering::Release);
}

/// Has the abort flag been raised?
#[must_use]
pub fn abort_requested() -> bool {
    ABORT.load(Ordering::Acquire)
}

/// Lowers the abort flag ahead of a new run.
pub fn clear_abort() {
    ABORT.store(false, Ordering::Release);
}

/// Callback invoked, under the run mutex, for every accepted event. The
/// event reference is absent for processes that do not carry an event
/// record.
pub type Callback = dyn Fn(Option<&Event>, u64) + Send + Sync;

/// Steering of the unweighted generation stage.
#[derive(Clone, Debug)]
pub struct GenerationParameters {
    /// Is event generation requested at all?
    pub enabled: bool,
    /// Number of events to produce.
    pub maxgen: u64,
    /// Randomise the charge assignment of the central system.
    pub symmetrise: bool,
    /// Periodicity of the counter printout (0 disables it).
    pub print_every: u64,
    /// Number of parallel workers.
    pub num_threads: usize,
    /// Warmup sampling points per grid cell.
    pub num_points: usize,
    /// Base RNG seed of the workers (0 draws a fresh one).
    pub seed: u64,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            enabled: true,
            maxgen: 0,
            symmetrise: false,
            print_every: 10_000,
            num_threads: 2,
            num_points: 100,
            seed: 0,
        }
    }
}

impl Buildable for GenerationParameters {
    fn description() -> ParametersDescription {
        let mut desc = ParametersDescription::new("unweighted event generation");
        desc.add("enabled", true, "is event generation requested at all?")
            .add("maxgen", 0_i64, "number of events to produce")
            .add("symmetrise", false, "randomise the central-system charge assignment")
            .add("printEvery", 10_000_i64, "periodicity of the counter printout")
            .add("numThreads", 2_i64, "number of parallel generation workers")
            .add("numPoints", 100_i64, "warmup sampling points per grid cell")
            .add("seed", 0_i64, "base worker RNG seed (0 draws a fresh one)");
        desc
    }

    fn from_bag(params: &ParameterBag) -> Result<Self> {
        let num_points: usize = params.get_or("numPoints", 100_usize)?;
        if num_points < 100 {
            return Err(Error::config(
                "numPoints",
                format!("at least 100 warmup points per cell are required, got {num_points}"),
            ));
        }
        Ok(Self {
            enabled: params.get_or("enabled", true)?,
            maxgen: params.get_or("maxgen", 0_u64)?,
            symmetrise: params.get_or("symmetrise", false)?,
            print_every: params.get_or("printEvery", 10_000_u64)?,
            num_threads: params.get_or("numThreads", 2_usize)?.max(1),
            num_points,
            seed: params.get_or("seed", 0_u64)?,
        })
    }
}

/// Drives the production of unweighted events out of a prepared grid cache.
pub struct Generator {
    params: GenerationParameters,
    grid: GridParameters,
}

impl Generator {
    /// Allocates the grid cache for an `ndim`-dimensional integrand.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] for an unsupported dimensionality.
    pub fn new(params: GenerationParameters, ndim: usize) -> Result<Self> {
        Ok(Self {
            params,
            grid: GridParameters::new(ndim)?,
        })
    }

    /// The owned grid cache.
    #[must_use]
    pub const fn grid(&self) -> &GridParameters {
        &self.grid
    }

    /// Warmup pass: populates the per-cell weight maxima through the same
    /// evaluation path (including any integrator grid treatment) that the
    /// workers will use.
    ///
    /// # Errors
    ///
    /// Propagates grid-preparation failures.
    pub fn prepare(
        &mut self,
        integrator: &dyn Integrator,
        integrand: &mut Integrand,
    ) -> Result<()> {
        let ndim = self.grid.ndim();
        let seed = if self.params.seed == 0 {
            rand::random()
        } else {
            self.params.seed
        };
        let mut rng = Pcg64::seed_from_u64(seed);
        let mut treated = vec![0.0; ndim];
        let mut func = |x: &[f64]| {
            let factor = integrator.treat(x, &mut treated);
            factor * integrand.eval(&treated)
        };
        self.grid
            .prepare(&mut func, &mut rng, self.params.num_points)
    }

    /// Produces `count` more unweighted events, spread over the configured
    /// worker threads, invoking `callback` under the run mutex on each
    /// acceptance. Returns the total number of accepted events so far.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] when the grid was not prepared, and
    /// propagates worker failures.
    ///
    /// # Panics
    ///
    /// Panics if the shared-state lock is poisoned.
    pub fn generate(
        &self,
        integrator: &dyn Integrator,
        integrand: &Integrand,
        count: u64,
        callback: Option<&Callback>,
    ) -> Result<u64> {
        if !self.grid.prepared() {
            return Err(Error::Generation(
                "generation requested on an unprepared grid".to_owned(),
            ));
        }
        let shared = integrand.shared();
        let already = shared.lock().unwrap().ngen;
        let target = already + count;
        info!(count, workers = self.params.num_threads, "will generate events");

        let counter = AtomicU64::new(already);
        let base_seed = if self.params.seed == 0 {
            rand::random()
        } else {
            self.params.seed
        };
        let mut integrands = Vec::new();
        for _ in 0..self.params.num_threads {
            integrands.push(integrand.clone_for_worker()?);
        }

        let grid = &self.grid;
        let counter_ref = &counter;
        let params = &self.params;
        std::thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::new();
            for (index, worker_integrand) in integrands.into_iter().enumerate() {
                let seed = base_seed
                    .wrapping_add(0x9e37_79b9_7f4a_7c15_u64.wrapping_mul(index as u64 + 1));
                let mut worker = Worker::new(
                    grid,
                    integrator,
                    worker_integrand,
                    Pcg64::seed_from_u64(seed),
                    counter_ref,
                    target,
                    params.print_every,
                    callback,
                );
                handles.push(scope.spawn(move || worker.run()));
            }
            for handle in handles {
                handle
                    .join()
                    .map_err(|_| Error::Generation("a generation worker panicked".to_owned()))??;
            }
            Ok(())
        })?;

        let total = shared.lock().unwrap().ngen;
        if abort_requested() {
            info!(total, "generation interrupted by the abort flag");
        } else {
            info!(total, "generation finished");
        }
        Ok(total)
    }
}

/// One generation worker: owns an independent process evaluator and its RNG,
/// shares the grid cache and the accounting with its siblings.
struct Worker<'scope> {
    grid: &'scope GridParameters,
    integrator: &'scope dyn Integrator,
    integrand: Integrand,
    rng: Pcg64,
    counter: &'scope AtomicU64,
    target: u64,
    print_every: u64,
    callback: Option<&'scope Callback>,
    // correction-cycle state, local to this worker
    ps_bin: Option<usize>,
    visits: Vec<u64>,
    correc: f64,
    correc2: f64,
    f_max2: f64,
    f_max_old: f64,
    f_max_diff: f64,
    // scratch
    point: Vec<f64>,
    trial: Vec<f64>,
    treated: Vec<f64>,
}

impl<'scope> Worker<'scope> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        grid: &'scope GridParameters,
        integrator: &'scope dyn Integrator,
        integrand: Integrand,
        rng: Pcg64,
        counter: &'scope AtomicU64,
        target: u64,
        print_every: u64,
        callback: Option<&'scope Callback>,
    ) -> Self {
        let ndim = grid.ndim();
        Self {
            grid,
            integrator,
            integrand,
            rng,
            counter,
            target,
            print_every,
            callback,
            ps_bin: None,
            visits: vec![0; grid.size()],
            correc: 0.0,
            correc2: 0.0,
            f_max2: 0.0,
            f_max_old: 0.0,
            f_max_diff: 0.0,
            point: vec![0.0; ndim],
            trial: vec![0.0; ndim],
            treated: vec![0.0; ndim],
        }
    }

    fn run(&mut self) -> Result<u64> {
        let mut generated = 0;
        loop {
            if abort_requested() || self.counter.load(Ordering::Acquire) >= self.target {
                return Ok(generated);
            }
            if self.next()? {
                generated += 1;
            }
        }
    }

    fn eval_point(&mut self) -> f64 {
        let factor = self.integrator.treat(&self.point, &mut self.treated);
        factor * self.integrand.eval(&self.treated)
    }

    fn eval_trial(&mut self) -> f64 {
        let factor = self.integrator.treat(&self.trial, &mut self.treated);
        factor * self.integrand.eval(&self.treated)
    }

    /// One generation attempt; `Ok(true)` when an event was accepted and
    /// passed to the pipelines.
    fn next(&mut self) -> Result<bool> {
        // drain a pending correction cycle first
        if self.ps_bin.is_some() {
            let mut has_correction = false;
            while !self.correction_cycle(&mut has_correction) {
                if abort_requested() {
                    return Ok(false);
                }
            }
            if has_correction {
                return self.store_event();
            }
        }

        // normal generation cycle
        let max = f64_from_usize(self.grid.size());
        let weight = loop {
            if abort_requested() {
                return Ok(false);
            }
            // cell-major rejection on the per-cell maximum
            let (bin, y) = loop {
                if abort_requested() {
                    return Ok(false);
                }
                #[allow(clippy::cast_possible_truncation)]
                #[allow(clippy::cast_sign_loss)]
                let bin = ((self.rng.gen::<f64>() * max) as usize).min(self.grid.size() - 1);
                self.visits[bin] += 1;
                self.grid.add_visit(bin);
                let y = self.rng.gen::<f64>() * self.grid.f_max_global();
                if y <= self.grid.f_max(bin) {
                    break (bin, y);
                }
            };
            self.ps_bin = Some(bin);
            self.grid.shoot(&mut self.rng, bin, &mut self.point);
            let weight = self.eval_point();
            if weight >= y {
                break weight;
            }
        };

        let bin = self.ps_bin.unwrap_or_default();
        let f_max_bin = self.grid.f_max(bin);
        if weight < f_max_bin {
            // plain acceptance, no grid repair needed
            self.ps_bin = None;
        } else if weight <= self.grid.f_max_global() {
            // a new local maximum: repair the cell and spread the correction
            self.f_max_old = f_max_bin;
            self.grid.raise_f_max(bin, weight);
            self.f_max_diff = weight - self.f_max_old;
            self.correc = (visits_f64(self.visits[bin]) - 1.0) * self.f_max_diff
                / self.grid.f_max_global()
                - 1.0;
        } else {
            // a new global maximum
            self.f_max_old = f_max_bin;
            self.grid.raise_f_max(bin, weight);
            self.f_max_diff = weight - self.f_max_old;
            self.grid.raise_f_max_global(weight);
            let global = self.grid.f_max_global();
            self.correc = (visits_f64(self.visits[bin]) - 1.0) * self.f_max_diff / global * weight
                / global
                - 1.0;
        }
        if self.ps_bin.is_some() {
            debug!(
                bin,
                correction = self.correc,
                "correction will be applied for this phase space cell"
            );
        }

        if weight > 0.0 {
            return self.store_event();
        }
        Ok(false)
    }

    /// One step of the correction cycle; `true` once the step is complete
    /// (either a derived candidate was settled or the cycle drained).
    fn correction_cycle(&mut self, has_correction: &mut bool) -> bool {
        let bin = self.ps_bin.unwrap_or_default();
        debug!(
            bin,
            correc = self.correc,
            correc2 = self.correc2,
            "correction cycle step"
        );
        if self.correc >= 1.0 {
            self.correc -= 1.0;
        }
        if self.rng.gen::<f64>() < self.correc {
            self.correc = -1.0;
            // derive a fresh candidate inside the same cell
            self.grid.shoot(&mut self.rng, bin, &mut self.trial);
            let weight = self.eval_trial();
            // correction of the correction
            if weight > self.grid.f_max(bin) {
                self.f_max2 = self.f_max2.max(weight);
                self.correc += 1.0;
                self.correc2 -= 1.0;
            }
            if weight >= self.f_max_diff.mul_add(self.rng.gen::<f64>(), self.f_max_old) {
                self.point.copy_from_slice(&self.trial);
                *has_correction = true;
                return true;
            }
            return false;
        }
        // second-pass promotion when a larger weight surfaced mid-cycle
        if self.f_max2 > self.grid.f_max(bin) {
            self.f_max_old = self.grid.f_max(bin);
            self.grid.raise_f_max(bin, self.f_max2);
            self.f_max_diff = self.f_max2 - self.f_max_old;
            let correc_tmp =
                (visits_f64(self.visits[bin]) - 1.0) * self.f_max_diff / self.grid.f_max_global();
            if self.f_max2 < self.grid.f_max_global() {
                self.correc = correc_tmp;
            } else {
                self.grid.raise_f_max_global(self.f_max2);
                self.correc = correc_tmp * self.f_max2 / self.grid.f_max_global();
            }
            self.correc -= self.correc2;
            self.correc2 = 0.0;
            self.f_max2 = 0.0;
            return false;
        }
        true
    }

    /// Storage pass of an accepted candidate, holding the run mutex for the
    /// whole accept block.
    fn store_event(&mut self) -> Result<bool> {
        let shared = self.integrand.shared();
        let mut guard = shared
            .lock()
            .map_err(|_| Error::Generation("run state lock poisoned".to_owned()))?;
        if guard.ngen >= self.target {
            return Ok(false);
        }
        let factor = self.integrator.treat(&self.point, &mut self.treated);
        let weight = factor * self.integrand.eval_accepted(&self.treated, &mut guard);
        if weight <= 0.0 {
            return Ok(false);
        }
        guard.ngen += 1;
        let ngen = guard.ngen;
        self.counter.fetch_max(ngen, Ordering::AcqRel);
        if self.print_every > 0 && ngen % self.print_every == 0 {
            info!(events = ngen, "generated events");
            if let Some(event) = self.integrand.process().event() {
                debug!("{}", event.dump());
            }
        }
        if let Some(callback) = self.callback {
            callback(self.integrand.process().event(), ngen);
        }
        Ok(true)
    }
}

#[allow(clippy::cast_precision_loss)]
const fn visits_f64(x: u64) -> f64 {
    x as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrand::SharedRun;
    use crate::kinematics::Kinematics;
    use crate::processes::FunctionalProcess;
    use std::sync::{Arc, Mutex};

    struct IdentityIntegrator;

    impl Integrator for IdentityIntegrator {
        fn name(&self) -> &str {
            "identity"
        }

        fn set_limits(&mut self, _limits: Vec<crate::limits::Limits>) {}

        fn integrate(&mut self, _integrand: &mut Integrand) -> Result<(f64, f64)> {
            Ok((0.0, 0.0))
        }
    }

    fn functional_integrand(
        ndim: usize,
        f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Integrand {
        Integrand::new(
            Box::new(FunctionalProcess::new("test", ndim, f)),
            Kinematics::default(),
            Vec::new(),
            Arc::new(Mutex::new(SharedRun::default())),
            false,
        )
        .unwrap()
    }

    #[test]
    fn generation_requires_a_prepared_grid() {
        clear_abort();
        let generator = Generator::new(GenerationParameters::default(), 2).unwrap();
        let integrand = functional_integrand(2, |_| 1.0);
        let outcome = generator.generate(&IdentityIntegrator, &integrand, 10, None);
        assert!(outcome.is_err());
    }

    #[test]
    fn flat_weight_generates_the_requested_count() {
        clear_abort();
        let params = GenerationParameters {
            num_threads: 2,
            print_every: 0,
            seed: 1_234,
            ..GenerationParameters::default()
        };
        let mut generator = Generator::new(params, 2).unwrap();
        let mut integrand = functional_integrand(2, |_| 1.0);
        generator
            .prepare(&IdentityIntegrator, &mut integrand)
            .unwrap();
        let total = generator
            .generate(&IdentityIntegrator, &integrand, 500, None)
            .unwrap();
        assert_eq!(total, 500);
    }

}
