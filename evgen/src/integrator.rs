//! The integrator contract and its module factory.

use super::error::{Error, Result};
use super::integrand::Integrand;
use super::limits::Limits;
use super::params::ParameterBag;
use super::process::MAX_DIM;
use super::registry::ModuleFactory;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::sync::{OnceLock, RwLock};

/// The contract of every cross-section integrator.
pub trait Integrator: Send + Sync {
    /// Unique name of the algorithm.
    fn name(&self) -> &str;

    /// Overrides the per-dimension integration ranges (the default is the
    /// unit hypercube).
    fn set_limits(&mut self, limits: Vec<Limits>);

    /// Estimates the integral of the wrapped process, returning the value
    /// and its uncertainty and retaining any trained state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integration`] when the primitive reports a
    /// non-success outcome.
    fn integrate(&mut self, integrand: &mut Integrand) -> Result<(f64, f64)>;

    /// Transports a unit-hypercube point through any trained importance
    /// state, writing the transformed coordinates into `out` and returning
    /// the accompanying weight factor. The identity by default.
    fn treat(&self, x: &[f64], out: &mut [f64]) -> f64 {
        out.copy_from_slice(x);
        1.0
    }
}

/// Hyperparameters shared by every integrator module.
pub struct CommonParameters {
    /// Number of function calls per refinement batch.
    pub ncvg: usize,
    /// RNG seed; zero draws a fresh one.
    pub seed: u64,
    /// Per-dimension integration ranges.
    pub limits: Vec<Limits>,
}

impl CommonParameters {
    pub(crate) fn from_bag(params: &ParameterBag) -> Result<Self> {
        let seed = u64::try_from(params.get_or("seed", 0_i64)?.max(0)).unwrap_or_default();
        Ok(Self {
            ncvg: params.get_or("ncvg", 100_000_usize)?,
            seed,
            limits: Vec::new(),
        })
    }

    /// Seeded engine; a zero seed falls back to an entropy-drawn one.
    pub(crate) fn rng(&self) -> Pcg64 {
        let seed = if self.seed == 0 {
            rand::random()
        } else {
            self.seed
        };
        Pcg64::seed_from_u64(seed)
    }

    /// Per-dimension bounds, defaulting to [0, 1].
    pub(crate) fn bounds(&self, ndim: usize) -> Result<(Vec<f64>, Vec<f64>)> {
        if ndim == 0 || ndim > MAX_DIM {
            return Err(Error::Integration(format!(
                "cannot integrate over {ndim} dimensions (at most {MAX_DIM})"
            )));
        }
        let mut lo = vec![0.0; ndim];
        let mut hi = vec![1.0; ndim];
        for (i, limits) in self.limits.iter().take(ndim).enumerate() {
            if let Some(min) = limits.min() {
                lo[i] = min;
            }
            if let Some(max) = limits.max() {
                hi[i] = max;
            }
            if lo[i] >= hi[i] {
                return Err(Error::Integration(format!(
                    "empty integration range for dimension {i}: [{}, {}]",
                    lo[i], hi[i]
                )));
            }
        }
        Ok((lo, hi))
    }
}

/// Shared factory for all integrators, with the built-in modules registered
/// on first access.
///
/// # Panics
///
/// Panics if a built-in module name clashes, which cannot happen short of a
/// coding error.
pub fn factory() -> &'static RwLock<ModuleFactory<dyn Integrator>> {
    static FACTORY: OnceLock<RwLock<ModuleFactory<dyn Integrator>>> = OnceLock::new();
    FACTORY.get_or_init(|| {
        let mut factory = ModuleFactory::new("integrator factory");
        crate::register_module!(
            factory,
            dyn Integrator,
            "Vegas",
            super::vegas::VegasIntegrator
        )
        .unwrap();
        crate::register_module!(
            factory,
            dyn Integrator,
            "MISER",
            super::miser::MiserIntegrator
        )
        .unwrap();
        crate::register_module!(
            factory,
            dyn Integrator,
            "plain",
            super::plain::PlainIntegrator
        )
        .unwrap();
        RwLock::new(factory)
    })
}
