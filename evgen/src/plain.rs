//! Plain (uniform-sampling) Monte Carlo integrator.

use super::error::Result;
use super::integrand::Integrand;
use super::integrator::{CommonParameters, Integrator};
use super::limits::Limits;
use super::params::ParameterBag;
use super::registry::Buildable;
use super::schema::ParametersDescription;
use rand::Rng;
use tracing::debug;

/// Single fixed-sample-size Monte Carlo estimate, with no adaptation.
pub struct PlainIntegrator {
    common: CommonParameters,
}

impl Buildable for PlainIntegrator {
    fn description() -> ParametersDescription {
        let mut desc = ParametersDescription::new("plain Monte Carlo integrator");
        desc.add("ncvg", 100_000_i64, "number of function calls")
            .add("seed", 0_i64, "RNG seed (0 draws a fresh one)");
        desc
    }

    fn from_bag(params: &ParameterBag) -> Result<Self> {
        Ok(Self {
            common: CommonParameters::from_bag(params)?,
        })
    }
}

impl Integrator for PlainIntegrator {
    fn name(&self) -> &str {
        "plain"
    }

    fn set_limits(&mut self, limits: Vec<Limits>) {
        self.common.limits = limits;
    }

    fn integrate(&mut self, integrand: &mut Integrand) -> Result<(f64, f64)> {
        let ndim = integrand.ndim();
        let (lo, hi) = self.common.bounds(ndim)?;
        let volume: f64 = lo.iter().zip(&hi).map(|(l, h)| h - l).product();
        let calls = self.common.ncvg.max(2);
        let mut rng = self.common.rng();

        let mut x = vec![0.0; ndim];
        let (mut sum, mut sum_sq) = (0.0, 0.0);
        for _ in 0..calls {
            for ((xi, l), h) in x.iter_mut().zip(&lo).zip(&hi) {
                *xi = rng.gen_range(*l..*h);
            }
            let value = integrand.eval(&x);
            sum += value;
            sum_sq += value * value;
        }
        let calls_f = super::convert::f64_from_usize(calls);
        let mean = sum / calls_f;
        let variance = (sum_sq / calls_f - mean * mean) / (calls_f - 1.0);
        let result = volume * mean;
        let error = volume * variance.max(0.0).sqrt();
        debug!(result, error, calls, "plain Monte Carlo estimate");
        Ok((result, error))
    }
}
