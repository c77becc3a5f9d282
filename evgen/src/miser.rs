//! MISER recursive stratified sampling integrator.

use super::error::{Error, Result};
use super::integrand::Integrand;
use super::integrator::{CommonParameters, Integrator};
use super::limits::Limits;
use super::params::ParameterBag;
use super::registry::Buildable;
use super::schema::ParametersDescription;
use rand::Rng;
use tracing::debug;

#[allow(clippy::cast_precision_loss)]
const fn as_f64(x: usize) -> f64 {
    x as f64
}

struct MiserParameters {
    estimate_frac: f64,
    min_calls: usize,
    min_calls_per_bisection: usize,
    alpha: f64,
    dither: f64,
}

/// Recursive stratified sampling: the integration volume is bisected along
/// the dimension with the most uneven variance, and the call budget is
/// shared out proportionally to the sub-volume fluctuations.
pub struct MiserIntegrator {
    common: CommonParameters,
    params: MiserParameters,
}

impl Buildable for MiserIntegrator {
    fn description() -> ParametersDescription {
        let mut desc = ParametersDescription::new("MISER stratified sampling integrator");
        desc.add("ncvg", 100_000_i64, "number of function calls")
            .add("seed", 0_i64, "RNG seed (0 draws a fresh one)")
            .add(
                "estimateFraction",
                0.1,
                "fraction of the calls spent estimating sub-volume variances",
            )
            .add("minCalls", 160_i64, "minimal calls per variance estimate")
            .add(
                "minCallsPerBisection",
                5_120_i64,
                "threshold below which plain sampling takes over",
            )
            .add("alpha", 2.0, "variance-weighting exponent for call sharing")
            .add("dither", 0.1, "relative random offset of the bisection point");
        desc
    }

    fn from_bag(params: &ParameterBag) -> Result<Self> {
        Ok(Self {
            common: CommonParameters::from_bag(params)?,
            params: MiserParameters {
                estimate_frac: params.get_or("estimateFraction", 0.1)?,
                min_calls: params.get_or("minCalls", 160_usize)?,
                min_calls_per_bisection: params.get_or("minCallsPerBisection", 5_120_usize)?,
                alpha: params.get_or("alpha", 2.0)?,
                dither: params.get_or("dither", 0.1)?,
            },
        })
    }
}

impl Integrator for MiserIntegrator {
    fn name(&self) -> &str {
        "MISER"
    }

    fn set_limits(&mut self, limits: Vec<Limits>) {
        self.common.limits = limits;
    }

    fn integrate(&mut self, integrand: &mut Integrand) -> Result<(f64, f64)> {
        let ndim = integrand.ndim();
        let (lo, hi) = self.common.bounds(ndim)?;
        let mut rng = self.common.rng();
        let mut f = |x: &[f64]| integrand.eval(x);
        let (result, variance) =
            bisect(&mut f, &lo, &hi, self.common.ncvg.max(2), &self.params, &mut rng);
        if !result.is_finite() {
            return Err(Error::Integration(
                "MISER accumulated a non-finite estimate".to_owned(),
            ));
        }
        debug!(result, "MISER estimate complete");
        Ok((result, variance.max(0.0).sqrt()))
    }
}

/// Plain sub-estimate over one box; returns (integral, variance of the
/// integral).
fn plain_estimate<F: FnMut(&[f64]) -> f64, R: Rng>(
    f: &mut F,
    lo: &[f64],
    hi: &[f64],
    calls: usize,
    rng: &mut R,
) -> (f64, f64) {
    let volume: f64 = lo.iter().zip(hi).map(|(l, h)| h - l).product();
    let mut x = vec![0.0; lo.len()];
    let (mut sum, mut sum_sq) = (0.0, 0.0);
    for _ in 0..calls {
        for ((xi, l), h) in x.iter_mut().zip(lo).zip(hi) {
            *xi = rng.gen_range(*l..*h);
        }
        let value = f(&x);
        sum += value;
        sum_sq = value.mul_add(value, sum_sq);
    }
    let calls_f = as_f64(calls);
    let mean = sum / calls_f;
    let variance = (sum_sq / calls_f - mean * mean).max(0.0) / (calls_f - 1.0).max(1.0);
    (volume * mean, volume * volume * variance)
}

fn bisect<F: FnMut(&[f64]) -> f64, R: Rng>(
    f: &mut F,
    lo: &[f64],
    hi: &[f64],
    calls: usize,
    params: &MiserParameters,
    rng: &mut R,
) -> (f64, f64) {
    let dim = lo.len();
    if calls < params.min_calls_per_bisection {
        return plain_estimate(f, lo, hi, calls.max(2), rng);
    }

    // exploratory sample sizing
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    let estimate_calls = ((params.estimate_frac * as_f64(calls)) as usize)
        .max(params.min_calls)
        .min(calls / 2);

    // dithered bisection points
    let mid: Vec<f64> = lo
        .iter()
        .zip(hi)
        .map(|(l, h)| {
            let dither = params.dither * (rng.gen::<f64>() - 0.5);
            (0.5 + dither).mul_add(h - l, *l)
        })
        .collect();

    // one exploratory sample classifies every point against each bisection
    let mut x = vec![0.0; dim];
    let mut sum_l = vec![0.0; dim];
    let mut sq_l = vec![0.0; dim];
    let mut n_l = vec![0_usize; dim];
    let mut sum_r = vec![0.0; dim];
    let mut sq_r = vec![0.0; dim];
    let mut n_r = vec![0_usize; dim];
    for _ in 0..estimate_calls {
        for ((xi, l), h) in x.iter_mut().zip(lo).zip(hi) {
            *xi = rng.gen_range(*l..*h);
        }
        let value = f(&x);
        for j in 0..dim {
            if x[j] < mid[j] {
                sum_l[j] += value;
                sq_l[j] = value.mul_add(value, sq_l[j]);
                n_l[j] += 1;
            } else {
                sum_r[j] += value;
                sq_r[j] = value.mul_add(value, sq_r[j]);
                n_r[j] += 1;
            }
        }
    }

    // pick the dimension minimising the combined side fluctuations
    let side_sigma = |sum: f64, sq: f64, n: usize| -> Option<f64> {
        if n < 2 {
            return None;
        }
        let n_f = as_f64(n);
        let mean = sum / n_f;
        Some((sq / n_f - mean * mean).max(0.0).sqrt())
    };
    let exponent = 2.0 / (1.0 + params.alpha);
    let mut best: Option<(usize, f64, f64, f64)> = None;
    for j in 0..dim {
        let (Some(sigma_l), Some(sigma_r)) = (
            side_sigma(sum_l[j], sq_l[j], n_l[j]),
            side_sigma(sum_r[j], sq_r[j], n_r[j]),
        ) else {
            continue;
        };
        let goodness = sigma_l.powf(exponent) + sigma_r.powf(exponent);
        match best {
            Some((_, score, _, _)) if score <= goodness => {}
            _ => best = Some((j, goodness, sigma_l, sigma_r)),
        }
    }
    let Some((split_dim, _, sigma_l, sigma_r)) = best else {
        // exploration failed to populate both sides anywhere: fall back to
        // plain sampling of the remaining budget
        return plain_estimate(f, lo, hi, calls - estimate_calls, rng);
    };

    // share the remaining budget out proportionally to the fluctuations
    let remaining = calls - estimate_calls;
    if remaining < 2 * params.min_calls {
        return plain_estimate(f, lo, hi, remaining.max(2), rng);
    }
    let fraction = if sigma_l + sigma_r > 0.0 {
        sigma_l.powf(exponent) / (sigma_l.powf(exponent) + sigma_r.powf(exponent))
    } else {
        0.5
    };
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    let calls_l = ((as_f64(remaining) * fraction) as usize)
        .clamp(params.min_calls, remaining.saturating_sub(params.min_calls));
    let calls_r = remaining - calls_l;

    let mut hi_l = hi.to_vec();
    hi_l[split_dim] = mid[split_dim];
    let mut lo_r = lo.to_vec();
    lo_r[split_dim] = mid[split_dim];

    let (res_l, var_l) = bisect(f, lo, &hi_l, calls_l, params, rng);
    let (res_r, var_r) = bisect(f, &lo_r, hi, calls_r, params, rng);
    (res_l + res_r, var_l + var_r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    #[test]
    fn polynomial_integral_converges() {
        let params = MiserParameters {
            estimate_frac: 0.1,
            min_calls: 32,
            min_calls_per_bisection: 1_024,
            alpha: 2.0,
            dither: 0.0,
        };
        let mut rng = Pcg64::seed_from_u64(2_718_281);
        // ∫ (x + y² + z³) over the unit cube = 13/12
        let mut f = |x: &[f64]| x[0] + x[1] * x[1] + x[2].powi(3);
        let (value, variance) = bisect(
            &mut f,
            &[0.0, 0.0, 0.0],
            &[1.0, 1.0, 1.0],
            50_000,
            &params,
            &mut rng,
        );
        let error = variance.sqrt().max(1e-4);
        assert!(
            (value - 13.0 / 12.0).abs() < 5.0 * error,
            "value {value} error {error}"
        );
    }
}
