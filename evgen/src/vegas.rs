//! Vegas adaptive importance-sampling integration: the in-crate primitive
//! holding the per-dimension bin histogram, and the integrator module
//! driving warmup, χ²-gated refinement and the generation-time grid
//! treatment.

use super::error::{Error, Result};
use super::integrand::Integrand;
use super::integrator::{CommonParameters, Integrator};
use super::limits::Limits;
use super::params::{ParameterBag, Value};
use super::registry::Buildable;
use super::schema::ParametersDescription;
use ndarray::Array2;
use rand::Rng;
use rand_pcg::Pcg64;
use tracing::{debug, info, warn};

/// Number of adaptive bins per dimension once the grid is fully resolved.
const BINS_MAX: usize = 50;

#[allow(clippy::cast_precision_loss)]
const fn as_f64(x: usize) -> f64 {
    x as f64
}

/// The adaptive state of one Vegas integration: per-dimension bin edges in
/// [0, 1], the importance histogram accumulated over one iteration, and the
/// weighted-average bookkeeping across iterations.
pub struct VegasState {
    dim: usize,
    bins: usize,
    alpha: f64,
    iterations: usize,
    /// Bin edges; row `k` holds the `k`-th edge of every dimension.
    xi: Array2<f64>,
    xin: Vec<f64>,
    weight: Vec<f64>,
    d: Array2<f64>,
    // weighted-average accumulators, reset at each integration call
    wtd_int_sum: f64,
    sum_wgts: f64,
    chi_sum: f64,
    chisq: f64,
    samples: usize,
    it_num: usize,
    trained: bool,
}

impl VegasState {
    /// Allocates a state for `dim` dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integration`] for a zero-dimensional request.
    pub fn new(dim: usize, alpha: f64, iterations: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::Integration(
                "cannot allocate a zero-dimensional Vegas state".to_owned(),
            ));
        }
        Ok(Self {
            dim,
            bins: 1,
            alpha,
            iterations: iterations.max(1),
            xi: Array2::zeros((BINS_MAX + 1, dim)),
            xin: vec![0.0; BINS_MAX + 1],
            weight: vec![0.0; BINS_MAX],
            d: Array2::zeros((BINS_MAX, dim)),
            wtd_int_sum: 0.0,
            sum_wgts: 0.0,
            chi_sum: 0.0,
            chisq: 0.0,
            samples: 0,
            it_num: 0,
            trained: false,
        })
    }

    /// Number of resolved bins per dimension.
    #[must_use]
    pub const fn bins(&self) -> usize {
        self.bins
    }

    /// Number of dimensions.
    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    /// Bin edge `k` of dimension `j`, in [0, 1].
    #[must_use]
    pub fn coord(&self, k: usize, j: usize) -> f64 {
        self.xi[[k, j]]
    }

    /// χ² per degree of freedom of the last integration call.
    #[must_use]
    pub const fn chisq_per_dof(&self) -> f64 {
        self.chisq
    }

    fn init_grid(&mut self) {
        self.bins = 1;
        for j in 0..self.dim {
            self.xi[[0, j]] = 0.0;
            self.xi[[1, j]] = 1.0;
        }
    }

    /// Runs one integration call of [`Self::iterations`] iterations with
    /// `calls` evaluations each, refining the grid after every iteration.
    /// The first call on a fresh state initialises (and thereby trains) the
    /// grid; subsequent calls keep the grid and restart the weighted-average
    /// accumulation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integration`] when the accumulated estimate turns
    /// non-finite.
    pub fn integrate<F, R>(
        &mut self,
        f: &mut F,
        lo: &[f64],
        hi: &[f64],
        calls: usize,
        rng: &mut R,
    ) -> Result<(f64, f64)>
    where
        F: FnMut(&[f64]) -> f64,
        R: Rng,
    {
        assert_eq!(lo.len(), self.dim);
        assert_eq!(hi.len(), self.dim);
        if !self.trained {
            self.init_grid();
        }
        self.wtd_int_sum = 0.0;
        self.sum_wgts = 0.0;
        self.chi_sum = 0.0;
        self.chisq = 0.0;
        self.samples = 0;
        if self.bins != BINS_MAX {
            self.resize_grid(BINS_MAX);
        }

        let calls = calls.max(2);
        let calls_f = as_f64(calls);
        let volume: f64 = lo.iter().zip(hi).map(|(l, h)| h - l).product();
        #[allow(clippy::cast_possible_truncation)]
        let jacobian = volume * as_f64(self.bins).powi(self.dim as i32) / calls_f;

        let mut x = vec![0.0; self.dim];
        let mut bin_of = vec![0_usize; self.dim];
        let mut cum_int = 0.0;
        let mut cum_sig = 0.0;

        for it in 0..self.iterations {
            self.it_num += 1;
            self.d.fill(0.0);
            let mut intgrl = 0.0;
            let mut tss = 0.0;

            for _ in 0..calls {
                let mut bin_volume = 1.0;
                for j in 0..self.dim {
                    let z = rng.gen::<f64>() * as_f64(self.bins);
                    #[allow(clippy::cast_possible_truncation)]
                    #[allow(clippy::cast_sign_loss)]
                    let k = (z as usize).min(self.bins - 1);
                    let offset = z - as_f64(k);
                    let edge = self.xi[[k, j]];
                    let width = self.xi[[k + 1, j]] - edge;
                    let y = offset.mul_add(width, edge);
                    x[j] = (hi[j] - lo[j]).mul_add(y, lo[j]);
                    bin_volume *= width;
                    bin_of[j] = k;
                }
                let fval = jacobian * bin_volume * f(&x);
                intgrl += fval;
                tss = fval.mul_add(fval, tss);
                for j in 0..self.dim {
                    self.d[[bin_of[j], j]] += fval * fval;
                }
            }

            let variance = tss.mul_add(calls_f, -(intgrl * intgrl)) / (calls_f - 1.0);
            let wgt = if variance > 0.0 {
                1.0 / variance
            } else if self.sum_wgts > 0.0 {
                self.sum_wgts / as_f64(self.samples)
            } else {
                0.0
            };

            if wgt > 0.0 {
                self.samples += 1;
                self.sum_wgts += wgt;
                self.wtd_int_sum += intgrl * wgt;
                self.chi_sum += intgrl * intgrl * wgt;
                cum_int = self.wtd_int_sum / self.sum_wgts;
                cum_sig = self.sum_wgts.recip().sqrt();
                if self.samples > 1 {
                    self.chisq = ((self.chi_sum - self.wtd_int_sum * cum_int)
                        / (as_f64(self.samples) - 1.0))
                        .max(0.0);
                }
            } else {
                cum_int += (intgrl - cum_int) / as_f64(it + 1);
                cum_sig = 0.0;
            }
            debug!(
                iteration = self.it_num,
                estimate = intgrl,
                sigma = variance.max(0.0).sqrt(),
                cumulative = cum_int,
                "Vegas iteration finished"
            );
            self.refine_grid();
        }

        if !cum_int.is_finite() {
            return Err(Error::Integration(
                "Vegas accumulated a non-finite estimate".to_owned(),
            ));
        }
        self.trained = true;
        Ok((cum_int, cum_sig))
    }

    /// Redistributes the current grid into `bins` equal-probability bins.
    fn resize_grid(&mut self, bins: usize) {
        let pts_per_bin = as_f64(self.bins) / as_f64(bins);
        for j in 0..self.dim {
            let mut xnew = 0.0;
            let mut dw = 0.0;
            let mut i = 1;
            for k in 1..=self.bins {
                dw += 1.0;
                let xold = xnew;
                xnew = self.xi[[k, j]];
                while dw > pts_per_bin {
                    dw -= pts_per_bin;
                    self.xin[i] = (xnew - xold).mul_add(-dw, xnew);
                    i += 1;
                }
            }
            for k in 1..bins {
                self.xi[[k, j]] = self.xin[k];
            }
            self.xi[[bins, j]] = 1.0;
        }
        self.bins = bins;
    }

    /// Smooths the importance histogram and moves the bin edges so that each
    /// bin carries an equal share of the damped weight.
    fn refine_grid(&mut self) {
        let bins = self.bins;
        for j in 0..self.dim {
            // smooth the histogram: d[i] <- (d[i-1] + d[i] + d[i+1]) / 3
            let mut oldg = self.d[[0, j]];
            let mut newg = self.d[[1, j]];
            self.d[[0, j]] = 0.5 * (oldg + newg);
            let mut grid_total = self.d[[0, j]];
            for i in 1..bins - 1 {
                let rc = oldg + newg;
                oldg = newg;
                newg = self.d[[i + 1, j]];
                self.d[[i, j]] = (rc + newg) / 3.0;
                grid_total += self.d[[i, j]];
            }
            self.d[[bins - 1, j]] = 0.5 * (newg + oldg);
            grid_total += self.d[[bins - 1, j]];

            let mut tot_weight = 0.0;
            for i in 0..bins {
                self.weight[i] = 0.0;
                let value = self.d[[i, j]];
                if value > 0.0 {
                    let ratio = grid_total / value;
                    self.weight[i] = if ratio > 1.0 + 1e-13 {
                        ((ratio - 1.0) / (ratio * ratio.ln())).powf(self.alpha)
                    } else {
                        1.0
                    };
                }
                tot_weight += self.weight[i];
            }
            if tot_weight <= 0.0 {
                // the iteration brought no information for this dimension
                continue;
            }

            let pts_per_bin = tot_weight / as_f64(bins);
            let mut xnew = 0.0;
            let mut dw = 0.0;
            let mut i = 1;
            for k in 0..bins {
                dw += self.weight[k];
                let xold = xnew;
                xnew = self.xi[[k + 1, j]];
                while dw > pts_per_bin {
                    dw -= pts_per_bin;
                    self.xin[i] = ((xnew - xold) / self.weight[k]).mul_add(-dw, xnew);
                    i += 1;
                }
            }
            for k in 1..bins {
                self.xi[[k, j]] = self.xin[k];
            }
            self.xi[[bins, j]] = 1.0;
        }
    }
}

/// The Vegas-family integrator module: one fixed-call warmup training the
/// histogram, then χ²-gated refinement batches, retaining the trained state
/// for the generation stage.
pub struct VegasIntegrator {
    common: CommonParameters,
    iterations: usize,
    alpha: f64,
    chisq_cut: f64,
    max_refinements: usize,
    warmup_calls: usize,
    treat_enabled: bool,
    rng: Pcg64,
    state: Option<VegasState>,
}

impl Buildable for VegasIntegrator {
    fn description() -> ParametersDescription {
        let mut desc = ParametersDescription::new(
            "Vegas adaptive importance-sampling integrator",
        );
        desc.add("ncvg", 100_000_i64, "number of function calls per refinement batch")
            .add("seed", 0_i64, "RNG seed (0 draws a fresh one)")
            .add("iterations", 10_i64, "iterations per integration call")
            .add("alpha", 1.5, "grid damping parameter")
            .add("chiSqCut", 1.5, "maximal distance of chi2/dof from unity, plus one")
            .add("maxRefinements", 50_i64, "hard cap on refinement batches")
            .add("warmupCalls", 25_000_i64, "function calls of the warmup batch")
            .add("treat", true, "smooth the generation phase space over the trained grid")
            .add("mode", "importance", "grid interpolation mode")
            .restrict(
                "mode",
                vec![
                    Value::Str("importance".to_owned()),
                    Value::Str("importanceOnly".to_owned()),
                    Value::Str("stratified".to_owned()),
                ],
            );
        desc
    }

    fn from_bag(params: &ParameterBag) -> Result<Self> {
        let common = CommonParameters::from_bag(params)?;
        let mode: String = params.get_or("mode", "importance".to_owned())?;
        if mode == "stratified" {
            warn!("stratified sampling is not resolved; falling back to importance sampling");
        }
        let rng = common.rng();
        Ok(Self {
            common,
            iterations: params.get_or("iterations", 10_usize)?,
            alpha: params.get_or("alpha", 1.5)?,
            chisq_cut: params.get_or("chiSqCut", 1.5)?,
            max_refinements: params.get_or("maxRefinements", 50_usize)?,
            warmup_calls: params.get_or("warmupCalls", 25_000_usize)?,
            treat_enabled: params.get_or("treat", true)?,
            rng,
            state: None,
        })
    }
}

impl Integrator for VegasIntegrator {
    fn name(&self) -> &str {
        "Vegas"
    }

    fn set_limits(&mut self, limits: Vec<Limits>) {
        self.common.limits = limits;
    }

    fn integrate(&mut self, integrand: &mut Integrand) -> Result<(f64, f64)> {
        let ndim = integrand.ndim();
        let (lo, hi) = self.common.bounds(ndim)?;
        let mut state = VegasState::new(ndim, self.alpha, self.iterations)?;
        let mut f = |x: &[f64]| integrand.eval(x);

        // warmup batch trains the histogram
        state.integrate(&mut f, &lo, &hi, self.warmup_calls, &mut self.rng)?;
        info!(calls = self.warmup_calls, "finished the Vegas warm-up");

        #[allow(clippy::cast_possible_truncation)]
        #[allow(clippy::cast_sign_loss)]
        let refine_calls = (0.2 * as_f64(self.common.ncvg)) as usize;
        let mut batch = 0_usize;
        let mut result = 0.0;
        let mut abserr = 0.0;
        loop {
            batch += 1;
            (result, abserr) = state.integrate(&mut f, &lo, &hi, refine_calls, &mut self.rng)?;
            info!(
                batch,
                "average = {result:10.6} sigma = {abserr:10.6} chi2 = {:4.3}",
                state.chisq_per_dof()
            );
            if (state.chisq_per_dof() - 1.0).abs() <= self.chisq_cut - 1.0 {
                break;
            }
            if batch >= self.max_refinements {
                return Err(Error::Integration(format!(
                    "chi2/dof = {} failed to settle within {} of unity after {batch} batches",
                    state.chisq_per_dof(),
                    self.chisq_cut - 1.0
                )));
            }
        }
        debug!(
            bins = state.bins(),
            dim = state.dim(),
            "retaining the trained Vegas grid"
        );
        self.state = Some(state);
        Ok((result, abserr))
    }

    fn treat(&self, x: &[f64], out: &mut [f64]) -> f64 {
        let Some(state) = self.state.as_ref().filter(|_| self.treat_enabled) else {
            out.copy_from_slice(x);
            return 1.0;
        };
        let bins_f = as_f64(state.bins());
        #[allow(clippy::cast_possible_truncation)]
        let mut weight = bins_f.powi(state.dim() as i32);
        for (j, (&xj, out_j)) in x.iter().zip(out.iter_mut()).enumerate() {
            // locate the surrounding edges and interpolate linearly
            let z = xj * bins_f;
            #[allow(clippy::cast_possible_truncation)]
            #[allow(clippy::cast_sign_loss)]
            let id = (z as usize).min(state.bins() - 1);
            let rel = z - as_f64(id);
            let width = if id == 0 {
                state.coord(1, j)
            } else {
                state.coord(id + 1, j) - state.coord(id, j)
            };
            *out_j = width.mul_add(-(1.0 - rel), state.coord(id + 1, j));
            weight *= width;
        }
        weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn integrate_state(
        f: &mut impl FnMut(&[f64]) -> f64,
        dim: usize,
        batches: usize,
        calls: usize,
    ) -> (f64, f64) {
        let mut state = VegasState::new(dim, 1.5, 5).unwrap();
        let lo = vec![0.0; dim];
        let hi = vec![1.0; dim];
        let mut rng = Pcg64::seed_from_u64(987_654_321);
        let mut result = (0.0, 0.0);
        for _ in 0..batches {
            result = state.integrate(f, &lo, &hi, calls, &mut rng).unwrap();
        }
        result
    }

    #[test]
    fn polynomial_integral_converges() {
        // ∫ (x² + y²) over the unit square = 2/3
        let (value, error) = integrate_state(
            &mut |x: &[f64]| x[0].mul_add(x[0], x[1] * x[1]),
            2,
            3,
            5_000,
        );
        assert!(error > 0.0);
        assert!(
            (value - 2.0 / 3.0).abs() < 5.0 * error.max(1e-4),
            "value {value} error {error}"
        );
    }

    #[test]
    fn peaked_integrand_is_adapted_to() {
        // a narrow Gaussian of known normalisation; plain sampling at this
        // budget would miss it badly
        let width: f64 = 0.01;
        let norm = (2.0 * std::f64::consts::PI).sqrt() * width;
        let mut f = move |x: &[f64]| {
            let u = (x[0] - 0.5) / width;
            (-0.5 * u * u).exp() / norm
        };
        let (value, error) = integrate_state(&mut f, 1, 4, 10_000);
        assert!(
            (value - 1.0).abs() < 5.0 * error.max(5e-3),
            "value {value} error {error}"
        );
    }

    #[test]
    fn grid_edges_stay_sorted_and_bounded() {
        let mut state = VegasState::new(2, 1.5, 4).unwrap();
        let mut rng = Pcg64::seed_from_u64(7);
        let mut f = |x: &[f64]| 1.0 / (0.1 + x[0] * x[1]);
        state
            .integrate(&mut f, &[0.0, 0.0], &[1.0, 1.0], 2_000, &mut rng)
            .unwrap();
        for j in 0..2 {
            assert_eq!(state.coord(0, j), 0.0);
            assert_eq!(state.coord(state.bins(), j), 1.0);
            for k in 0..state.bins() {
                assert!(state.coord(k, j) < state.coord(k + 1, j));
            }
        }
    }
}
