//! Physics-process contract and the phase-space variable mapping layer
//! turning unit-hypercube coordinates into process kinematics with Jacobian
//! bookkeeping.

use super::error::{Error, Result};
use super::event::Event;
use super::kinematics::Kinematics;
use super::limits::Limits;
use super::params::ParameterBag;
use arrayvec::ArrayVec;
use std::fmt;
use tracing::{debug, warn};

/// Maximal number of integration dimensions handled by the generation chain.
pub const MAX_DIM: usize = 15;

/// Curve used to map one unit-interval coordinate onto a physical variable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mapping {
    /// A linear `dx` mapping.
    Linear,
    /// An exponential mapping; the limits are stored as log-limits.
    Exponential,
    /// A square `dx² = 2x·dx` mapping.
    Square,
    /// A power-law mapping `v = lo·(hi/lo)^u`.
    PowerLaw,
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Linear => "linear",
            Self::Exponential => "exponential",
            Self::Square => "squared",
            Self::PowerLaw => "power-law",
        })
    }
}

/// One variable mapped by a process; owned by its [`PhaseSpace`] for the
/// whole run.
#[derive(Clone, Debug)]
struct MappedVariable {
    description: String,
    limits: Limits,
    mapping: Mapping,
    index: usize,
}

/// The set of integration variables declared by a process, with the point
/// currently probed and the accumulated Jacobian pieces.
#[derive(Clone, Debug, Default)]
pub struct PhaseSpace {
    variables: Vec<MappedVariable>,
    values: Vec<f64>,
    point: ArrayVec<f64, MAX_DIM>,
    base_jacobian: f64,
    point_set: bool,
}

impl PhaseSpace {
    /// An empty mapping with a unit base Jacobian.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_jacobian: 1.0,
            ..Self::default()
        }
    }

    /// Declares one integration variable; declaration order fixes the
    /// dimension index, which is returned as a handle for later value
    /// retrieval.
    ///
    /// An invalid (or absent) user range falls back to `fallback` with an
    /// audit log entry. Exponential limits are converted to (clamped) log
    /// space at declaration time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] when more than [`MAX_DIM`] variables are
    /// declared or a power-law range is not strictly positive.
    pub fn define(
        &mut self,
        mapping: Mapping,
        user_limits: Limits,
        fallback: Limits,
        description: &str,
    ) -> Result<usize> {
        if self.variables.len() == MAX_DIM {
            return Err(Error::Kinematics(format!(
                "cannot map more than {MAX_DIM} integration variables"
            )));
        }
        let mut limits = user_limits;
        if !limits.valid() {
            warn!(
                variable = description,
                fallback = %fallback,
                "variable range could not be retrieved from the user configuration"
            );
            limits = fallback;
        }
        let (limits, jacob_weight) = match mapping {
            Mapping::Linear => (limits, limits.range()),
            Mapping::Square => (limits, 2.0 * limits.range()),
            Mapping::Exponential => {
                // limits are stored as log-limits; zero or absent bounds
                // clamp to e^{±10}
                let log_lo = match limits.min() {
                    Some(lo) if lo != 0.0 => lo.ln().max(-10.0),
                    _ => -10.0,
                };
                let log_hi = match limits.max() {
                    Some(hi) if hi != 0.0 => hi.ln().min(10.0),
                    _ => 10.0,
                };
                let limits = Limits::new(log_lo, log_hi)?;
                (limits, limits.range())
            }
            Mapping::PowerLaw => {
                let (Some(lo), Some(hi)) = (limits.min(), limits.max()) else {
                    return Err(Error::Kinematics(format!(
                        "power-law mapping for {description} requires both bounds"
                    )));
                };
                if lo <= 0.0 || hi <= 0.0 {
                    return Err(Error::Kinematics(format!(
                        "power-law mapping for {description} requires a positive range, got [{lo}, {hi}]"
                    )));
                }
                (limits, (hi / lo).ln())
            }
        };
        let index = self.variables.len();
        let description = if description.is_empty() {
            format!("var{index}")
        } else {
            description.to_owned()
        };
        debug!(
            variable = description.as_str(),
            index,
            mapping = %mapping,
            range = %limits,
            jacobian_weight = jacob_weight,
            "mapped a new integration variable"
        );
        self.variables.push(MappedVariable {
            description,
            limits,
            mapping,
            index,
        });
        self.values.push(0.0);
        self.base_jacobian *= jacob_weight;
        Ok(index)
    }

    /// Number of declared variables.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.variables.len()
    }

    /// Point-independent Jacobian, accumulated over declarations.
    #[must_use]
    pub const fn base_jacobian(&self) -> f64 {
        self.base_jacobian
    }

    /// Stores the hypercube point to probe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] on a dimension mismatch.
    pub fn set_point(&mut self, x: &[f64]) -> Result<()> {
        if x.len() != self.variables.len() {
            return Err(Error::Kinematics(format!(
                "phase space point has dimension {}, expected {}",
                x.len(),
                self.variables.len()
            )));
        }
        self.point.clear();
        self.point.try_extend_from_slice(x).map_err(|_| {
            Error::Kinematics(format!("point dimension exceeds the {MAX_DIM} maximum"))
        })?;
        self.point_set = true;
        Ok(())
    }

    /// Hypercube coordinate of one dimension.
    #[must_use]
    pub fn x(&self, index: usize) -> f64 {
        self.point.get(index).copied().unwrap_or(-1.0)
    }

    /// Maps every declared variable for the current point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] when no variable is mapped, no point is
    /// set, or the base Jacobian vanished.
    pub fn generate(&mut self) -> Result<()> {
        if self.variables.is_empty() {
            return Err(Error::Kinematics(
                "no variable is mapped for this process".to_owned(),
            ));
        }
        if !self.point_set {
            return Err(Error::Kinematics(
                "no phase space point was set before variable generation".to_owned(),
            ));
        }
        if self.base_jacobian == 0.0 {
            return Err(Error::Kinematics(
                "point-independent Jacobian is null; check the phase space validity".to_owned(),
            ));
        }
        for var in &self.variables {
            let u = self.point[var.index];
            self.values[var.index] = match var.mapping {
                Mapping::Linear => var.limits.x(u),
                // limits already logarithmic
                Mapping::Exponential => var.limits.x(u).exp(),
                Mapping::Square => var.limits.x(u).powi(2),
                Mapping::PowerLaw => {
                    let (lo, hi) = (var.limits.min().unwrap(), var.limits.max().unwrap());
                    lo * (hi / lo).powf(u)
                }
            };
        }
        Ok(())
    }

    /// Mapped (physical) value of one variable for the current point.
    #[must_use]
    pub fn value(&self, index: usize) -> f64 {
        self.values.get(index).copied().unwrap_or_default()
    }

    /// Point-dependent Jacobian component for the current point.
    #[must_use]
    pub fn point_jacobian(&self) -> f64 {
        self.variables
            .iter()
            .map(|var| match var.mapping {
                Mapping::Linear => 1.0,
                Mapping::Square => self.values[var.index].sqrt(),
                Mapping::Exponential | Mapping::PowerLaw => self.values[var.index],
            })
            .product()
    }

    /// One-line-per-variable listing used by debug printouts.
    #[must_use]
    pub fn dump_variables(&self) -> String {
        self.variables
            .iter()
            .map(|var| {
                format!(
                    "({}) {} mapping ({}) in range {}",
                    var.index, var.mapping, var.description, var.limits
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The contract every physics process fulfils. Kinematics helpers, caches
/// and matrix-element evaluators are members of the implementors, not
/// ancestors; the virtual surface stays small.
pub trait Process: Send {
    /// Unique name of the process.
    fn name(&self) -> &str;

    /// Parameters the process was built from.
    fn parameters(&self) -> &ParameterBag;

    /// Read access to the mapped phase space.
    fn phase_space(&self) -> &PhaseSpace;

    /// Write access to the mapped phase space.
    fn phase_space_mut(&mut self) -> &mut PhaseSpace;

    /// The event this process populates, if it carries one.
    fn event(&self) -> Option<&Event> {
        None
    }

    /// Mutable access to the populated event.
    fn event_mut(&mut self) -> Option<&mut Event> {
        None
    }

    /// Populates the event with the canonical particle roster.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Event`] when the roster cannot be built.
    fn add_event_content(&mut self) -> Result<()> {
        Ok(())
    }

    /// Declares the integration variables for the configured incoming state;
    /// declaration order fixes the dimension indices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] when the phase space is empty or
    /// ill-defined.
    fn prepare_kinematics(&mut self, kinematics: &Kinematics) -> Result<()>;

    /// Weight of the current point, without Jacobian factors; zero rejects
    /// the point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] on an invariant violation.
    fn compute_weight(&mut self) -> Result<f64>;

    /// Writes the final-state four-momenta into the event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Event`] when the event cannot be populated.
    fn fill_kinematics(&mut self, symmetrise: bool) -> Result<()>;

    /// Independent copy for a parallel worker.
    fn clone_box(&self) -> Box<dyn Process>;

    /// Number of dimensions of the integrand.
    fn ndim(&self) -> usize {
        self.phase_space().ndim()
    }

    /// Full (Jacobian-weighted) evaluation at a hypercube point.
    ///
    /// # Errors
    ///
    /// Propagates mapping and weight-computation failures.
    fn weight(&mut self, x: &[f64]) -> Result<f64> {
        self.phase_space_mut().set_point(x)?;
        self.phase_space_mut().generate()?;
        let weight = self.compute_weight()?;
        if weight <= 0.0 {
            return Ok(0.0);
        }
        let ps = self.phase_space();
        Ok(ps.base_jacobian() * ps.point_jacobian() * weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rand::Rng;
    use rand_pcg::Pcg64;
    use rand::SeedableRng;

    #[test]
    fn declaration_order_fixes_indices() {
        let mut ps = PhaseSpace::new();
        let a = ps
            .define(Mapping::Linear, Limits::new(0.0, 2.0).unwrap(), Limits::default(), "a")
            .unwrap();
        let b = ps
            .define(Mapping::Linear, Limits::new(-1.0, 1.0).unwrap(), Limits::default(), "b")
            .unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(ps.ndim(), 2);
        assert_approx_eq!(f64, ps.base_jacobian(), 4.0, ulps = 2);
    }

    #[test]
    fn invalid_limits_fall_back() {
        let mut ps = PhaseSpace::new();
        ps.define(
            Mapping::Linear,
            Limits::none(),
            Limits::new(0.5, 1.5).unwrap(),
            "fallback test",
        )
        .unwrap();
        ps.set_point(&[0.0]).unwrap();
        ps.generate().unwrap();
        assert_approx_eq!(f64, ps.value(0), 0.5, ulps = 2);
    }

    #[test]
    fn exponential_limits_are_clamped_in_log_space() {
        let mut ps = PhaseSpace::new();
        ps.define(
            Mapping::Exponential,
            Limits::at_most(1.0),
            Limits::default(),
            "q2",
        )
        .unwrap();
        ps.set_point(&[0.0]).unwrap();
        ps.generate().unwrap();
        assert_approx_eq!(f64, ps.value(0), (-10.0_f64).exp(), epsilon = 1e-12);
        ps.set_point(&[1.0]).unwrap();
        ps.generate().unwrap();
        assert_approx_eq!(f64, ps.value(0), 1.0, epsilon = 1e-12);
    }

    // whatever the mapping, the Monte Carlo mean of the Jacobian-weighted
    // unit integrand recovers the plain range hi − lo
    #[test]
    fn mappings_do_not_bias_the_integral() {
        let cases = [
            (Mapping::Linear, Limits::new(1.0, 4.0).unwrap()),
            (Mapping::Square, Limits::new(1.0, 2.0).unwrap()),
            (Mapping::Exponential, Limits::new(0.1, 10.0).unwrap()),
            (Mapping::PowerLaw, Limits::new(0.1, 10.0).unwrap()),
        ];
        let mut rng = Pcg64::seed_from_u64(42);
        for (mapping, limits) in cases {
            let mut ps = PhaseSpace::new();
            ps.define(mapping, limits, Limits::default(), "v").unwrap();
            let samples = 200_000;
            let mean = (0..samples)
                .map(|_| {
                    ps.set_point(&[rng.gen::<f64>()]).unwrap();
                    ps.generate().unwrap();
                    ps.base_jacobian() * ps.point_jacobian()
                })
                .sum::<f64>()
                / f64::from(samples);
            let expected = match mapping {
                // the squared mapping integrates dv over the *squared* range
                Mapping::Square => {
                    limits.max().unwrap().powi(2) - limits.min().unwrap().powi(2)
                }
                _ => limits.range(),
            };
            let tolerance = 0.02 * expected.abs();
            assert!(
                (mean - expected).abs() < tolerance,
                "{mapping}: mean {mean} vs expected {expected}"
            );
        }
    }
}
