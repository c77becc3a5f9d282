//! Validity ranges for kinematic quantities and integration variables.

use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(lo, hi)` pair with either bound possibly absent.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Limits {
    min: Option<f64>,
    max: Option<f64>,
}

impl Limits {
    /// Constructs a fully bounded range. An inverted ordering is a
    /// construction-time error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] if `min > max`.
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if min > max {
            return Err(Error::Kinematics(format!(
                "invalid limits ordering: {min} > {max}"
            )));
        }
        Ok(Self {
            min: Some(min),
            max: Some(max),
        })
    }

    /// A range bounded from below only.
    #[must_use]
    pub const fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    /// A range bounded from above only.
    #[must_use]
    pub const fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// A range with no constraint at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    /// Lower bound, if set.
    #[must_use]
    pub const fn min(&self) -> Option<f64> {
        self.min
    }

    /// Upper bound, if set.
    #[must_use]
    pub const fn max(&self) -> Option<f64> {
        self.max
    }

    /// Does this range carry a lower bound?
    #[must_use]
    pub const fn has_min(&self) -> bool {
        self.min.is_some()
    }

    /// Does this range carry an upper bound?
    #[must_use]
    pub const fn has_max(&self) -> bool {
        self.max.is_some()
    }

    /// A range is valid (usable as an integration range) when both bounds are
    /// present and ordered with a non-empty interior.
    #[must_use]
    pub fn valid(&self) -> bool {
        matches!((self.min, self.max), (Some(lo), Some(hi)) if lo < hi)
    }

    /// Checks `x` against whichever bounds are present.
    #[must_use]
    pub fn contains(&self, x: f64) -> bool {
        if let Some(lo) = self.min {
            if x < lo {
                return false;
            }
        }
        if let Some(hi) = self.max {
            if x > hi {
                return false;
            }
        }
        true
    }

    /// `hi − lo`; zero whenever either bound is absent.
    #[must_use]
    pub fn range(&self) -> f64 {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => hi - lo,
            _ => 0.0,
        }
    }

    /// Linear interpolation `lo + u·(hi − lo)` for `u` ∈ [0, 1].
    #[must_use]
    pub fn x(&self, u: f64) -> f64 {
        self.min.unwrap_or(0.0) + u * self.range()
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => write!(f, "[{lo}, {hi}]"),
            (Some(lo), None) => write!(f, "above {lo}"),
            (None, Some(hi)) => write!(f, "below {hi}"),
            (None, None) => write!(f, "no cut"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn ordering_is_checked_at_construction() {
        assert!(Limits::new(1.0, 0.0).is_err());
        assert!(Limits::new(0.0, 0.0).is_ok());
    }

    #[test]
    fn interpolation_spans_the_range() {
        let limits = Limits::new(-2.0, 4.0).unwrap();
        assert_approx_eq!(f64, limits.x(0.0), -2.0, ulps = 2);
        assert_approx_eq!(f64, limits.x(0.5), 1.0, ulps = 2);
        assert_approx_eq!(f64, limits.x(1.0), 4.0, ulps = 2);
        assert_approx_eq!(f64, limits.range(), 6.0, ulps = 2);
    }

    #[test]
    fn half_open_ranges_filter_one_side() {
        let lower = Limits::at_least(10.0);
        assert!(!lower.contains(9.9));
        assert!(lower.contains(1e10));
        assert!(!lower.valid());
        assert_approx_eq!(f64, lower.range(), 0.0, ulps = 2);

        let upper = Limits::at_most(2.5);
        assert!(upper.contains(-1e3));
        assert!(!upper.contains(2.6));
    }
}
