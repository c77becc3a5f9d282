//! Numerical constants shared by the process implementations.

/// Conversion factor from GeV⁻² to picobarns.
pub const GEV2_TO_PB: f64 = 0.389_379_338e9;
