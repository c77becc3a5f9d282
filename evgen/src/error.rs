//! Error taxonomy for the whole crate.

use thiserror::Error;

/// All fatal failure modes of a run. Evaluation-level problems (a taming
/// function or modifier failing on a single phase-space point) are not
/// represented here: they zero the weight of the offending point and are
/// logged instead of propagated.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown module name, type mismatch, invalid limits or missing required
    /// key. Raised at load/build time; carries the offending key path.
    #[error("configuration error at `{path}`: {reason}")]
    Configuration {
        /// Key (or dotted key path) that triggered the failure.
        path: String,
        /// Explanation of the failure.
        reason: String,
    },
    /// Limits leaving an empty phase space, or an invariant violation in the
    /// particle content.
    #[error("kinematics error: {0}")]
    Kinematics(String),
    /// Non-success outcome of an integration primitive, or a failure of the
    /// refinement loop to converge.
    #[error("integration error: {0}")]
    Integration(String),
    /// Structural misuse of an event record (frozen-event mutation, dangling
    /// parentage, missing role).
    #[error("event error: {0}")]
    Event(String),
    /// Failure in the unweighted generation machinery.
    #[error("generation error: {0}")]
    Generation(String),
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Shortcut for a [`Error::Configuration`] with a formatted reason.
    pub fn config(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias used across this crate.
pub type Result<T> = std::result::Result<T, Error>;
