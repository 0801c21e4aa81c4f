//! Error taxonomy shared by every component.
//!
//! Recoverable conditions (bad configuration, mismatched shapes, unknown
//! axes, unmapped components) are reported through [`Error`]. Protocol
//! violations such as handing a layer somebody else's fprop state are not
//! represented here: they panic.

use crate::mapping::ComponentId;
use crate::space::Axis;

/// Errors returned by layers, spaces and the component registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A constructor argument was rejected.
    #[error("invalid configuration for {component}: {reason}")]
    Configuration {
        component: &'static str,
        reason: String,
    },
    /// The number of axis names does not match the tensor rank.
    #[error("space names {axes} axes but the tensor has rank {rank}")]
    Shape { axes: usize, rank: usize },
    /// A requested axis is absent, or an axis with extent > 1 would be dropped.
    #[error("axis `{0}` cannot be resolved in this space")]
    Axis(Axis),
    /// An axis name appears more than once.
    #[error("axis `{0}` appears more than once")]
    DuplicateAxis(Axis),
    /// Two arrays that must agree in size do not.
    #[error("{context}: expected shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// The component has no analog on the requested backend.
    #[error("no analog registered for {0}")]
    NotFound(ComponentId),
    /// A token index is not an integer inside the vocabulary.
    #[error("token index {index} is outside the vocabulary of size {vocabulary_size}")]
    InvalidIndex { index: f64, vocabulary_size: usize },
}

/// Shorthand used across the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

impl Error {
    pub(crate) fn config(component: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            component,
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(
        context: &'static str,
        expected: impl Into<Vec<usize>>,
        found: impl Into<Vec<usize>>,
    ) -> Self {
        Self::ShapeMismatch {
            context,
            expected: expected.into(),
            found: found.into(),
        }
    }
}
