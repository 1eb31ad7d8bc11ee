use thiserror::Error;

use crate::tape::NodeId;

/// Errors raised by the tape surface. Every failure is fatal for the call
/// that produced it; the tape performs no partial-failure recovery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TapeError {
    /// A node identifier was looked up that is not present in the store.
    #[error("unknown node {index}")]
    UnknownNode { index: NodeId },

    /// `dec_ref` was called on a node whose reference count is already zero.
    #[error("node {index} has zero references")]
    UseAfterFree { index: NodeId },

    /// Gradient access through the null identifier. The variable was never
    /// marked as requiring gradients.
    #[error("no gradient was computed for this variable (a prior call to requires_gradient() is necessary)")]
    NoGradient,

    /// `pop_prefix` was called with no matching `push_prefix`.
    #[error("pop_prefix(): prefix stack is already empty")]
    PrefixUnderflow,
}

pub type TapeResult<T> = Result<T, TapeError>;
