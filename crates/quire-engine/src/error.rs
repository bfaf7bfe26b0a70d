use thiserror::Error;

use crate::ids::NodeId;

/// Precondition violations raised by the edit pipeline.
///
/// Every variant means a command or caller built something invalid (or a
/// tree got corrupted). The pipeline aborts the operation that raised it
/// and leaves the token buffer as it was.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditorError {
    #[error("offset {offset} is out of range (length {len})")]
    OffsetOutOfRange { offset: usize, len: usize },

    #[error("range {from}..{to} is out of range (length {len})")]
    RangeOutOfRange { from: usize, to: usize, len: usize },

    #[error("token stream is not well nested: {0}")]
    Malformed(String),

    #[error("node type `{0}` is not registered")]
    UnregisteredType(String),

    #[error("structural violation: {0}")]
    Structure(String),

    #[error("node {0} does not exist in this tree")]
    UnknownNode(NodeId),

    #[error("node {0} already exists in this tree")]
    DuplicateId(NodeId),

    #[error("node handle does not belong to this tree")]
    StaleKey,

    #[error("cannot reconcile live node {live} against rebuilt node {updated}")]
    ReconcileMismatch { live: NodeId, updated: NodeId },

    #[error("cannot split {0}")]
    NotSplittable(String),
}

pub type Result<T> = std::result::Result<T, EditorError>;
