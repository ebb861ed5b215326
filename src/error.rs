//! Error types for the derived-state engine.

use thiserror::Error;

/// Main error type for store and stream operations.
///
/// Variants are cloneable so a terminal failure can be broadcast to every
/// subscriber of a derived stream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("store not initialized: call create_store before dispatching")]
    NotInitialized,

    #[error("store already initialized")]
    AlreadyInitialized,

    #[error("action type already registered: {0}")]
    DuplicateAction(String),

    #[error("path unreachable at '{segment}': {reason}")]
    PathUnreachable { segment: String, reason: String },

    #[error("projection failed: {0}")]
    Projection(String),

    #[error("feature state missing at '{0}'")]
    FeatureStateMissing(String),

    #[error("initial state must be a map to mount features")]
    InvalidStateRoot,

    #[error("dispatch from within a reducer is not allowed")]
    ReentrantDispatch,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
