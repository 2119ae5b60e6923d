//! Error types for the bay state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional write found the record in an unexpected state, or an
    /// insert collided with an existing key.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A baymodel is still referenced by at least one bay.
    #[error("baymodel {baymodel} is referenced by {bays} bay(s)")]
    InUse { baymodel: String, bays: usize },
}
