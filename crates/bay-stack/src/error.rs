//! Stack service error types.

use std::time::Duration;

use thiserror::Error;

pub type StackResult<T> = Result<T, StackError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// The backend could not be reached or refused service; the request
    /// was not accepted.
    #[error("stack service unavailable: {0}")]
    Unavailable(String),

    /// No response within the request bound; the request may or may not
    /// have been applied.
    #[error("stack service request timed out after {0:?}")]
    Timeout(Duration),

    /// The exchange broke after the request was sent.
    #[error("stack service request interrupted: {0}")]
    Interrupted(String),

    /// The backend rejected the request (bad template, quota, auth).
    #[error("stack service rejected request: {0}")]
    Rejected(String),

    #[error("stack not found: {0}")]
    NotFound(String),
}

impl StackError {
    /// Retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StackError::Unavailable(_) | StackError::Timeout(_) | StackError::Interrupted(_)
        )
    }

    /// The backend may have applied the request even though we got no answer.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, StackError::Timeout(_) | StackError::Interrupted(_))
    }
}
