//! Conductor error taxonomy.

use bay_core::ValidationError;
use bay_stack::StackError;
use bay_state::StateError;
use bay_template::TemplateError;
use thiserror::Error;

pub type ConductorResult<T> = Result<T, ConductorError>;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("{0} not found")]
    NotFound(String),

    /// The record changed underneath the caller, or a name matched more
    /// than one record.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    Validation(String),

    /// The stack service could not take the request; retrying may succeed.
    #[error("stack service unavailable: {0}")]
    BackendTransient(String),

    #[error("stack service rejected the operation: {0}")]
    BackendPermanent(String),

    #[error("state store: {0}")]
    State(StateError),
}

impl From<StateError> for ConductorError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => ConductorError::NotFound(what),
            StateError::Conflict(msg) => ConductorError::Conflict(msg),
            e @ StateError::InUse { .. } => ConductorError::Validation(e.to_string()),
            other => ConductorError::State(other),
        }
    }
}

impl From<ValidationError> for ConductorError {
    fn from(e: ValidationError) -> Self {
        ConductorError::Validation(e.to_string())
    }
}

impl From<TemplateError> for ConductorError {
    fn from(e: TemplateError) -> Self {
        ConductorError::Validation(e.to_string())
    }
}

impl From<StackError> for ConductorError {
    fn from(e: StackError) -> Self {
        if e.is_transient() {
            ConductorError::BackendTransient(e.to_string())
        } else {
            ConductorError::BackendPermanent(e.to_string())
        }
    }
}
