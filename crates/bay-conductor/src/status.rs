//! Mapping backend stack statuses onto bay statuses.

use bay_stack::StackStatus;
use bay_state::{BayStatus, Operation};

/// What a reported stack status means for a bay whose operation is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMapping {
    /// The backend is still working on the same operation.
    InProgress,
    Complete(BayStatus),
    Failed(BayStatus),
    /// Deletion confirmed; the bay record goes away.
    Purge,
    /// A status with no meaning for this operation (rollbacks, other families).
    Unmapped,
}

/// Map `reported` within the operation family of the bay's current status.
pub fn map_stack_status(operation: Operation, reported: &StackStatus) -> StatusMapping {
    use StackStatus as S;
    match (operation, reported) {
        (Operation::Create, S::CreateInProgress)
        | (Operation::Update, S::UpdateInProgress)
        | (Operation::Delete, S::DeleteInProgress) => StatusMapping::InProgress,

        (Operation::Create, S::CreateComplete) | (Operation::Update, S::UpdateComplete) => {
            StatusMapping::Complete(operation.complete())
        }
        (Operation::Delete, S::DeleteComplete) => StatusMapping::Purge,

        (Operation::Create, S::CreateFailed)
        | (Operation::Update, S::UpdateFailed)
        | (Operation::Delete, S::DeleteFailed) => StatusMapping::Failed(operation.failed()),

        _ => StatusMapping::Unmapped,
    }
}

/// Make a backend-supplied reason safe to store: control characters become
/// spaces and the result is cut to `max_len` characters.
pub fn sanitize_reason(reason: &str, max_len: usize) -> String {
    let cleaned: String = reason
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    cleaned.trim().chars().take(max_len).collect()
}
