//! The stack service contract.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bay_template::StackDefinition;
use serde::Serialize;

use crate::error::StackResult;

/// Status reported by the backend for a stack.
///
/// Anything outside the nine create/update/delete states (rollbacks,
/// suspends, checks) is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum StackStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    UpdateInProgress,
    UpdateComplete,
    UpdateFailed,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
    Other(String),
}

impl StackStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "CREATE_IN_PROGRESS" => StackStatus::CreateInProgress,
            "CREATE_COMPLETE" => StackStatus::CreateComplete,
            "CREATE_FAILED" => StackStatus::CreateFailed,
            "UPDATE_IN_PROGRESS" => StackStatus::UpdateInProgress,
            "UPDATE_COMPLETE" => StackStatus::UpdateComplete,
            "UPDATE_FAILED" => StackStatus::UpdateFailed,
            "DELETE_IN_PROGRESS" => StackStatus::DeleteInProgress,
            "DELETE_COMPLETE" => StackStatus::DeleteComplete,
            "DELETE_FAILED" => StackStatus::DeleteFailed,
            other => StackStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StackStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            StackStatus::CreateComplete => "CREATE_COMPLETE",
            StackStatus::CreateFailed => "CREATE_FAILED",
            StackStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            StackStatus::UpdateComplete => "UPDATE_COMPLETE",
            StackStatus::UpdateFailed => "UPDATE_FAILED",
            StackStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            StackStatus::DeleteComplete => "DELETE_COMPLETE",
            StackStatus::DeleteFailed => "DELETE_FAILED",
            StackStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stack as last reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackInfo {
    /// Identifier accepted by every other operation.
    pub id: String,
    pub name: String,
    pub status: StackStatus,
    pub reason: Option<String>,
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl StackInfo {
    /// An output as a single string, if present and scalar.
    pub fn output_string(&self, key: &str) -> Option<String> {
        match self.outputs.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// An output as a list of strings. A scalar becomes a one-element list.
    pub fn output_list(&self, key: &str) -> Vec<String> {
        match self.outputs.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            Some(_) => self.output_string(key).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

/// Operations on the external orchestration backend.
///
/// Implementations are shared (`Arc<dyn StackService>`) and must be
/// reentrant; callers hold no locks around them.
#[async_trait]
pub trait StackService: Send + Sync {
    /// Submit a new stack. Returns the identifier of the accepted stack.
    async fn create_stack(
        &self,
        name: &str,
        definition: &StackDefinition,
        timeout_mins: u32,
    ) -> StackResult<String>;

    /// Replace a stack's template and parameters.
    async fn update_stack(&self, stack_id: &str, definition: &StackDefinition) -> StackResult<()>;

    /// Delete a stack. A stack that does not exist counts as deleted.
    async fn delete_stack(&self, stack_id: &str) -> StackResult<()>;

    /// Current status of a stack, looked up by identifier or by name.
    async fn get_stack(&self, stack_id_or_name: &str) -> StackResult<StackInfo>;
}
