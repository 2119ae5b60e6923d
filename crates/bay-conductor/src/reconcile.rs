//! Folding backend stack status back into bay records.

use bay_stack::{StackError, StackInfo};
use bay_state::{Bay, BayFilter, BayStatus, Operation, StateError};
use bay_template::output_keys;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::conductor::{Conductor, epoch_secs};
use crate::status::{StatusMapping, map_stack_status, sanitize_reason};

/// Reason recorded when a create's submission outcome stayed unknown past
/// the grace period.
pub const SUBMISSION_UNCONFIRMED: &str = "stack submission was never confirmed";

/// What reconciling one bay did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The backend is still working; nothing written.
    Unchanged,
    /// A timed-out submission was found by stack name and its id recorded.
    Adopted,
    /// The bay moved to a new status.
    Transitioned(BayStatus),
    /// Deletion confirmed; the record is gone.
    Purged,
    /// The backend reported a status with no mapping; treated as transient.
    Unmapped(String),
    /// The stack service failed; retried next pass.
    Transient(String),
    /// The bay changed between read and write; nothing written.
    Conflict,
    /// The store failed.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BayOutcome {
    pub bay: String,
    pub outcome: ReconcileOutcome,
}

/// Per-bay results of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub outcomes: Vec<BayOutcome>,
    /// Set when listing bays failed and the pass stopped early.
    pub aborted: Option<String>,
}

impl ReconcileReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, bay: &str) -> Option<&ReconcileOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.bay == bay)
            .map(|o| &o.outcome)
    }

    /// Bays whose record was written or removed.
    pub fn changed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o.outcome,
                    ReconcileOutcome::Adopted
                        | ReconcileOutcome::Transitioned(_)
                        | ReconcileOutcome::Purged
                )
            })
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o.outcome,
                    ReconcileOutcome::Transient(_) | ReconcileOutcome::Error(_)
                )
            })
            .count()
    }
}

impl Conductor {
    /// Reconcile every bay with an operation in flight.
    pub async fn reconcile_all(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let filter = BayFilter::in_progress();
        let limit = self.config.api.max_limit;
        let mut marker: Option<String> = None;

        loop {
            let page = match self.store.list_bays(&filter, marker.as_deref(), limit) {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "listing bays for reconciliation failed");
                    report.aborted = Some(e.to_string());
                    break;
                }
            };
            for bay in &page.items {
                let outcome = self.reconcile_bay(bay).await;
                report.outcomes.push(BayOutcome {
                    bay: bay.uuid.clone(),
                    outcome,
                });
            }
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        report
    }

    /// Reconcile one bay against its stack.
    ///
    /// Every write is conditional on the status `bay` was read with.
    pub async fn reconcile_bay(&self, bay: &Bay) -> ReconcileOutcome {
        if !bay.status.is_in_progress() {
            return ReconcileOutcome::Unchanged;
        }
        let outcome = match bay.stack_id {
            Some(ref stack_id) => self.reconcile_stack(bay, stack_id).await,
            None => self.reconcile_unconfirmed(bay).await,
        };
        debug!(bay = %bay.uuid, status = %bay.status, ?outcome, "bay reconciled");
        outcome
    }

    /// A create whose stack id was never recorded: look the stack up by name.
    async fn reconcile_unconfirmed(&self, bay: &Bay) -> ReconcileOutcome {
        if bay.status != BayStatus::CreateInProgress {
            warn!(bay = %bay.uuid, status = %bay.status, "in-progress bay has no stack id");
            return ReconcileOutcome::Unchanged;
        }

        match self.stacks.get_stack(&bay.stack_name).await {
            Ok(info) => {
                let adopted = self.store.compare_and_swap_bay(&bay.uuid, &[bay.status], |b| {
                    if b.stack_id.is_none() {
                        b.stack_id = Some(info.id.clone());
                        b.submission_unconfirmed = false;
                        b.updated_at = epoch_secs();
                    }
                });
                match adopted {
                    Ok(updated) => {
                        info!(bay = %bay.uuid, stack_id = %info.id, "adopted stack found by name");
                        match self.apply_stack_status(&updated, &info) {
                            ReconcileOutcome::Unchanged => ReconcileOutcome::Adopted,
                            other => other,
                        }
                    }
                    Err(e) => store_outcome(&bay.uuid, e),
                }
            }
            Err(StackError::NotFound(_)) => {
                let grace = self.config.submission_grace().as_secs();
                if epoch_secs().saturating_sub(bay.updated_at) < grace {
                    return ReconcileOutcome::Unchanged;
                }
                self.transition(bay, BayStatus::CreateFailed, Some(SUBMISSION_UNCONFIRMED.to_string()))
            }
            Err(e) => transient(bay, e),
        }
    }

    async fn reconcile_stack(&self, bay: &Bay, stack_id: &str) -> ReconcileOutcome {
        match self.stacks.get_stack(stack_id).await {
            Ok(info) => self.apply_stack_status(bay, &info),
            Err(StackError::NotFound(_)) if bay.status.operation() == Operation::Delete => {
                self.purge(bay)
            }
            Err(StackError::NotFound(_)) => {
                let failed = bay.status.operation().failed();
                self.transition(bay, failed, Some(format!("stack {stack_id} not found")))
            }
            Err(e) => transient(bay, e),
        }
    }

    fn apply_stack_status(&self, bay: &Bay, info: &StackInfo) -> ReconcileOutcome {
        let max_len = self.config.conductor.status_reason_max_len;
        match map_stack_status(bay.status.operation(), &info.status) {
            StatusMapping::InProgress => ReconcileOutcome::Unchanged,
            StatusMapping::Complete(next) => {
                let keys = match self.store.get_baymodel(&bay.baymodel_id) {
                    Ok(Some(model)) => Some(output_keys(model.coe)),
                    Ok(None) => None,
                    Err(e) => return store_outcome(&bay.uuid, e),
                };
                let reason = info.reason.as_deref().map(|r| sanitize_reason(r, max_len));
                let written = self.store.compare_and_swap_bay(&bay.uuid, &[bay.status], |b| {
                    b.status = next;
                    b.status_reason = reason;
                    if let Some(keys) = keys {
                        b.api_address = info.output_string(keys.api_address);
                        b.master_addresses = info.output_list(keys.master_addresses);
                        b.node_addresses = info.output_list(keys.node_addresses);
                    }
                    b.updated_at = epoch_secs();
                });
                match written {
                    Ok(updated) => {
                        info!(
                            bay = %bay.uuid,
                            status = %next,
                            api_address = ?updated.api_address,
                            "bay operation complete"
                        );
                        ReconcileOutcome::Transitioned(next)
                    }
                    Err(e) => store_outcome(&bay.uuid, e),
                }
            }
            StatusMapping::Failed(next) => {
                let reason = info
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("stack {} reported {}", info.id, info.status));
                self.transition(bay, next, Some(sanitize_reason(&reason, max_len)))
            }
            StatusMapping::Purge => self.purge(bay),
            StatusMapping::Unmapped => {
                warn!(
                    bay = %bay.uuid,
                    status = %bay.status,
                    stack_status = %info.status,
                    "unmapped stack status, will retry"
                );
                ReconcileOutcome::Unmapped(info.status.to_string())
            }
        }
    }

    fn transition(&self, bay: &Bay, next: BayStatus, reason: Option<String>) -> ReconcileOutcome {
        let written = self.store.compare_and_swap_bay(&bay.uuid, &[bay.status], |b| {
            b.status = next;
            b.status_reason = reason.clone();
            b.updated_at = epoch_secs();
        });
        match written {
            Ok(_) => {
                info!(bay = %bay.uuid, from = %bay.status, status = %next, reason = ?reason, "bay status changed");
                ReconcileOutcome::Transitioned(next)
            }
            Err(e) => store_outcome(&bay.uuid, e),
        }
    }

    fn purge(&self, bay: &Bay) -> ReconcileOutcome {
        match self.store.remove_bay_if(&bay.uuid, &[BayStatus::DeleteInProgress]) {
            Ok(_) => {
                info!(bay = %bay.uuid, "bay deleted");
                ReconcileOutcome::Purged
            }
            Err(e) => store_outcome(&bay.uuid, e),
        }
    }
}

fn transient(bay: &Bay, e: StackError) -> ReconcileOutcome {
    warn!(bay = %bay.uuid, error = %e, "stack status unavailable, will retry");
    ReconcileOutcome::Transient(e.to_string())
}

fn store_outcome(uuid: &str, e: StateError) -> ReconcileOutcome {
    match e {
        StateError::Conflict(_) | StateError::NotFound(_) => {
            warn!(bay = %uuid, reason = %e, "bay changed during reconciliation");
            ReconcileOutcome::Conflict
        }
        other => {
            tracing::error!(bay = %uuid, error = %other, "failed to persist reconciliation");
            ReconcileOutcome::Error(other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bay_core::ConductorConfig;
    use bay_stack::{MemoryStackService, StackOp, StackStatus};
    use bay_state::StateStore;
    use serde_json::json;

    use crate::spec::{BayModelSpec, BaySpec};

    fn conductor_with_model(
        coe: &str,
        distro: &str,
        config: ConductorConfig,
    ) -> (Conductor, Arc<MemoryStackService>) {
        let store = StateStore::open_in_memory().unwrap();
        let stacks = Arc::new(MemoryStackService::new());
        let conductor = Conductor::new(store, stacks.clone(), Arc::new(config));
        conductor
            .create_baymodel(BayModelSpec {
                name: Some("model".to_string()),
                coe: Some(coe.to_string()),
                image_id: Some("img".to_string()),
                keypair_id: Some("default".to_string()),
                cluster_distro: Some(distro.to_string()),
                ..Default::default()
            })
            .unwrap();
        (conductor, stacks)
    }

    async fn setup(coe: &str, distro: &str) -> (Conductor, Arc<MemoryStackService>, Bay) {
        let (conductor, stacks) = conductor_with_model(coe, distro, ConductorConfig::default());
        let bay = conductor
            .create_bay(
                "model",
                BaySpec {
                    name: Some("bay".to_string()),
                    node_count: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (conductor, stacks, bay)
    }

    #[tokio::test]
    async fn complete_copies_outputs() {
        let (conductor, stacks, bay) = setup("kubernetes", "fedora-atomic").await;
        let stack_id = bay.stack_id.clone().unwrap();
        stacks.set_output(&stack_id, "api_address", json!("https://10.0.0.5:6443"));
        stacks.set_output(&stack_id, "kube_masters", json!(["10.0.0.5"]));
        stacks.set_output(&stack_id, "kube_minions_external", json!(["172.24.4.3", "172.24.4.4"]));
        stacks.set_status(&stack_id, StackStatus::CreateComplete, Some("Stack CREATE completed successfully"));

        let outcome = conductor.reconcile_bay(&bay).await;
        assert_eq!(outcome, ReconcileOutcome::Transitioned(BayStatus::CreateComplete));

        let bay = conductor.get_bay(&bay.uuid).unwrap();
        assert_eq!(bay.status, BayStatus::CreateComplete);
        assert_eq!(bay.api_address.as_deref(), Some("https://10.0.0.5:6443"));
        assert_eq!(bay.master_addresses, ["10.0.0.5"]);
        assert_eq!(bay.node_addresses, ["172.24.4.3", "172.24.4.4"]);
    }

    #[tokio::test]
    async fn in_progress_is_idempotent() {
        let (conductor, _, bay) = setup("swarm", "fedora-atomic").await;
        assert_eq!(conductor.reconcile_bay(&bay).await, ReconcileOutcome::Unchanged);
        assert_eq!(conductor.reconcile_bay(&bay).await, ReconcileOutcome::Unchanged);
        assert_eq!(conductor.get_bay(&bay.uuid).unwrap(), bay);
    }

    #[tokio::test]
    async fn failure_reason_is_sanitized() {
        let (conductor, stacks, bay) = setup("swarm", "fedora-atomic").await;
        let stack_id = bay.stack_id.clone().unwrap();
        let noisy = format!("Resource CREATE failed:\n{}", "q".repeat(400));
        stacks.set_status(&stack_id, StackStatus::CreateFailed, Some(&noisy));

        conductor.reconcile_bay(&bay).await;
        let bay = conductor.get_bay(&bay.uuid).unwrap();
        assert_eq!(bay.status, BayStatus::CreateFailed);
        let reason = bay.status_reason.unwrap();
        assert_eq!(reason.chars().count(), 255);
        assert!(!reason.contains('\n'));
    }

    #[tokio::test]
    async fn rollback_is_unmapped() {
        let (conductor, stacks, bay) = setup("swarm", "fedora-atomic").await;
        let stack_id = bay.stack_id.clone().unwrap();
        stacks.set_status(&stack_id, StackStatus::Other("ROLLBACK_IN_PROGRESS".into()), None);

        assert_eq!(
            conductor.reconcile_bay(&bay).await,
            ReconcileOutcome::Unmapped("ROLLBACK_IN_PROGRESS".to_string())
        );
        assert_eq!(conductor.get_bay(&bay.uuid).unwrap().status, BayStatus::CreateInProgress);
    }

    #[tokio::test]
    async fn missing_stack_fails_create() {
        let (conductor, stacks, bay) = setup("swarm", "fedora-atomic").await;
        let stack_id = bay.stack_id.clone().unwrap();
        stacks.forget(&stack_id);

        conductor.reconcile_bay(&bay).await;
        let bay = conductor.get_bay(&bay.uuid).unwrap();
        assert_eq!(bay.status, BayStatus::CreateFailed);
        assert_eq!(bay.status_reason, Some(format!("stack {stack_id} not found")));
    }

    #[tokio::test]
    async fn transient_errors_change_nothing() {
        let (conductor, stacks, bay) = setup("mesos", "ubuntu").await;
        stacks.fail_next(StackOp::Get, StackError::Unavailable("refused".into()));

        assert!(matches!(
            conductor.reconcile_bay(&bay).await,
            ReconcileOutcome::Transient(_)
        ));
        assert_eq!(conductor.get_bay(&bay.uuid).unwrap(), bay);
    }

    #[tokio::test]
    async fn stale_read_loses_the_race() {
        let (conductor, stacks, bay) = setup("swarm", "fedora-atomic").await;
        let stack_id = bay.stack_id.clone().unwrap();
        conductor.delete_bay(&bay.uuid).await.unwrap();
        stacks.set_status(&stack_id, StackStatus::CreateComplete, None);

        // `bay` still says CREATE_IN_PROGRESS.
        assert_eq!(conductor.reconcile_bay(&bay).await, ReconcileOutcome::Conflict);
        assert_eq!(
            conductor.get_bay(&bay.uuid).unwrap().status,
            BayStatus::DeleteInProgress
        );
    }

    #[tokio::test]
    async fn lost_submission_is_adopted_by_name() {
        let (conductor, stacks) =
            conductor_with_model("swarm", "fedora-atomic", ConductorConfig::default());
        stacks.lose_next_create_response();
        let bay = conductor.create_bay("model", BaySpec::default()).await.unwrap();
        assert_eq!(bay.stack_id, None);

        assert_eq!(conductor.reconcile_bay(&bay).await, ReconcileOutcome::Adopted);
        let adopted = conductor.get_bay(&bay.uuid).unwrap();
        let stack = stacks.stacks().pop().unwrap();
        assert_eq!(adopted.stack_id.as_deref(), Some(stack.id.as_str()));
        assert_eq!(adopted.status, BayStatus::CreateInProgress);
        assert!(!adopted.submission_unconfirmed);
    }

    #[tokio::test]
    async fn unconfirmed_submission_fails_after_grace() {
        let (conductor, stacks) =
            conductor_with_model("swarm", "fedora-atomic", ConductorConfig::default());
        stacks.fail_next(StackOp::Create, StackError::Timeout(std::time::Duration::from_secs(30)));
        let bay = conductor.create_bay("model", BaySpec::default()).await.unwrap();
        assert!(stacks.stacks().is_empty());

        // Within the grace period nothing happens.
        assert_eq!(conductor.reconcile_bay(&bay).await, ReconcileOutcome::Unchanged);

        let stale = conductor
            .store()
            .compare_and_swap_bay(&bay.uuid, &[BayStatus::CreateInProgress], |b| {
                b.updated_at = b.updated_at.saturating_sub(3600)
            })
            .unwrap();
        assert_eq!(
            conductor.reconcile_bay(&stale).await,
            ReconcileOutcome::Transitioned(BayStatus::CreateFailed)
        );
        let failed = conductor.get_bay(&bay.uuid).unwrap();
        assert_eq!(failed.status_reason.as_deref(), Some(SUBMISSION_UNCONFIRMED));
    }

    #[tokio::test]
    async fn report_pages_through_every_in_progress_bay() {
        let mut config = ConductorConfig::default();
        config.api.max_limit = 2;
        let (conductor, stacks) = conductor_with_model("swarm", "fedora-atomic", config);
        let mut bays = Vec::new();
        for i in 0..5 {
            let spec = BaySpec {
                name: Some(format!("bay-{i}")),
                ..Default::default()
            };
            bays.push(conductor.create_bay("model", spec).await.unwrap());
        }
        let done = bays[0].stack_id.clone().unwrap();
        stacks.set_status(&done, StackStatus::CreateComplete, None);

        let report = conductor.reconcile_all().await;
        assert_eq!(report.len(), 5);
        assert_eq!(report.changed(), 1);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.aborted, None);
        assert_eq!(
            report.outcome(&bays[0].uuid),
            Some(&ReconcileOutcome::Transitioned(BayStatus::CreateComplete))
        );

        // Settled bays are not visited again.
        assert_eq!(conductor.reconcile_all().await.len(), 4);
    }
}
