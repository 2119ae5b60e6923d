//! Bay and baymodel lifecycle operations.
//!
//! The conductor holds no bay state of its own. Every transition reads the
//! record from the store and writes it back through
//! [`StateStore::compare_and_swap_bay`], so two operations racing on the
//! same bay resolve to one winner and one `Conflict`.

use std::sync::Arc;

use bay_core::ConductorConfig;
use bay_stack::{StackError, StackService};
use bay_state::{Bay, BayFilter, BayModel, BayStatus, Page, StateError, StateStore};
use bay_template::render;
use tracing::{debug, info, warn};

use crate::error::{ConductorError, ConductorResult};
use crate::spec::{BayModelSpec, BayPatch, BaySpec, PatchOp, ValidBaySpec, apply_patch};
use crate::status::sanitize_reason;

/// Longest bay-name prefix carried into a stack name.
const STACK_NAME_PREFIX_LEN: usize = 20;

/// Result of [`Conductor::delete_bay`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The bay never had a stack and its record is gone.
    Removed(Bay),
    /// Stack deletion was submitted; reconciliation purges the record.
    Deleting(Bay),
}

#[derive(Clone)]
pub struct Conductor {
    pub(crate) store: StateStore,
    pub(crate) stacks: Arc<dyn StackService>,
    pub(crate) config: Arc<ConductorConfig>,
}

impl Conductor {
    pub fn new(store: StateStore, stacks: Arc<dyn StackService>, config: Arc<ConductorConfig>) -> Self {
        Self {
            store,
            stacks,
            config,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    // ── Bays ───────────────────────────────────────────────────────

    /// Submit a new bay. Returns as soon as the backend has the stack;
    /// provisioning progress is observed through reconciliation.
    pub async fn create_bay(&self, baymodel_id_or_name: &str, spec: BaySpec) -> ConductorResult<Bay> {
        let spec = spec.validate()?;
        let model = self.get_baymodel(baymodel_id_or_name)?;

        let uuid = uuid::Uuid::new_v4().to_string();
        let reservation = build_reservation(&self.config, &model, spec, uuid.clone(), epoch_secs());

        let definition = render(&model, &reservation)?;
        self.store.insert_bay_checked(&reservation)?;
        info!(
            bay = %uuid,
            baymodel = %model.uuid,
            coe = %model.coe,
            stack_name = %reservation.stack_name,
            "bay reserved, submitting stack"
        );

        let submitted = self
            .stacks
            .create_stack(
                &reservation.stack_name,
                &definition,
                reservation.bay_create_timeout,
            )
            .await;

        match submitted {
            Ok(stack_id) => self.record_stack_id(&uuid, stack_id).await,
            Err(e) if e.outcome_unknown() => {
                warn!(
                    bay = %uuid,
                    error = %e,
                    "stack submission outcome unknown, leaving bay for reconciliation"
                );
                self.mark_unconfirmed(&reservation).await
            }
            Err(e) => {
                warn!(bay = %uuid, error = %e, "stack submission failed, releasing reservation");
                if let Err(release) = self.store.remove_bay_if(&uuid, &[BayStatus::CreateInProgress]) {
                    warn!(bay = %uuid, error = %release, "failed to release bay reservation");
                }
                Err(e.into())
            }
        }
    }

    /// Attach the accepted stack to its reservation, or clean the stack up
    /// if the reservation was taken away in the meantime.
    async fn record_stack_id(&self, uuid: &str, stack_id: String) -> ConductorResult<Bay> {
        let recorded = self.store.compare_and_swap_bay(uuid, &[BayStatus::CreateInProgress], |bay| {
            if bay.stack_id.is_none() {
                bay.stack_id = Some(stack_id.clone());
                bay.updated_at = epoch_secs();
            }
        });

        match recorded {
            Ok(bay) if bay.stack_id.as_deref() == Some(stack_id.as_str()) => {
                info!(bay = %uuid, stack_id = %stack_id, "stack accepted");
                Ok(bay)
            }
            Ok(bay) => {
                warn!(
                    bay = %uuid,
                    stack_id = %stack_id,
                    recorded = ?bay.stack_id,
                    "bay already carries a different stack"
                );
                self.discard_stack(uuid, &stack_id).await;
                Err(ConductorError::Conflict(format!(
                    "bay {uuid} already has a stack"
                )))
            }
            Err(e @ (StateError::NotFound(_) | StateError::Conflict(_))) => {
                warn!(
                    bay = %uuid,
                    stack_id = %stack_id,
                    reason = %e,
                    "bay changed while its stack was submitted"
                );
                self.discard_stack(uuid, &stack_id).await;
                Err(ConductorError::Conflict(format!(
                    "bay {uuid} changed while its stack was being created"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Flag a reservation whose create may have reached the backend, so a
    /// later delete looks for the stack before dropping the record.
    async fn mark_unconfirmed(&self, reservation: &Bay) -> ConductorResult<Bay> {
        let uuid = reservation.uuid.as_str();
        let marked = self.store.compare_and_swap_bay(uuid, &[BayStatus::CreateInProgress], |b| {
            if b.stack_id.is_none() {
                b.submission_unconfirmed = true;
                b.updated_at = epoch_secs();
            }
        });
        match marked {
            Ok(bay) => Ok(bay),
            Err(e @ (StateError::NotFound(_) | StateError::Conflict(_))) => {
                warn!(bay = %uuid, reason = %e, "bay changed while its stack submission was unconfirmed");
                match self.stacks.get_stack(&reservation.stack_name).await {
                    Ok(info) => self.discard_stack(uuid, &info.id).await,
                    Err(StackError::NotFound(_)) => {}
                    Err(lookup) => warn!(
                        bay = %uuid,
                        stack_name = %reservation.stack_name,
                        error = %lookup,
                        "failed to look up possibly orphaned stack"
                    ),
                }
                Err(ConductorError::Conflict(format!(
                    "bay {uuid} changed while its stack was being created"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_stack(&self, uuid: &str, stack_id: &str) {
        match self.stacks.delete_stack(stack_id).await {
            Ok(()) => info!(bay = %uuid, stack_id = %stack_id, "orphaned stack deleted"),
            Err(e) => warn!(bay = %uuid, stack_id = %stack_id, error = %e, "failed to delete orphaned stack"),
        }
    }

    /// Resize a bay.
    pub async fn update_bay(&self, bay_id_or_name: &str, patch: BayPatch) -> ConductorResult<Bay> {
        patch.validate()?;
        let bay = self.get_bay(bay_id_or_name)?;
        if !BayStatus::UPDATABLE.contains(&bay.status) {
            return Err(ConductorError::Conflict(format!(
                "bay {} is {} and cannot be updated",
                bay.uuid, bay.status
            )));
        }
        let stack_id = bay.stack_id.clone().ok_or_else(|| {
            ConductorError::Conflict(format!("bay {} has no stack", bay.uuid))
        })?;
        let model = self
            .store
            .get_baymodel(&bay.baymodel_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("baymodel {}", bay.baymodel_id)))?;

        let mut target = bay.clone();
        target.node_count = patch.node_count;
        let definition = render(&model, &target)?;

        let previous_status = bay.status;
        let previous_reason = bay.status_reason.clone();
        let previous_nodes = bay.node_count;
        let updating = self
            .store
            .compare_and_swap_bay(&bay.uuid, &[previous_status], |b| {
                b.status = BayStatus::UpdateInProgress;
                b.status_reason = None;
                b.node_count = patch.node_count;
                b.updated_at = epoch_secs();
            })?;
        info!(
            bay = %bay.uuid,
            stack_id = %stack_id,
            node_count = patch.node_count,
            "submitting stack update"
        );

        match self.stacks.update_stack(&stack_id, &definition).await {
            Ok(()) => Ok(updating),
            Err(e) if e.outcome_unknown() => {
                warn!(bay = %bay.uuid, error = %e, "stack update outcome unknown, leaving bay for reconciliation");
                Ok(updating)
            }
            Err(e) if e.is_transient() => {
                warn!(bay = %bay.uuid, error = %e, "stack update not accepted, restoring bay");
                self.store
                    .compare_and_swap_bay(&bay.uuid, &[BayStatus::UpdateInProgress], |b| {
                        b.status = previous_status;
                        b.status_reason = previous_reason;
                        b.node_count = previous_nodes;
                        b.updated_at = epoch_secs();
                    })?;
                Err(e.into())
            }
            Err(e) => {
                self.fail_operation(&bay.uuid, BayStatus::UpdateInProgress, BayStatus::UpdateFailed, &e)?;
                Err(e.into())
            }
        }
    }

    /// Tear a bay down.
    pub async fn delete_bay(&self, bay_id_or_name: &str) -> ConductorResult<DeleteOutcome> {
        let bay = self.get_bay(bay_id_or_name)?;
        if bay.status == BayStatus::DeleteInProgress {
            return Err(ConductorError::Conflict(format!(
                "bay {} is already being deleted",
                bay.uuid
            )));
        }

        let stack_id = match bay.stack_id.clone() {
            Some(stack_id) => stack_id,
            None if bay.submission_unconfirmed => {
                match self.stacks.get_stack(&bay.stack_name).await {
                    Ok(info) => {
                        info!(bay = %bay.uuid, stack_id = %info.id, "found unconfirmed stack by name");
                        info.id
                    }
                    Err(StackError::NotFound(_)) => return self.remove_stackless(&bay),
                    Err(e) => return Err(e.into()),
                }
            }
            None => return self.remove_stackless(&bay),
        };

        let previous_status = bay.status;
        let previous_reason = bay.status_reason.clone();
        let deleting = self
            .store
            .compare_and_swap_bay(&bay.uuid, &[previous_status], |b| {
                if b.stack_id.is_none() {
                    b.stack_id = Some(stack_id.clone());
                    b.submission_unconfirmed = false;
                }
                b.status = BayStatus::DeleteInProgress;
                b.status_reason = None;
                b.updated_at = epoch_secs();
            })?;
        let stack_id = deleting.stack_id.clone().unwrap_or(stack_id);
        info!(bay = %bay.uuid, stack_id = %stack_id, "submitting stack delete");

        match self.stacks.delete_stack(&stack_id).await {
            Ok(()) => Ok(DeleteOutcome::Deleting(deleting)),
            Err(e) if e.outcome_unknown() => {
                warn!(bay = %bay.uuid, error = %e, "stack delete outcome unknown, leaving bay for reconciliation");
                Ok(DeleteOutcome::Deleting(deleting))
            }
            Err(e) if e.is_transient() => {
                warn!(bay = %bay.uuid, error = %e, "stack delete not accepted, restoring bay");
                self.store
                    .compare_and_swap_bay(&bay.uuid, &[BayStatus::DeleteInProgress], |b| {
                        b.status = previous_status;
                        b.status_reason = previous_reason;
                        b.updated_at = epoch_secs();
                    })?;
                Err(e.into())
            }
            Err(e) => {
                self.fail_operation(&bay.uuid, BayStatus::DeleteInProgress, BayStatus::DeleteFailed, &e)?;
                Err(e.into())
            }
        }
    }

    fn remove_stackless(&self, bay: &Bay) -> ConductorResult<DeleteOutcome> {
        let removed = self.store.remove_bay_if(&bay.uuid, &[bay.status])?;
        info!(bay = %bay.uuid, "bay without stack removed");
        Ok(DeleteOutcome::Removed(removed))
    }

    fn fail_operation(
        &self,
        uuid: &str,
        from: BayStatus,
        to: BayStatus,
        error: &StackError,
    ) -> ConductorResult<Bay> {
        let reason = sanitize_reason(&error.to_string(), self.config.conductor.status_reason_max_len);
        warn!(bay = %uuid, status = %to, reason = %reason, "stack operation rejected");
        let bay = self.store.compare_and_swap_bay(uuid, &[from], |b| {
            b.status = to;
            b.status_reason = Some(reason);
            b.updated_at = epoch_secs();
        })?;
        Ok(bay)
    }

    /// Look a bay up by UUID, falling back to its name.
    pub fn get_bay(&self, id_or_name: &str) -> ConductorResult<Bay> {
        if let Some(bay) = self.store.get_bay(id_or_name)? {
            return Ok(bay);
        }
        single_by_name("bay", id_or_name, self.store.find_bays_by_name(id_or_name)?)
    }

    pub fn list_bays(
        &self,
        filter: &BayFilter,
        limit: Option<usize>,
        marker: Option<&str>,
    ) -> ConductorResult<Page<Bay>> {
        let limit = self.config.page_limit(limit);
        Ok(self.store.list_bays(filter, marker, limit)?)
    }

    // ── BayModels ──────────────────────────────────────────────────

    pub fn create_baymodel(&self, spec: BayModelSpec) -> ConductorResult<BayModel> {
        let model = spec.into_baymodel(uuid::Uuid::new_v4().to_string(), epoch_secs())?;
        self.store.insert_baymodel(&model)?;
        info!(baymodel = %model.uuid, coe = %model.coe, "baymodel created");
        Ok(model)
    }

    /// Look a baymodel up by UUID, falling back to its name.
    pub fn get_baymodel(&self, id_or_name: &str) -> ConductorResult<BayModel> {
        if let Some(model) = self.store.get_baymodel(id_or_name)? {
            return Ok(model);
        }
        single_by_name(
            "baymodel",
            id_or_name,
            self.store.find_baymodels_by_name(id_or_name)?,
        )
    }

    pub fn list_baymodels(&self, limit: Option<usize>, marker: Option<&str>) -> ConductorResult<Page<BayModel>> {
        let limit = self.config.page_limit(limit);
        Ok(self.store.list_baymodels(marker, limit)?)
    }

    /// Apply patch operations to a baymodel no bay is using.
    pub fn update_baymodel(&self, id_or_name: &str, ops: &[PatchOp]) -> ConductorResult<BayModel> {
        let current = self.get_baymodel(id_or_name)?;
        let patched = apply_patch(BayModelSpec::from(&current), ops)?;
        let mut model = patched.into_baymodel(current.uuid.clone(), current.created_at)?;
        model.updated_at = Some(epoch_secs());
        self.store.replace_baymodel_if_unreferenced(&model)?;
        info!(baymodel = %model.uuid, ops = ops.len(), "baymodel updated");
        Ok(model)
    }

    pub fn delete_baymodel(&self, id_or_name: &str) -> ConductorResult<()> {
        let model = self.get_baymodel(id_or_name)?;
        self.store.delete_baymodel_if_unreferenced(&model.uuid)?;
        info!(baymodel = %model.uuid, "baymodel deleted");
        Ok(())
    }
}

fn single_by_name<T>(kind: &str, name: &str, mut matches: Vec<T>) -> ConductorResult<T> {
    match matches.len() {
        0 => Err(ConductorError::NotFound(format!("{kind} {name}"))),
        1 => Ok(matches.remove(0)),
        n => {
            debug!(kind, name, matches = n, "ambiguous name lookup");
            Err(ConductorError::Conflict(format!(
                "{n} {kind}s are named {name}; use the UUID"
            )))
        }
    }
}

/// The `CREATE_IN_PROGRESS` record a new bay starts as, before any stack
/// exists for it.
pub fn build_reservation(
    config: &ConductorConfig,
    model: &BayModel,
    spec: ValidBaySpec,
    uuid: String,
    now: u64,
) -> Bay {
    let name = spec.name.unwrap_or_else(|| format!("bay-{}", &uuid[..8.min(uuid.len())]));
    let discovery_url = spec.discovery_url.unwrap_or_else(|| {
        bay_template::discovery_url(&config.bay.discovery_endpoint, &uuid, spec.master_count)
    });
    Bay {
        stack_name: stack_name(&name, &uuid),
        uuid,
        name,
        baymodel_id: model.uuid.clone(),
        master_count: spec.master_count,
        node_count: spec.node_count,
        stack_id: None,
        submission_unconfirmed: false,
        status: BayStatus::CreateInProgress,
        status_reason: None,
        discovery_url: Some(discovery_url),
        bay_create_timeout: spec
            .bay_create_timeout
            .unwrap_or(config.bay.create_timeout_mins),
        api_address: None,
        master_addresses: Vec::new(),
        node_addresses: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Stack name for a bay: a name-derived prefix plus the bay UUID.
///
/// Characters outside `[A-Za-z0-9_.-]` become `-`, and the prefix always
/// starts with a letter.
pub fn stack_name(bay_name: &str, uuid: &str) -> String {
    let mut prefix: String = bay_name
        .chars()
        .take(STACK_NAME_PREFIX_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if !prefix.starts_with(|c: char| c.is_ascii_alphabetic()) {
        prefix.insert_str(0, "bay-");
    }
    format!("{prefix}-{uuid}")
}

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bay_stack::{MemoryStackService, StackOp, StackStatus};
    use serde_json::json;

    fn conductor() -> (Conductor, Arc<MemoryStackService>) {
        let store = StateStore::open_in_memory().unwrap();
        let stacks = Arc::new(MemoryStackService::new());
        let conductor = Conductor::new(store, stacks.clone(), Arc::new(ConductorConfig::default()));
        (conductor, stacks)
    }

    fn swarm_spec(name: &str) -> BayModelSpec {
        BayModelSpec {
            name: Some(name.to_string()),
            coe: Some("swarm".to_string()),
            image_id: Some("fedora-atomic-21".to_string()),
            keypair_id: Some("default".to_string()),
            flavor_id: Some("m1.small".to_string()),
            cluster_distro: Some("fedora-atomic".to_string()),
            ..Default::default()
        }
    }

    fn bay_spec(name: &str, nodes: u32) -> BaySpec {
        BaySpec {
            name: Some(name.to_string()),
            node_count: Some(nodes),
            ..Default::default()
        }
    }

    #[test]
    fn stack_names() {
        assert_eq!(stack_name("k8s", "u-1"), "k8s-u-1");
        assert_eq!(stack_name("my bay!", "u-1"), "my-bay--u-1");
        assert_eq!(stack_name("1st", "u-1"), "bay-1st-u-1");
        assert_eq!(
            stack_name("a-very-long-bay-name-indeed", "u-1"),
            "a-very-long-bay-name-u-1"
        );
    }

    #[tokio::test]
    async fn create_records_stack_and_renders_once() {
        let (conductor, stacks) = conductor();
        let model = conductor.create_baymodel(swarm_spec("swarm")).unwrap();

        let bay = conductor.create_bay("swarm", bay_spec("bay-1", 2)).await.unwrap();
        assert_eq!(bay.status, BayStatus::CreateInProgress);
        assert_eq!(bay.baymodel_id, model.uuid);
        assert_eq!(bay.bay_create_timeout, 60);
        let stack_id = bay.stack_id.clone().unwrap();

        let stack = stacks.stack(&stack_id).unwrap();
        assert_eq!(stack.name, bay.stack_name);
        assert_eq!(stack.parameters["number_of_nodes"], "2");
        assert_eq!(
            stack.parameters["discovery_url"],
            format!("https://discovery.etcd.io/{}?size=1", bay.uuid)
        );

        let stored = conductor.get_bay(&bay.uuid).unwrap();
        assert_eq!(stored, bay);
    }

    #[tokio::test]
    async fn create_validates_before_touching_anything() {
        let (conductor, stacks) = conductor();
        conductor.create_baymodel(swarm_spec("swarm")).unwrap();

        let err = conductor.create_bay("swarm", bay_spec("bay-1", 0)).await.unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
        let err = conductor.create_bay("nope", bay_spec("bay-1", 1)).await.unwrap_err();
        assert!(matches!(err, ConductorError::NotFound(_)));

        assert_eq!(stacks.calls().len(), 0);
        assert!(conductor.list_bays(&BayFilter::default(), None, None).unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn rejected_create_leaves_no_record() {
        let (conductor, stacks) = conductor();
        conductor.create_baymodel(swarm_spec("swarm")).unwrap();
        stacks.fail_next(StackOp::Create, StackError::Rejected("quota exceeded".into()));

        let err = conductor.create_bay("swarm", bay_spec("bay-1", 1)).await.unwrap_err();
        assert!(matches!(err, ConductorError::BackendPermanent(_)));
        assert!(conductor.store().find_bays_by_name("bay-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_backend_on_create_is_transient_and_leaves_no_record() {
        let (conductor, stacks) = conductor();
        conductor.create_baymodel(swarm_spec("swarm")).unwrap();
        stacks.fail_next(StackOp::Create, StackError::Unavailable("refused".into()));

        let err = conductor.create_bay("swarm", bay_spec("bay-1", 1)).await.unwrap_err();
        assert!(matches!(err, ConductorError::BackendTransient(_)));
        assert!(conductor.store().find_bays_by_name("bay-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn timed_out_create_keeps_reservation() {
        let (conductor, stacks) = conductor();
        conductor.create_baymodel(swarm_spec("swarm")).unwrap();
        stacks.lose_next_create_response();

        let bay = conductor.create_bay("swarm", bay_spec("bay-1", 1)).await.unwrap();
        assert_eq!(bay.status, BayStatus::CreateInProgress);
        assert_eq!(bay.stack_id, None);
        assert!(bay.submission_unconfirmed);
        assert!(conductor.get_bay("bay-1").unwrap().submission_unconfirmed);
    }

    #[tokio::test]
    async fn update_only_from_settled_states() {
        let (conductor, stacks) = conductor();
        conductor.create_baymodel(swarm_spec("swarm")).unwrap();
        let bay = conductor.create_bay("swarm", bay_spec("bay-1", 1)).await.unwrap();

        let err = conductor
            .update_bay(&bay.uuid, BayPatch { node_count: 3 })
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::Conflict(_)));
        assert_eq!(stacks.call_count(StackOp::Update), 0);

        conductor
            .store()
            .compare_and_swap_bay(&bay.uuid, &[BayStatus::CreateInProgress], |b| {
                b.status = BayStatus::CreateComplete
            })
            .unwrap();
        let stack_id = bay.stack_id.clone().unwrap();
        stacks.set_status(&stack_id, StackStatus::CreateComplete, None);

        let updated = conductor
            .update_bay("bay-1", BayPatch { node_count: 3 })
            .await
            .unwrap();
        assert_eq!(updated.status, BayStatus::UpdateInProgress);
        assert_eq!(updated.node_count, 3);
        assert_eq!(stacks.stack(&stack_id).unwrap().parameters["number_of_nodes"], "3");
    }

    #[tokio::test]
    async fn update_failures() {
        let (conductor, stacks) = conductor();
        conductor.create_baymodel(swarm_spec("swarm")).unwrap();
        let bay = conductor.create_bay("swarm", bay_spec("bay-1", 1)).await.unwrap();
        conductor
            .store()
            .compare_and_swap_bay(&bay.uuid, &[BayStatus::CreateInProgress], |b| {
                b.status = BayStatus::CreateComplete
            })
            .unwrap();

        // Not accepted: the bay goes back to where it was.
        stacks.fail_next(StackOp::Update, StackError::Unavailable("refused".into()));
        let err = conductor
            .update_bay(&bay.uuid, BayPatch { node_count: 4 })
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::BackendTransient(_)));
        let restored = conductor.get_bay(&bay.uuid).unwrap();
        assert_eq!(restored.status, BayStatus::CreateComplete);
        assert_eq!(restored.node_count, 1);

        // Rejected: the update is marked failed with the reason.
        stacks.fail_next(StackOp::Update, StackError::Rejected("flavor missing".into()));
        let err = conductor
            .update_bay(&bay.uuid, BayPatch { node_count: 4 })
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::BackendPermanent(_)));
        let failed = conductor.get_bay(&bay.uuid).unwrap();
        assert_eq!(failed.status, BayStatus::UpdateFailed);
        assert!(failed.status_reason.unwrap().contains("flavor missing"));

        // Timed out: stays in progress.
        stacks.fail_next(StackOp::Update, StackError::Timeout(std::time::Duration::from_secs(30)));
        let pending = conductor
            .update_bay(&bay.uuid, BayPatch { node_count: 5 })
            .await
            .unwrap();
        assert_eq!(pending.status, BayStatus::UpdateInProgress);
        assert_eq!(conductor.get_bay(&bay.uuid).unwrap().node_count, 5);
    }

    #[tokio::test]
    async fn delete_paths() {
        let (conductor, stacks) = conductor();
        conductor.create_baymodel(swarm_spec("swarm")).unwrap();
        let bay = conductor.create_bay("swarm", bay_spec("bay-1", 1)).await.unwrap();

        stacks.fail_next(StackOp::Delete, StackError::Unavailable("refused".into()));
        let err = conductor.delete_bay(&bay.uuid).await.unwrap_err();
        assert!(matches!(err, ConductorError::BackendTransient(_)));
        assert_eq!(conductor.get_bay(&bay.uuid).unwrap().status, BayStatus::CreateInProgress);

        let outcome = conductor.delete_bay(&bay.uuid).await.unwrap();
        let DeleteOutcome::Deleting(deleting) = outcome else {
            panic!("expected Deleting, got {outcome:?}");
        };
        assert_eq!(deleting.status, BayStatus::DeleteInProgress);

        let err = conductor.delete_bay(&bay.uuid).await.unwrap_err();
        assert!(matches!(err, ConductorError::Conflict(_)));
    }

    #[tokio::test]
    async fn rejected_delete_is_terminal() {
        let (conductor, stacks) = conductor();
        conductor.create_baymodel(swarm_spec("swarm")).unwrap();
        let bay = conductor.create_bay("swarm", bay_spec("bay-1", 1)).await.unwrap();

        stacks.fail_next(StackOp::Delete, StackError::Rejected("resource in use".into()));
        let err = conductor.delete_bay(&bay.uuid).await.unwrap_err();
        assert!(matches!(err, ConductorError::BackendPermanent(_)));
        let failed = conductor.get_bay(&bay.uuid).unwrap();
        assert_eq!(failed.status, BayStatus::DeleteFailed);

        // An explicit delete is the way out.
        assert!(matches!(
            conductor.delete_bay(&bay.uuid).await.unwrap(),
            DeleteOutcome::Deleting(_)
        ));
    }

    #[tokio::test]
    async fn ambiguous_bay_names_conflict() {
        let (conductor, _) = conductor();
        conductor.create_baymodel(swarm_spec("swarm")).unwrap();
        let first = conductor.create_bay("swarm", bay_spec("twin", 1)).await.unwrap();
        conductor.create_bay("swarm", bay_spec("twin", 1)).await.unwrap();

        assert!(matches!(conductor.get_bay("twin"), Err(ConductorError::Conflict(_))));
        assert!(matches!(
            conductor.delete_bay("twin").await,
            Err(ConductorError::Conflict(_))
        ));
        assert_eq!(conductor.get_bay(&first.uuid).unwrap().name, "twin");
    }

    #[test]
    fn baymodel_lookup_and_delete() {
        let (conductor, _) = conductor();
        let a = conductor.create_baymodel(swarm_spec("dup")).unwrap();
        conductor.create_baymodel(swarm_spec("dup")).unwrap();
        let unique = conductor.create_baymodel(swarm_spec("unique")).unwrap();

        assert!(matches!(conductor.get_baymodel("dup"), Err(ConductorError::Conflict(_))));
        assert_eq!(conductor.get_baymodel(&a.uuid).unwrap(), a);
        assert_eq!(conductor.get_baymodel("unique").unwrap(), unique);
        assert!(matches!(conductor.get_baymodel("none"), Err(ConductorError::NotFound(_))));

        assert!(matches!(conductor.delete_baymodel("dup"), Err(ConductorError::Conflict(_))));
        conductor.delete_baymodel("unique").unwrap();
        assert!(matches!(conductor.delete_baymodel("unique"), Err(ConductorError::NotFound(_))));
    }

    #[test]
    fn baymodel_patch() {
        let (conductor, _) = conductor();
        let model = conductor.create_baymodel(swarm_spec("a")).unwrap();

        let updated = conductor
            .update_baymodel("a", &[PatchOp::replace("/name", json!("b"))])
            .unwrap();
        assert_eq!(updated.name.as_deref(), Some("b"));
        assert_eq!(updated.uuid, model.uuid);
        assert_eq!(updated.image_id, model.image_id);
        assert_eq!(updated.created_at, model.created_at);
        assert!(updated.updated_at.is_some());

        assert!(matches!(
            conductor.update_baymodel("b", &[PatchOp::remove("/uuid")]),
            Err(ConductorError::Validation(_))
        ));
        // The result must still be a valid baymodel.
        assert!(matches!(
            conductor.update_baymodel("b", &[PatchOp::remove("/image_id")]),
            Err(ConductorError::Validation(_))
        ));
        assert!(matches!(
            conductor.update_baymodel("missing", &[PatchOp::replace("/name", json!("c"))]),
            Err(ConductorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn referenced_baymodels_are_frozen() {
        let (conductor, _) = conductor();
        let model = conductor.create_baymodel(swarm_spec("swarm")).unwrap();
        conductor.create_bay("swarm", bay_spec("bay-1", 1)).await.unwrap();

        match conductor.delete_baymodel("swarm") {
            Err(ConductorError::Validation(msg)) => assert!(msg.contains(&model.uuid)),
            other => panic!("expected Validation, got {other:?}"),
        }
        assert!(matches!(
            conductor.update_baymodel("swarm", &[PatchOp::replace("/name", json!("x"))]),
            Err(ConductorError::Validation(_))
        ));
    }
}
