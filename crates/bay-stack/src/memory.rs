//! In-process stack service.
//!
//! Keeps stacks in a map, records every call, and lets the caller move
//! stacks between statuses or queue failures for the next call of a kind.
//! Used by the conductor tests and by `bayd serve --backend memory`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bay_template::StackDefinition;
use tokio::sync::Notify;

use crate::error::{StackError, StackResult};
use crate::service::{StackInfo, StackService, StackStatus};

/// The four stack operations, for scripting and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackOp {
    Create,
    Update,
    Delete,
    Get,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    Create { name: String },
    Update { stack_id: String },
    Delete { stack_id: String },
    Get { stack_id_or_name: String },
}

impl StackCall {
    pub fn op(&self) -> StackOp {
        match self {
            StackCall::Create { .. } => StackOp::Create,
            StackCall::Update { .. } => StackOp::Update,
            StackCall::Delete { .. } => StackOp::Delete,
            StackCall::Get { .. } => StackOp::Get,
        }
    }
}

/// A stack held by the in-memory backend.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStack {
    pub id: String,
    pub name: String,
    pub status: StackStatus,
    pub reason: Option<String>,
    pub outputs: BTreeMap<String, serde_json::Value>,
    pub template_name: String,
    pub parameters: BTreeMap<String, String>,
    pub fingerprint: String,
    pub timeout_mins: u32,
}

impl MemoryStack {
    fn info(&self) -> StackInfo {
        StackInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status.clone(),
            reason: self.reason.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    stacks: BTreeMap<String, MemoryStack>,
    next_id: u64,
    calls: Vec<StackCall>,
    failures: HashMap<StackOp, VecDeque<StackError>>,
    /// Failures returned after the create has been applied.
    lost_creates: usize,
}

/// In-memory [`StackService`].
#[derive(Default)]
pub struct MemoryStackService {
    inner: Mutex<Inner>,
    auto_complete: AtomicBool,
    hold_creates: AtomicBool,
    create_entered: Notify,
    create_release: Notify,
}

impl MemoryStackService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted operation finishes immediately (`*_COMPLETE`).
    pub fn auto_completing() -> Self {
        let service = Self::default();
        service.auto_complete.store(true, Ordering::SeqCst);
        service
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge the others.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue an error for the next call of `op`.
    pub fn fail_next(&self, op: StackOp, error: StackError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Apply the next create but answer it with `Timeout`, as if the
    /// response was lost.
    pub fn lose_next_create_response(&self) {
        self.lock().lost_creates += 1;
    }

    /// Park every subsequent create until [`release_creates`] is called.
    ///
    /// [`release_creates`]: Self::release_creates
    pub fn hold_creates(&self) {
        self.hold_creates.store(true, Ordering::SeqCst);
    }

    /// Resolves once a create has been parked by [`hold_creates`].
    ///
    /// [`hold_creates`]: Self::hold_creates
    pub async fn create_parked(&self) {
        self.create_entered.notified().await;
    }

    pub fn release_creates(&self) {
        self.hold_creates.store(false, Ordering::SeqCst);
        self.create_release.notify_waiters();
    }

    /// Move a stack to `status`, as the backend would on its own.
    pub fn set_status(&self, stack_id: &str, status: StackStatus, reason: Option<&str>) {
        if let Some(stack) = self.lock().stacks.get_mut(stack_id) {
            stack.status = status;
            stack.reason = reason.map(str::to_string);
        }
    }

    pub fn set_output(&self, stack_id: &str, key: &str, value: serde_json::Value) {
        if let Some(stack) = self.lock().stacks.get_mut(stack_id) {
            stack.outputs.insert(key.to_string(), value);
        }
    }

    /// Drop a stack entirely, so lookups return `NotFound`.
    pub fn forget(&self, stack_id: &str) {
        self.lock().stacks.remove(stack_id);
    }

    pub fn stack(&self, stack_id: &str) -> Option<MemoryStack> {
        self.lock().stacks.get(stack_id).cloned()
    }

    pub fn stacks(&self) -> Vec<MemoryStack> {
        self.lock().stacks.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<StackCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: StackOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    /// Record the call and pop any failure scripted for it.
    fn enter(&self, call: StackCall) -> StackResult<()> {
        let mut inner = self.lock();
        let op = call.op();
        inner.calls.push(call);
        match inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn finished(&self, op_complete: StackStatus, in_progress: StackStatus) -> StackStatus {
        if self.auto_complete.load(Ordering::SeqCst) {
            op_complete
        } else {
            in_progress
        }
    }
}

#[async_trait]
impl StackService for MemoryStackService {
    async fn create_stack(
        &self,
        name: &str,
        definition: &StackDefinition,
        timeout_mins: u32,
    ) -> StackResult<String> {
        if self.hold_creates.load(Ordering::SeqCst) {
            let released = self.create_release.notified();
            self.create_entered.notify_one();
            released.await;
        }
        self.enter(StackCall::Create {
            name: name.to_string(),
        })?;

        let status = self.finished(StackStatus::CreateComplete, StackStatus::CreateInProgress);
        let mut inner = self.lock();
        let live = inner
            .stacks
            .values()
            .any(|s| s.name == name && s.status != StackStatus::DeleteComplete);
        if live {
            return Err(StackError::Rejected(format!(
                "stack name {name} is already in use"
            )));
        }
        inner.next_id += 1;
        let id = format!("{name}/{:08x}", inner.next_id);
        inner.stacks.insert(
            id.clone(),
            MemoryStack {
                id: id.clone(),
                name: name.to_string(),
                status,
                reason: None,
                outputs: BTreeMap::new(),
                template_name: definition.template_name.to_string(),
                parameters: definition.parameters.clone(),
                fingerprint: definition.fingerprint(),
                timeout_mins,
            },
        );
        if inner.lost_creates > 0 {
            inner.lost_creates -= 1;
            return Err(StackError::Timeout(std::time::Duration::ZERO));
        }
        Ok(id)
    }

    async fn update_stack(&self, stack_id: &str, definition: &StackDefinition) -> StackResult<()> {
        self.enter(StackCall::Update {
            stack_id: stack_id.to_string(),
        })?;
        let status = self.finished(StackStatus::UpdateComplete, StackStatus::UpdateInProgress);
        let mut inner = self.lock();
        let stack = inner
            .stacks
            .get_mut(stack_id)
            .ok_or_else(|| StackError::NotFound(stack_id.to_string()))?;
        if stack.status.as_str().ends_with("_IN_PROGRESS") {
            return Err(StackError::Rejected(format!(
                "stack {stack_id} is {}; updates are not allowed",
                stack.status
            )));
        }
        stack.status = status;
        stack.reason = None;
        stack.template_name = definition.template_name.to_string();
        stack.parameters = definition.parameters.clone();
        stack.fingerprint = definition.fingerprint();
        Ok(())
    }

    async fn delete_stack(&self, stack_id: &str) -> StackResult<()> {
        self.enter(StackCall::Delete {
            stack_id: stack_id.to_string(),
        })?;
        let status = self.finished(StackStatus::DeleteComplete, StackStatus::DeleteInProgress);
        if let Some(stack) = self.lock().stacks.get_mut(stack_id) {
            stack.status = status;
            stack.reason = None;
        }
        Ok(())
    }

    async fn get_stack(&self, stack_id_or_name: &str) -> StackResult<StackInfo> {
        self.enter(StackCall::Get {
            stack_id_or_name: stack_id_or_name.to_string(),
        })?;
        let inner = self.lock();
        if let Some(stack) = inner.stacks.get(stack_id_or_name) {
            return Ok(stack.info());
        }
        inner
            .stacks
            .values()
            .filter(|s| s.name == stack_id_or_name)
            .max_by(|a, b| a.id.cmp(&b.id))
            .map(MemoryStack::info)
            .ok_or_else(|| StackError::NotFound(stack_id_or_name.to_string()))
    }
}
