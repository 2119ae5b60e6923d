//! bay-conductor — the bay provisioning orchestrator.
//!
//! [`Conductor`] turns bay and baymodel requests into stack operations and
//! records their progress in the state store. [`Reconciler`] periodically
//! folds the backend's view of each in-flight stack back into its bay.
//!
//! ```text
//! create_bay ─► render ─► reserve (CREATE_IN_PROGRESS) ─► create_stack ─► record stack id
//!                                                                    │
//! Reconciler tick ─► list in-progress bays ─► get_stack ─► map status ┘
//! ```

pub mod conductor;
pub mod error;
pub mod reconcile;
pub mod reconciler;
pub mod spec;
pub mod status;

pub use conductor::{Conductor, DeleteOutcome, build_reservation, stack_name};
pub use error::{ConductorError, ConductorResult};
pub use reconcile::{BayOutcome, ReconcileOutcome, ReconcileReport, SUBMISSION_UNCONFIRMED};
pub use reconciler::Reconciler;
pub use spec::{BayModelSpec, BayPatch, BaySpec, PatchKind, PatchOp, ValidBaySpec};
pub use status::{StatusMapping, map_stack_status, sanitize_reason};
