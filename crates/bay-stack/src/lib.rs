//! bay-stack — the stack service capability consumed by the conductor.
//!
//! The conductor only sees the [`StackService`] trait. Two adapters ship
//! with the crate:
//!
//! - [`HeatClient`]: JSON over HTTP against a Heat-style orchestration API,
//!   every request bounded by a timeout.
//! - [`MemoryStackService`]: an in-process backend that records calls and
//!   lets tests script stack statuses and failures.
//!
//! # Error categories
//!
//! ```text
//! Unavailable  transient  request was not accepted      caller may retry
//! Timeout      transient  outcome unknown               poll, never assume
//! Interrupted  transient  outcome unknown               poll, never assume
//! Rejected     permanent  backend refused the request   surfaced to the user
//! NotFound     n/a        stack does not exist          delete treats as done
//! ```

pub mod error;
pub mod heat;
pub mod memory;
pub mod service;

pub use error::{StackError, StackResult};
pub use heat::HeatClient;
pub use memory::{MemoryStack, MemoryStackService, StackCall, StackOp};
pub use service::{StackInfo, StackService, StackStatus};
