//! bay-state — embedded state store for baygrid.
//!
//! Backed by [redb](https://docs.rs/redb), persists bay and baymodel
//! records. The store is the single source of truth for bay status: the
//! conductor never caches a bay across calls.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by UUID, so table iteration yields records in UUID order. That
//! order is what the marker/limit pagination walks.
//!
//! Every status transition goes through [`StateStore::compare_and_swap_bay`],
//! which reads, checks the expected status, and writes inside a single
//! write transaction. redb serializes write transactions, so the check and
//! the write are atomic with respect to every other writer.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
