//! bay-template — renders stack definitions for bays.
//!
//! A pure mapping from (COE, baymodel, bay) to a [`StackDefinition`]: a
//! template body plus an ordered parameter map. Rendering has no side
//! effects and is byte-for-byte deterministic, so a failed submission can be
//! retried with an identical definition.
//!
//! # COE dispatch
//!
//! ```text
//! render(model, bay)
//!   match model.coe
//!     Swarm      → swarm::render       (fedora-atomic)
//!     Kubernetes → kubernetes::render  (fedora-atomic, coreos)
//!     Mesos      → mesos::render       (ubuntu)
//! ```
//!
//! Adding a COE means adding a `Coe` variant and its module; the compiler
//! points at every match that needs the new arm.

pub mod definition;
pub mod error;
mod kubernetes;
mod mesos;
pub mod render;
mod swarm;

pub use definition::{OutputKeys, StackDefinition};
pub use error::{TemplateError, TemplateResult};
pub use render::{discovery_url, output_keys, render, supported_distros};
