//! redb table definitions for the bay state store.
//!
//! Each table uses `&str` UUID keys and `&[u8]` values (JSON-serialized
//! domain types).

use redb::TableDefinition;

/// Bay records keyed by bay UUID.
pub const BAYS: TableDefinition<&str, &[u8]> = TableDefinition::new("bays");

/// BayModel records keyed by baymodel UUID.
pub const BAYMODELS: TableDefinition<&str, &[u8]> = TableDefinition::new("baymodels");
