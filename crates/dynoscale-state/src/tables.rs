//! redb table definitions for the dynoscale state store.
//!
//! Values are JSON-serialized [`TtlEntry`](crate::types::TtlEntry) rows.

use redb::TableDefinition;

/// Expiring counters keyed by a namespaced name such as `dynoscale:throttle`.
pub const COUNTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("counters");
