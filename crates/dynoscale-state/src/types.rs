//! Row types persisted by the state store.

use serde::{Deserialize, Serialize};

/// A counter value with an absolute expiry in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlEntry {
    pub value: u32,
    pub expires_at_ms: u64,
}

impl TtlEntry {
    /// Whether the entry is still visible at `now_ms`.
    pub fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}
