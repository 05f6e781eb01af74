//! Expiring key/value contract consumed by the decision engine.

use std::sync::Arc;
use std::time::Duration;

use crate::error::StateResult;

/// Source of the current time in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Wall clock backed by `SystemTime`.
pub fn system_clock() -> Clock {
    Arc::new(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    })
}

/// Key/value store with per-key expiry.
///
/// Expired keys behave exactly like missing keys for every operation.
/// Implementations shared between processes must make `compare_and_set`
/// and `remove_if` atomic.
pub trait TtlStore: Send + Sync {
    /// Current live value for `key`.
    fn get(&self, key: &str) -> StateResult<Option<u32>>;

    /// Unconditionally store `value` under `key` for `ttl`.
    fn set(&self, key: &str, value: u32, ttl: Duration) -> StateResult<()>;

    /// Store `value` for `ttl` only if the live value equals `expected`.
    ///
    /// `expected == None` matches a missing or expired key. Returns whether
    /// the write happened.
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u32>,
        value: u32,
        ttl: Duration,
    ) -> StateResult<bool>;

    /// Delete `key` only if its live value equals `expected`.
    fn remove_if(&self, key: &str, expected: u32) -> StateResult<bool>;

    /// Whether `key` currently holds a live value.
    fn exists(&self, key: &str) -> StateResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
