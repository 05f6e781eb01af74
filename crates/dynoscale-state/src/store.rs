//! StateStore — redb-backed expiring counters.
//!
//! Every mutation runs in its own redb write transaction. redb admits one
//! writer at a time, so read-compare-write sequences inside a transaction
//! are atomic for all handles sharing the database. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::COUNTERS;
use crate::ttl::{Clock, TtlStore, system_clock};
use crate::types::TtlEntry;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    clock: Clock,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            clock: system_clock(),
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            clock: system_clock(),
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Replace the time source used for expiry.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn now_ms(&self) -> u64 {
        (self.clock)()
    }

    fn expiry(&self, ttl: Duration) -> u64 {
        self.now_ms()
            .saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }

    /// Run `f` against the counters table inside one write transaction.
    ///
    /// The transaction commits when `f` returns `Ok((_, true))` and aborts
    /// otherwise.
    fn write_with<T>(
        &self,
        f: impl FnOnce(&mut Table<'_, &'static str, &'static [u8]>) -> StateResult<(T, bool)>,
    ) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (result, commit) = {
            let mut table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            f(&mut table)?
        };
        if commit {
            txn.commit().map_err(map_err!(Transaction))?;
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(result)
    }

    /// Remove every expired row. Returns how many were dropped.
    pub fn purge_expired(&self) -> StateResult<usize> {
        let now = self.now_ms();
        let removed = self.write_with(|table| {
            let mut stale = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let row: TtlEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if !row.is_live(now) {
                    stale.push(key.value().to_string());
                }
            }
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            let commit = !stale.is_empty();
            Ok((stale.len(), commit))
        })?;
        if removed > 0 {
            debug!(removed, "expired counters purged");
        }
        Ok(removed)
    }
}

/// Live row for `key` in an open table, if any.
fn live_entry<T>(table: &T, key: &str, now: u64) -> StateResult<Option<TtlEntry>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let row: TtlEntry = match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
        None => return Ok(None),
    };
    Ok(row.is_live(now).then_some(row))
}

fn encode(entry: &TtlEntry) -> StateResult<Vec<u8>> {
    serde_json::to_vec(entry).map_err(map_err!(Serialize))
}

impl TtlStore for StateStore {
    fn get(&self, key: &str) -> StateResult<Option<u32>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        Ok(live_entry(&table, key, self.now_ms())?.map(|row| row.value))
    }

    fn set(&self, key: &str, value: u32, ttl: Duration) -> StateResult<()> {
        let row = TtlEntry {
            value,
            expires_at_ms: self.expiry(ttl),
        };
        let encoded = encode(&row)?;
        self.write_with(|table| {
            table
                .insert(key, encoded.as_slice())
                .map_err(map_err!(Write))?;
            Ok(((), true))
        })?;
        debug!(%key, value, ttl_ms = ttl.as_millis() as u64, "counter stored");
        Ok(())
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u32>,
        value: u32,
        ttl: Duration,
    ) -> StateResult<bool> {
        let now = self.now_ms();
        let row = TtlEntry {
            value,
            expires_at_ms: self.expiry(ttl),
        };
        let encoded = encode(&row)?;
        let swapped = self.write_with(|table| {
            let current = live_entry(&*table, key, now)?.map(|row| row.value);
            if current != expected {
                return Ok((false, false));
            }
            table
                .insert(key, encoded.as_slice())
                .map_err(map_err!(Write))?;
            Ok((true, true))
        })?;
        debug!(%key, ?expected, value, swapped, "counter compare-and-set");
        Ok(swapped)
    }

    fn remove_if(&self, key: &str, expected: u32) -> StateResult<bool> {
        let now = self.now_ms();
        let removed = self.write_with(|table| {
            let current = live_entry(&*table, key, now)?.map(|row| row.value);
            if current != Some(expected) {
                return Ok((false, false));
            }
            table.remove(key).map_err(map_err!(Write))?;
            Ok((true, true))
        })?;
        debug!(%key, expected, removed, "counter conditional remove");
        Ok(removed)
    }
}
