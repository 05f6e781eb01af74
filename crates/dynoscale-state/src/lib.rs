//! dynoscale-state — shared throttle state for dynoscale.
//!
//! Backed by [redb](https://docs.rs/redb), provides expiring `u32` counters
//! with atomic compare-and-set. The decision engine keeps its last-sent
//! worker target here so bursts of identical decisions reach the platform
//! API only once per throttle window.
//!
//! # Architecture
//!
//! Rows are JSON-serialized `TtlEntry { value, expires_at_ms }` values in a
//! single `counters` table. Expiry is evaluated lazily on every access, so
//! an expired row is indistinguishable from a missing one; `purge_expired`
//! reclaims the space.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Other backends plug in through the
//! [`TtlStore`] trait.

pub mod error;
pub mod store;
pub mod tables;
pub mod ttl;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use ttl::{Clock, TtlStore, system_clock};
pub use types::TtlEntry;
