//! Counter store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Failures reading or writing expiring counters.
///
/// Backend errors are flattened to strings so callers outside this crate
/// never need the storage engine's types.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open counter store: {0}")]
    Open(String),

    #[error("counter store transaction failed: {0}")]
    Transaction(String),

    #[error("counters table unavailable: {0}")]
    Table(String),

    #[error("reading counter failed: {0}")]
    Read(String),

    #[error("writing counter failed: {0}")]
    Write(String),

    #[error("encoding counter row failed: {0}")]
    Serialize(String),

    #[error("counter row is corrupt: {0}")]
    Deserialize(String),

    /// A remote backend could not be reached.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}
