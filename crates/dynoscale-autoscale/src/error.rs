//! Decision engine error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`Autoscaler`](crate::Autoscaler) operations.
///
/// Throttle store failures never appear here: the engine fails open and
/// logs them instead.
#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("scaling is enabled but no target application is configured")]
    MissingApplication,

    #[error("scaling {application} to {target} workers failed: {source}")]
    Scale {
        application: String,
        target: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("scaling {application} to {target} workers timed out after {after:?}")]
    Timeout {
        application: String,
        target: u32,
        after: Duration,
    },

    #[error("reading running workers for {application} failed: {source}")]
    RunningWorkers {
        application: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

/// Errors returned when handing a snapshot to the [`ScaleDispatcher`](crate::ScaleDispatcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("scale dispatch queue is full")]
    Full,

    #[error("scale dispatcher has stopped")]
    Closed,
}
