//! Queue observations and scaling actions shared across dynoscale crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Direction hint attached to a snapshot by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
}

impl ScaleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleAction::ScaleUp => "scale_up",
            ScaleAction::ScaleDown => "scale_down",
        }
    }
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an action token is neither `scale_up` nor `scale_down`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scale action: {0:?}")]
pub struct ParseActionError(pub String);

impl FromStr for ScaleAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "scale_up" => Ok(ScaleAction::ScaleUp),
            "scale_down" => Ok(ScaleAction::ScaleDown),
            other => Err(ParseActionError(other.to_string())),
        }
    }
}

/// One point-in-time observation of the job queue.
///
/// Built by the caller for a single decision and dropped afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Worker processes currently running.
    pub workers: u32,
    /// Jobs enqueued but not yet started.
    pub pending: u32,
    /// Jobs currently executing.
    pub working: u32,
    /// Optional direction hint; `None` means auto-detect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ScaleAction>,
}

impl QueueSnapshot {
    pub fn new(workers: u32, pending: u32, working: u32) -> Self {
        Self {
            workers,
            pending,
            working,
            action: None,
        }
    }

    /// Attach a direction hint.
    pub fn with_action(mut self, action: ScaleAction) -> Self {
        self.action = Some(action);
        self
    }
}
