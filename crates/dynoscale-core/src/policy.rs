//! Scaling policy: pure functions from queue state to worker counts.
//!
//! ```text
//! needed = highest workers w in ratio with pending >= ratio[w], else 0
//!
//! scale up   if enabled && pending > 0 && needed > workers && needed <= max_workers
//! scale down if enabled && workers > min_workers && pending == 0 && working == 0
//! ```
//!
//! The ceiling is a veto: a target above `max_workers` means no action at
//! all, never a clamp to the ceiling.

use crate::config::{JobWorkerRatio, ScalerConfig};
use crate::types::QueueSnapshot;

/// Worker count justified by `pending` jobs under `ratio`.
///
/// Scans from the largest worker count downward and returns the first entry
/// whose threshold is met (an exact match qualifies). Returns 0 when no entry
/// qualifies, which includes an empty queue.
pub fn workers_needed(pending: u32, ratio: &JobWorkerRatio) -> u32 {
    if pending == 0 {
        return 0;
    }

    ratio
        .iter()
        .rev()
        .find(|&(_, threshold)| pending >= threshold)
        .map(|(workers, _)| workers)
        .unwrap_or(0)
}

/// Whether more workers are warranted and allowed.
pub fn should_scale_up(snapshot: &QueueSnapshot, config: &ScalerConfig) -> bool {
    if !config.enabled || snapshot.pending == 0 {
        return false;
    }

    let needed = workers_needed(snapshot.pending, &config.job_worker_ratio);
    needed > snapshot.workers && needed <= config.max_workers
}

/// Whether workers can be released without killing in-flight jobs.
pub fn should_scale_down(snapshot: &QueueSnapshot, config: &ScalerConfig) -> bool {
    config.enabled
        && snapshot.workers > config.min_workers
        && snapshot.pending == 0
        && snapshot.working == 0
}
