//! dynoscale-core — configuration, queue observations, and scaling policy.
//!
//! dynoscale decides how many worker processes a platform should run from
//! the state of a background-job queue:
//!
//! ```text
//! QueueSnapshot { workers, pending, working }
//!   └── policy::workers_needed(pending, job_worker_ratio)
//!         ├── should_scale_up   → target = workers_needed
//!         └── should_scale_down → target = min_workers
//! ```
//!
//! This crate holds the pure parts. The decision engine that talks to the
//! platform and throttles redundant calls lives in `dynoscale-autoscale`.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod policy;
pub mod types;

pub use client::{ClientFuture, ScalingClient};
pub use config::{DispatchMode, JobWorkerRatio, LogFormat, LoggingConfig, ScalerConfig};
pub use error::{ConfigError, ConfigResult};
pub use types::{ParseActionError, QueueSnapshot, ScaleAction};
