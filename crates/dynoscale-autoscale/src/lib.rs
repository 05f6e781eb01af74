//! dynoscale-autoscale — queue-driven worker scaling.
//!
//! Turns `QueueSnapshot`s into scale commands for a `ScalingClient`,
//! suppressing repeats of the same target within the throttle window.
//!
//! # Decision flow
//!
//! ```text
//! job framework adapter
//!   └── JobHooks (on_enqueue / on_complete)
//!         ├── sync:  Autoscaler::scale_up / scale_down
//!         └── async: ScaleDispatcher (one worker) → Autoscaler::scale_with
//!
//! Autoscaler::apply(target)
//!   last = throttle.get()          store errors → unthrottled
//!   last == target?                → Throttled
//!   claim via compare_and_set
//!   client.scale_workers(target)   under call_timeout
//!     ok  → refresh throttle, ScaleTo(target)
//!     err → restore previous target, return error (never retried)
//! ```

pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod scaler;

pub use dispatcher::ScaleDispatcher;
pub use error::{AutoscaleError, AutoscaleResult, DispatchError};
pub use hooks::{
    HookFuture, JobHooks, QueueTelemetry, SCALE_DOWN_CANCELLED_KEY, ScalingHooks, TelemetryFuture,
};
pub use scaler::{Autoscaler, ScaleDecision, THROTTLE_KEY};
