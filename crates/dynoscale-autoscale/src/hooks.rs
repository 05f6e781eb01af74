//! Job-framework integration.
//!
//! A job framework adapter calls [`JobHooks::on_enqueue`] after a job is
//! pushed and [`JobHooks::on_complete`] after one finishes. [`ScalingHooks`]
//! is the stock implementation: enqueues drive scale-up, completions drive
//! scale-down, and an enqueue briefly vetoes completion-driven scale-downs
//! so a worker is not released just as new work arrives.
//!
//! Hook futures never fail. Scaling errors are logged and swallowed so the
//! job pipeline that triggered them keeps running. With a dispatcher
//! attached, `on_complete` returns at once and its settle delay runs on a
//! detached task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use dynoscale_core::{DispatchMode, QueueSnapshot, ScaleAction};

use crate::dispatcher::ScaleDispatcher;
use crate::scaler::Autoscaler;

/// Store key marking that completion-driven scale-downs are on hold.
pub const SCALE_DOWN_CANCELLED_KEY: &str = "dynoscale:scale-down-cancelled";

/// Boxed future returned by [`JobHooks`] methods.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Boxed future returned by [`QueueTelemetry::snapshot`].
pub type TelemetryFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<QueueSnapshot>> + Send + 'a>>;

/// Reports current queue statistics on demand.
pub trait QueueTelemetry: Send + Sync {
    fn snapshot(&self) -> TelemetryFuture<'_>;
}

/// Callbacks a job framework adapter invokes around job lifecycle events.
pub trait JobHooks: Send + Sync {
    /// A job was just enqueued; `snapshot` is the queue state around it.
    fn on_enqueue(&self, snapshot: QueueSnapshot) -> HookFuture<'_>;

    /// A job just finished; `snapshot` is the queue state around it.
    fn on_complete(&self, snapshot: QueueSnapshot) -> HookFuture<'_>;
}

/// [`JobHooks`] driving an [`Autoscaler`].
#[derive(Clone)]
pub struct ScalingHooks {
    autoscaler: Autoscaler,
    dispatcher: Option<ScaleDispatcher>,
    telemetry: Option<Arc<dyn QueueTelemetry>>,
    scale_up_enabled: bool,
    scale_down_enabled: bool,
    count_enqueued_job: bool,
    exclude_completing_job: bool,
    settle: Duration,
    cancel_window: Duration,
}

impl ScalingHooks {
    /// Hooks calling the autoscaler inline, with settle and cancel windows
    /// taken from `scale_down_settle`.
    pub fn new(autoscaler: Autoscaler) -> Self {
        let settle = autoscaler.config().scale_down_settle;
        Self {
            autoscaler,
            dispatcher: None,
            telemetry: None,
            scale_up_enabled: true,
            scale_down_enabled: true,
            count_enqueued_job: false,
            exclude_completing_job: false,
            settle,
            cancel_window: settle,
        }
    }

    /// Hooks honouring the configured [`DispatchMode`].
    ///
    /// Spawns a [`ScaleDispatcher`] for async mode, so it must run inside a
    /// Tokio runtime.
    pub fn from_config(autoscaler: Autoscaler) -> Self {
        match autoscaler.config().dispatch {
            DispatchMode::Sync => Self::new(autoscaler),
            DispatchMode::Async { capacity } => {
                let dispatcher = ScaleDispatcher::spawn(autoscaler.clone(), capacity);
                Self::new(autoscaler).with_dispatcher(dispatcher)
            }
        }
    }

    /// Route decisions through `dispatcher` instead of deciding inline.
    pub fn with_dispatcher(mut self, dispatcher: ScaleDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Re-read queue state after the settle delay instead of trusting the
    /// snapshot handed to `on_complete`.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn QueueTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_scale_up(mut self, enabled: bool) -> Self {
        self.scale_up_enabled = enabled;
        self
    }

    pub fn with_scale_down(mut self, enabled: bool) -> Self {
        self.scale_down_enabled = enabled;
        self
    }

    /// Add the job being enqueued to `pending`, for frameworks whose stats
    /// are read before the push lands.
    pub fn counting_enqueued_job(mut self, enabled: bool) -> Self {
        self.count_enqueued_job = enabled;
        self
    }

    /// Drop the finishing job from `working`, for frameworks that still
    /// report it as running inside the completion callback.
    pub fn excluding_completing_job(mut self, enabled: bool) -> Self {
        self.exclude_completing_job = enabled;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_cancel_window(mut self, window: Duration) -> Self {
        self.cancel_window = window;
        self
    }

    pub fn scale_up_enabled(&self) -> bool {
        self.scale_up_enabled
    }

    pub fn scale_down_enabled(&self) -> bool {
        self.scale_down_enabled
    }

    pub fn dispatcher(&self) -> Option<&ScaleDispatcher> {
        self.dispatcher.as_ref()
    }

    /// Hold off completion-driven scale-downs for the cancel window.
    pub fn cancel_scale_down(&self) {
        if let Err(e) = self
            .autoscaler
            .state()
            .set(SCALE_DOWN_CANCELLED_KEY, 1, self.cancel_window)
        {
            warn!(error = %e, "failed to record scale-down cancellation");
        }
    }

    /// Whether an enqueue happened within the cancel window.
    pub fn scale_down_cancelled(&self) -> bool {
        self.autoscaler
            .state()
            .exists(SCALE_DOWN_CANCELLED_KEY)
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to read scale-down cancellation");
                false
            })
    }

    async fn decide(&self, snapshot: QueueSnapshot) {
        if let Some(dispatcher) = &self.dispatcher {
            if let Err(e) = dispatcher.submit(snapshot) {
                warn!(error = %e, ?snapshot, "failed to queue scale decision");
            }
            return;
        }

        let result = match snapshot.action {
            Some(ScaleAction::ScaleDown) => self.autoscaler.scale_down(&snapshot).await,
            _ => self.autoscaler.scale_up(&snapshot).await,
        };
        match result {
            Ok(decision) => debug!(?decision, ?snapshot, "job hook scale decision"),
            Err(e) => warn!(error = %e, ?snapshot, "job hook scale decision failed"),
        }
    }

    async fn complete(&self, snapshot: QueueSnapshot) {
        if !self.scale_down_enabled {
            return;
        }

        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        if self.scale_down_cancelled() {
            debug!("scale-down cancelled by a recent enqueue");
            return;
        }

        let mut snapshot = match &self.telemetry {
            Some(telemetry) => match telemetry.snapshot().await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(error = %e, "queue telemetry unavailable, skipping scale-down");
                    return;
                }
            },
            None => snapshot,
        };
        if self.exclude_completing_job {
            snapshot.working = snapshot.working.saturating_sub(1);
        }

        self.decide(snapshot.with_action(ScaleAction::ScaleDown)).await;
    }
}

impl JobHooks for ScalingHooks {
    fn on_enqueue(&self, snapshot: QueueSnapshot) -> HookFuture<'_> {
        Box::pin(async move {
            self.cancel_scale_down();
            if !self.scale_up_enabled {
                return;
            }

            let mut snapshot = snapshot;
            if self.count_enqueued_job {
                snapshot.pending = snapshot.pending.saturating_add(1);
            }
            self.decide(snapshot.with_action(ScaleAction::ScaleUp)).await;
        })
    }

    fn on_complete(&self, snapshot: QueueSnapshot) -> HookFuture<'_> {
        if self.dispatcher.is_none() {
            return Box::pin(self.complete(snapshot));
        }

        // Async mode: the settle delay and telemetry refresh run detached so
        // the completing job is not held up.
        let hooks = self.clone();
        tokio::spawn(async move { hooks.complete(snapshot).await });
        Box::pin(std::future::ready(()))
    }
}
