//! Autoscaler — queue-driven worker scaling.
//!
//! Consults the scaling policy for a [`QueueSnapshot`], and when a change is
//! warranted asks the [`ScalingClient`] to resize the worker formation. The
//! last target sent is kept in a shared [`TtlStore`] so that a burst of
//! identical decisions reaches the platform only once per throttle window,
//! while a changing target always gets through.

use std::sync::Arc;

use tracing::{debug, info, warn};

use dynoscale_core::policy::{should_scale_down, should_scale_up, workers_needed};
use dynoscale_core::{QueueSnapshot, ScaleAction, ScalerConfig, ScalingClient};
use dynoscale_state::TtlStore;

use crate::error::{AutoscaleError, AutoscaleResult};

/// Store key holding the last worker target sent to the platform.
pub const THROTTLE_KEY: &str = "dynoscale:throttle";

/// Outcome of a single scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// The platform was asked to run this many workers.
    ScaleTo(u32),
    /// This target was already sent within the throttle window.
    Throttled(u32),
    /// No change needed.
    NoChange,
}

/// The decision engine.
///
/// Cheap to clone; every clone shares the same config, client and throttle
/// store. Operations are reentrant and may run concurrently.
#[derive(Clone)]
pub struct Autoscaler {
    config: Arc<ScalerConfig>,
    client: Arc<dyn ScalingClient>,
    state: Arc<dyn TtlStore>,
}

impl std::fmt::Debug for Autoscaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autoscaler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Autoscaler {
    /// Create a new autoscaler.
    pub fn new(
        config: Arc<ScalerConfig>,
        client: Arc<dyn ScalingClient>,
        state: Arc<dyn TtlStore>,
    ) -> Self {
        Self {
            config,
            client,
            state,
        }
    }

    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    /// The shared store backing the throttle.
    pub fn state(&self) -> &Arc<dyn TtlStore> {
        &self.state
    }

    /// Add workers if the pending queue justifies more than are running.
    pub async fn scale_up(&self, snapshot: &QueueSnapshot) -> AutoscaleResult<ScaleDecision> {
        if !self.config.enabled {
            return Ok(ScaleDecision::NoChange);
        }

        if !should_scale_up(snapshot, &self.config) {
            debug!(
                workers = snapshot.workers,
                pending = snapshot.pending,
                max_workers = self.config.max_workers,
                "no scale-up needed"
            );
            return Ok(ScaleDecision::NoChange);
        }

        let target = workers_needed(snapshot.pending, &self.config.job_worker_ratio);
        debug!(
            from = snapshot.workers,
            to = target,
            pending = snapshot.pending,
            "scaling up"
        );
        self.apply(target).await
    }

    /// Drop to `min_workers` once the queue is empty and nothing is running.
    pub async fn scale_down(&self, snapshot: &QueueSnapshot) -> AutoscaleResult<ScaleDecision> {
        if !self.config.enabled {
            return Ok(ScaleDecision::NoChange);
        }

        if !should_scale_down(snapshot, &self.config) {
            debug!(
                workers = snapshot.workers,
                pending = snapshot.pending,
                working = snapshot.working,
                min_workers = self.config.min_workers,
                "no scale-down needed"
            );
            return Ok(ScaleDecision::NoChange);
        }

        debug!(
            from = snapshot.workers,
            to = self.config.min_workers,
            "scaling down"
        );
        self.apply(self.config.min_workers).await
    }

    /// Follow the snapshot's action hint, or pick a direction when absent.
    ///
    /// Auto-detection checks scale-down first. The two predicates cannot
    /// both hold, since one needs an empty queue and the other a non-empty
    /// one.
    pub async fn scale_with(&self, snapshot: &QueueSnapshot) -> AutoscaleResult<ScaleDecision> {
        if !self.config.enabled {
            return Ok(ScaleDecision::NoChange);
        }

        match snapshot.action {
            Some(ScaleAction::ScaleUp) => self.scale_up(snapshot).await,
            Some(ScaleAction::ScaleDown) => self.scale_down(snapshot).await,
            None if should_scale_down(snapshot, &self.config) => self.scale_down(snapshot).await,
            None if should_scale_up(snapshot, &self.config) => self.scale_up(snapshot).await,
            None => Ok(ScaleDecision::NoChange),
        }
    }

    /// [`scale_with`](Self::scale_with) for callers holding an untyped action
    /// token. Unknown tokens are ignored.
    pub async fn scale_with_token(
        &self,
        snapshot: &QueueSnapshot,
        action: Option<&str>,
    ) -> AutoscaleResult<ScaleDecision> {
        let snapshot = match action.map(str::parse::<ScaleAction>) {
            None => QueueSnapshot {
                action: None,
                ..*snapshot
            },
            Some(Ok(action)) => snapshot.with_action(action),
            Some(Err(e)) => {
                debug!(error = %e, "ignoring scale request");
                return Ok(ScaleDecision::NoChange);
            }
        };
        self.scale_with(&snapshot).await
    }

    /// Live worker count as reported by the platform.
    pub async fn running_workers(&self) -> AutoscaleResult<u32> {
        let application = self.application()?;
        self.client
            .running_workers(application)
            .await
            .map_err(|source| AutoscaleError::RunningWorkers {
                application: application.to_string(),
                source,
            })
    }

    fn application(&self) -> AutoscaleResult<&str> {
        self.config
            .target_application()
            .ok_or(AutoscaleError::MissingApplication)
    }

    /// Send `target` to the platform unless it was already sent within the
    /// throttle window.
    ///
    /// The throttle slot is claimed with compare-and-set before the call. If
    /// the call fails the slot goes back to the last target that reached the
    /// platform, so a failed target is retried by the next identical
    /// decision. Store errors never block a call.
    async fn apply(&self, target: u32) -> AutoscaleResult<ScaleDecision> {
        let application = self.application()?;
        let window = self.config.throttle_window;

        let previous = self.state.get(THROTTLE_KEY).unwrap_or_else(|e| {
            warn!(error = %e, "throttle store unavailable, proceeding unthrottled");
            None
        });

        if previous == Some(target) {
            debug!(application, target, "scale call throttled");
            return Ok(ScaleDecision::Throttled(target));
        }

        let claimed = match self
            .state
            .compare_and_set(THROTTLE_KEY, previous, target, window)
        {
            Ok(true) => true,
            Ok(false) => {
                // Another caller wrote between our read and the claim.
                if let Ok(Some(current)) = self.state.get(THROTTLE_KEY)
                    && current == target
                {
                    debug!(application, target, "scale call throttled by concurrent claim");
                    return Ok(ScaleDecision::Throttled(target));
                }
                false
            }
            Err(e) => {
                warn!(error = %e, "throttle claim failed, proceeding unthrottled");
                false
            }
        };

        let call = self.client.scale_workers(application, target);
        let result = match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(AutoscaleError::Scale {
                application: application.to_string(),
                target,
                source,
            }),
            Err(_) => Err(AutoscaleError::Timeout {
                application: application.to_string(),
                target,
                after: self.config.call_timeout,
            }),
        };

        if let Err(err) = result {
            if claimed {
                self.release_claim(target, previous);
            }
            warn!(application, target, error = %err, "scaling action failed");
            return Err(err);
        }

        if let Err(e) = self.state.set(THROTTLE_KEY, target, window) {
            warn!(error = %e, target, "failed to record throttle state after scaling");
        }

        info!(application, target, ?previous, "scaled workers");
        Ok(ScaleDecision::ScaleTo(target))
    }

    /// Undo a claim after a failed call, putting back the last target that
    /// actually reached the platform. A claim already overwritten by another
    /// caller is left alone.
    fn release_claim(&self, target: u32, previous: Option<u32>) {
        let released = match previous {
            Some(last) => self.state.compare_and_set(
                THROTTLE_KEY,
                Some(target),
                last,
                self.config.throttle_window,
            ),
            None => self.state.remove_if(THROTTLE_KEY, target),
        };
        if let Err(e) = released {
            warn!(error = %e, target, ?previous, "failed to release throttle claim");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    use dynoscale_core::{ClientFuture, JobWorkerRatio};
    use dynoscale_state::{StateError, StateResult, StateStore};

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<(String, u32)>>,
        fail: AtomicBool,
        running: u32,
    }

    impl RecordingClient {
        fn targets(&self) -> Vec<u32> {
            self.calls.lock().unwrap().iter().map(|(_, n)| *n).collect()
        }
    }

    impl ScalingClient for RecordingClient {
        fn scale_workers<'a>(&'a self, application: &'a str, quantity: u32) -> ClientFuture<'a, ()> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push((application.to_string(), quantity));
                if self.fail.load(Ordering::SeqCst) {
                    anyhow::bail!("platform api unavailable");
                }
                Ok(())
            })
        }

        fn running_workers<'a>(&'a self, _application: &'a str) -> ClientFuture<'a, u32> {
            Box::pin(async move { Ok(self.running) })
        }
    }

    struct HangingClient;

    impl ScalingClient for HangingClient {
        fn scale_workers<'a>(&'a self, _: &'a str, _: u32) -> ClientFuture<'a, ()> {
            Box::pin(std::future::pending())
        }

        fn running_workers<'a>(&'a self, _: &'a str) -> ClientFuture<'a, u32> {
            Box::pin(std::future::pending())
        }
    }

    struct UnavailableStore;

    impl TtlStore for UnavailableStore {
        fn get(&self, _: &str) -> StateResult<Option<u32>> {
            Err(StateError::Unavailable("connection refused".to_string()))
        }

        fn set(&self, _: &str, _: u32, _: Duration) -> StateResult<()> {
            Err(StateError::Unavailable("connection refused".to_string()))
        }

        fn compare_and_set(&self, _: &str, _: Option<u32>, _: u32, _: Duration) -> StateResult<bool> {
            Err(StateError::Unavailable("connection refused".to_string()))
        }

        fn remove_if(&self, _: &str, _: u32) -> StateResult<bool> {
            Err(StateError::Unavailable("connection refused".to_string()))
        }
    }

    fn test_config() -> ScalerConfig {
        let mut config = ScalerConfig::from_lookup(|_| None);
        config.enabled = true;
        config.application = Some("my-app".to_string());
        config.max_workers = 5;
        config.min_workers = 0;
        config.job_worker_ratio =
            JobWorkerRatio::new([(1, 1), (2, 25), (3, 50), (4, 75), (5, 100)]).unwrap();
        config.throttle_window = Duration::from_secs(30);
        config
    }

    struct Harness {
        scaler: Autoscaler,
        client: Arc<RecordingClient>,
        store: StateStore,
        now: Arc<AtomicU64>,
    }

    fn harness_with(config: ScalerConfig) -> Harness {
        let now = Arc::new(AtomicU64::new(1_000_000));
        let clock = Arc::clone(&now);
        let store = StateStore::open_in_memory()
            .unwrap()
            .with_clock(Arc::new(move || clock.load(Ordering::SeqCst)));
        let client = Arc::new(RecordingClient {
            running: 2,
            ..Default::default()
        });
        let scaler = Autoscaler::new(
            Arc::new(config),
            client.clone(),
            Arc::new(store.clone()),
        );
        Harness {
            scaler,
            client,
            store,
            now,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config())
    }

    #[tokio::test]
    async fn scale_up_to_needed_workers() {
        let h = harness();
        let decision = h.scaler.scale_up(&QueueSnapshot::new(0, 25, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::ScaleTo(2));
        assert_eq!(
            h.client.calls.lock().unwrap().as_slice(),
            &[("my-app".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn scale_up_at_every_threshold_from_zero() {
        for (workers, threshold) in JobWorkerRatio::default().iter() {
            let h = harness();
            let decision = h
                .scaler
                .scale_up(&QueueSnapshot::new(0, threshold, 0))
                .await
                .unwrap();
            assert_eq!(decision, ScaleDecision::ScaleTo(workers));
        }
    }

    #[tokio::test]
    async fn no_scale_up_below_next_threshold() {
        let h = harness();
        let decision = h.scaler.scale_up(&QueueSnapshot::new(1, 24, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
        assert!(h.client.targets().is_empty());
    }

    #[tokio::test]
    async fn ceiling_vetoes_scale_up() {
        let mut config = test_config();
        config.max_workers = 4;
        let h = harness_with(config);

        let decision = h.scaler.scale_up(&QueueSnapshot::new(4, 100, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
        assert!(h.client.targets().is_empty());
    }

    #[tokio::test]
    async fn scale_down_to_min_workers() {
        let h = harness();
        let decision = h.scaler.scale_down(&QueueSnapshot::new(4, 0, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::ScaleTo(0));
        assert_eq!(h.client.targets(), vec![0]);
    }

    #[tokio::test]
    async fn scale_down_uses_configured_floor() {
        let mut config = test_config();
        config.min_workers = 2;
        let h = harness_with(config);

        let decision = h.scaler.scale_down(&QueueSnapshot::new(4, 0, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::ScaleTo(2));

        let h = harness_with({
            let mut config = test_config();
            config.min_workers = 1;
            config
        });
        let decision = h.scaler.scale_down(&QueueSnapshot::new(1, 0, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
    }

    #[tokio::test]
    async fn no_scale_down_while_jobs_are_working() {
        let h = harness();
        let decision = h.scaler.scale_down(&QueueSnapshot::new(1, 0, 3)).await.unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
        assert!(h.client.targets().is_empty());
    }

    #[tokio::test]
    async fn disabled_engine_does_nothing() {
        let mut config = test_config();
        config.enabled = false;
        let h = harness_with(config);

        let snaps = [
            QueueSnapshot::new(0, 25, 0),
            QueueSnapshot::new(4, 0, 0),
            QueueSnapshot::new(0, 100, 0).with_action(ScaleAction::ScaleUp),
            QueueSnapshot::new(3, 0, 0).with_action(ScaleAction::ScaleDown),
        ];
        for snap in &snaps {
            assert_eq!(h.scaler.scale_up(snap).await.unwrap(), ScaleDecision::NoChange);
            assert_eq!(h.scaler.scale_down(snap).await.unwrap(), ScaleDecision::NoChange);
            assert_eq!(h.scaler.scale_with(snap).await.unwrap(), ScaleDecision::NoChange);
        }
        assert!(h.client.targets().is_empty());
    }

    #[tokio::test]
    async fn scale_with_auto_detects_scale_up() {
        let h = harness();
        let decision = h.scaler.scale_with(&QueueSnapshot::new(0, 2, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::ScaleTo(1));

        let direct = harness();
        let expected = direct.scaler.scale_up(&QueueSnapshot::new(0, 2, 0)).await.unwrap();
        assert_eq!(decision, expected);
        assert_eq!(h.client.targets(), direct.client.targets());
    }

    #[tokio::test]
    async fn scale_with_auto_detects_scale_down() {
        let h = harness();
        let decision = h.scaler.scale_with(&QueueSnapshot::new(3, 0, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::ScaleTo(0));
    }

    #[tokio::test]
    async fn scale_with_idle_queue_and_no_workers_does_nothing() {
        let h = harness();
        let decision = h.scaler.scale_with(&QueueSnapshot::new(0, 0, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
        assert!(h.client.targets().is_empty());
    }

    #[tokio::test]
    async fn scale_with_follows_action_hint() {
        let h = harness();
        // The hint wins even though the snapshot alone would scale down.
        let snap = QueueSnapshot::new(3, 0, 0).with_action(ScaleAction::ScaleUp);
        assert_eq!(h.scaler.scale_with(&snap).await.unwrap(), ScaleDecision::NoChange);

        let snap = QueueSnapshot::new(3, 0, 0).with_action(ScaleAction::ScaleDown);
        assert_eq!(h.scaler.scale_with(&snap).await.unwrap(), ScaleDecision::ScaleTo(0));
    }

    #[tokio::test]
    async fn unknown_action_token_is_ignored() {
        let h = harness();
        let snap = QueueSnapshot::new(0, 50, 0);
        let decision = h
            .scaler
            .scale_with_token(&snap, Some("scale_sideways"))
            .await
            .unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
        assert!(h.client.targets().is_empty());

        let decision = h.scaler.scale_with_token(&snap, Some("scale_up")).await.unwrap();
        assert_eq!(decision, ScaleDecision::ScaleTo(3));
    }

    #[tokio::test]
    async fn identical_target_is_throttled_within_window() {
        let h = harness();
        let snap = QueueSnapshot::new(0, 25, 0);

        assert_eq!(h.scaler.scale_up(&snap).await.unwrap(), ScaleDecision::ScaleTo(2));
        assert_eq!(h.scaler.scale_up(&snap).await.unwrap(), ScaleDecision::Throttled(2));
        assert_eq!(h.client.targets(), vec![2]);
    }

    #[tokio::test]
    async fn changed_target_passes_throttle() {
        let h = harness();
        h.scaler.scale_up(&QueueSnapshot::new(0, 25, 0)).await.unwrap();
        let decision = h.scaler.scale_up(&QueueSnapshot::new(2, 50, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::ScaleTo(3));
        assert_eq!(h.client.targets(), vec![2, 3]);
    }

    #[tokio::test]
    async fn throttle_value_relative_to_target() {
        let snap = QueueSnapshot::new(0, 25, 0);
        for (stored, expect_call) in [(1, true), (2, false), (3, true)] {
            let h = harness();
            h.store.set(THROTTLE_KEY, stored, Duration::from_secs(30)).unwrap();
            h.scaler.scale_up(&snap).await.unwrap();
            assert_eq!(!h.client.targets().is_empty(), expect_call, "stored={stored}");
        }
    }

    #[tokio::test]
    async fn throttle_expires_after_window() {
        let h = harness();
        let snap = QueueSnapshot::new(0, 25, 0);

        h.scaler.scale_up(&snap).await.unwrap();
        h.now.fetch_add(29_000, Ordering::SeqCst);
        assert_eq!(h.scaler.scale_up(&snap).await.unwrap(), ScaleDecision::Throttled(2));

        h.now.fetch_add(1_000, Ordering::SeqCst);
        assert_eq!(h.scaler.scale_up(&snap).await.unwrap(), ScaleDecision::ScaleTo(2));
        assert_eq!(h.client.targets(), vec![2, 2]);
    }

    #[tokio::test]
    async fn scale_down_is_throttled_too() {
        let h = harness();
        let snap = QueueSnapshot::new(4, 0, 0);
        assert_eq!(h.scaler.scale_down(&snap).await.unwrap(), ScaleDecision::ScaleTo(0));
        assert_eq!(h.scaler.scale_down(&snap).await.unwrap(), ScaleDecision::Throttled(0));
        assert_eq!(h.client.targets(), vec![0]);
    }

    #[tokio::test]
    async fn failed_call_is_returned_and_not_throttled() {
        let h = harness();
        h.client.fail.store(true, Ordering::SeqCst);
        let snap = QueueSnapshot::new(0, 25, 0);

        let err = h.scaler.scale_up(&snap).await.unwrap_err();
        assert!(matches!(err, AutoscaleError::Scale { target: 2, .. }));
        assert_eq!(h.store.get(THROTTLE_KEY).unwrap(), None);

        h.client.fail.store(false, Ordering::SeqCst);
        assert_eq!(h.scaler.scale_up(&snap).await.unwrap(), ScaleDecision::ScaleTo(2));
        assert_eq!(h.client.targets(), vec![2, 2]);
    }

    #[tokio::test]
    async fn failed_call_restores_last_sent_target() {
        let h = harness();
        h.scaler.scale_up(&QueueSnapshot::new(0, 25, 0)).await.unwrap();
        h.client.fail.store(true, Ordering::SeqCst);

        assert!(h.scaler.scale_up(&QueueSnapshot::new(2, 50, 0)).await.is_err());
        assert_eq!(h.store.get(THROTTLE_KEY).unwrap(), Some(2));

        // The restored value still throttles a repeat of the old target.
        assert_eq!(
            h.scaler.scale_up(&QueueSnapshot::new(0, 25, 0)).await.unwrap(),
            ScaleDecision::Throttled(2)
        );

        h.client.fail.store(false, Ordering::SeqCst);
        let decision = h.scaler.scale_up(&QueueSnapshot::new(2, 50, 0)).await.unwrap();
        assert_eq!(decision, ScaleDecision::ScaleTo(3));
    }

    #[tokio::test]
    async fn unavailable_store_fails_open() {
        let client = Arc::new(RecordingClient::default());
        let scaler = Autoscaler::new(
            Arc::new(test_config()),
            client.clone(),
            Arc::new(UnavailableStore),
        );
        let snap = QueueSnapshot::new(0, 25, 0);

        assert_eq!(scaler.scale_up(&snap).await.unwrap(), ScaleDecision::ScaleTo(2));
        assert_eq!(scaler.scale_up(&snap).await.unwrap(), ScaleDecision::ScaleTo(2));
        assert_eq!(client.targets(), vec![2, 2]);
    }

    #[tokio::test]
    async fn hanging_call_times_out() {
        let mut config = test_config();
        config.call_timeout = Duration::from_millis(20);
        let store = StateStore::open_in_memory().unwrap();
        let scaler = Autoscaler::new(
            Arc::new(config),
            Arc::new(HangingClient),
            Arc::new(store.clone()),
        );

        let err = scaler.scale_up(&QueueSnapshot::new(0, 25, 0)).await.unwrap_err();
        assert!(matches!(err, AutoscaleError::Timeout { target: 2, .. }));
        assert_eq!(store.get(THROTTLE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn missing_application_is_an_error() {
        let mut config = test_config();
        config.application = None;
        let h = harness_with(config);

        let err = h.scaler.scale_up(&QueueSnapshot::new(0, 25, 0)).await.unwrap_err();
        assert!(matches!(err, AutoscaleError::MissingApplication));
        assert!(matches!(
            h.scaler.running_workers().await,
            Err(AutoscaleError::MissingApplication)
        ));
    }

    #[tokio::test]
    async fn running_workers_passes_through() {
        let h = harness();
        assert_eq!(h.scaler.running_workers().await.unwrap(), 2);
    }
}
