//! Shared test doubles for the autoscale integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dynoscale_autoscale::Autoscaler;
use dynoscale_core::{ClientFuture, JobWorkerRatio, QueueSnapshot, ScalerConfig, ScalingClient};
use dynoscale_state::StateStore;

/// Records every scale call; optionally slow or failing.
#[derive(Default)]
pub struct RecordingClient {
    pub calls: Mutex<Vec<u32>>,
    pub fail: AtomicBool,
    pub delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl RecordingClient {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn targets(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

impl ScalingClient for RecordingClient {
    fn scale_workers<'a>(&'a self, _application: &'a str, quantity: u32) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(quantity);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("platform api unavailable");
            }
            Ok(())
        })
    }

    fn running_workers<'a>(&'a self, _application: &'a str) -> ClientFuture<'a, u32> {
        Box::pin(async move { Ok(self.calls.lock().unwrap().last().copied().unwrap_or(0)) })
    }
}

pub fn test_config() -> ScalerConfig {
    let mut config = ScalerConfig::from_lookup(|_| None);
    config.enabled = true;
    config.application = Some("my-app".to_string());
    config.max_workers = 5;
    config.min_workers = 0;
    config.job_worker_ratio =
        JobWorkerRatio::new([(1, 1), (2, 25), (3, 50), (4, 75), (5, 100)]).unwrap();
    config.throttle_window = Duration::from_secs(30);
    config.scale_down_settle = Duration::ZERO;
    config
}

pub fn autoscaler(
    config: ScalerConfig,
    client: Arc<RecordingClient>,
) -> (Autoscaler, StateStore) {
    let store = StateStore::open_in_memory().unwrap();
    let scaler = Autoscaler::new(Arc::new(config), client, Arc::new(store.clone()));
    (scaler, store)
}

/// Like [`autoscaler`], but expiry follows a hand-driven millisecond clock.
pub fn autoscaler_with_clock(
    config: ScalerConfig,
    client: Arc<RecordingClient>,
) -> (Autoscaler, Arc<AtomicU64>) {
    let now = Arc::new(AtomicU64::new(1_000_000));
    let clock = now.clone();
    let store = StateStore::open_in_memory()
        .unwrap()
        .with_clock(Arc::new(move || clock.load(Ordering::SeqCst)));
    let scaler = Autoscaler::new(Arc::new(config), client, Arc::new(store));
    (scaler, now)
}

pub fn advance(clock: &AtomicU64, by: Duration) {
    clock.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
}

/// Poll until `client` has seen `n` calls or the deadline passes.
pub async fn wait_for_calls(client: &RecordingClient, n: usize) {
    for _ in 0..200 {
        if client.calls.lock().unwrap().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {n} calls, saw {:?}",
        client.calls.lock().unwrap().as_slice()
    );
}

pub fn snap(workers: u32, pending: u32, working: u32) -> QueueSnapshot {
    QueueSnapshot::new(workers, pending, working)
}
