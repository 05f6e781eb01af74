//! Single-concurrency background executor for scale decisions.
//!
//! Job hooks run on the enqueue fast path and must not wait on the platform
//! API. The dispatcher queues snapshots on a bounded channel and a single
//! worker task feeds them to [`Autoscaler::scale_with`] one at a time, in
//! submission order. Serialising decisions also keeps throttle races inside
//! one process to zero.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dynoscale_core::QueueSnapshot;

use crate::error::DispatchError;
use crate::scaler::Autoscaler;

/// Handle to the dispatcher worker. Clones share the same queue and worker.
#[derive(Clone)]
pub struct ScaleDispatcher {
    tx: mpsc::Sender<QueueSnapshot>,
    shutdown: Arc<watch::Sender<bool>>,
    worker: Arc<Mutex<Option<JoinHandle<usize>>>>,
}

impl std::fmt::Debug for ScaleDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScaleDispatcher")
            .field("capacity", &self.tx.max_capacity())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl ScaleDispatcher {
    /// Spawn the worker task on the current Tokio runtime.
    ///
    /// `capacity` bounds how many snapshots may wait; zero is treated as one.
    pub fn spawn(autoscaler: Autoscaler, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(autoscaler, rx, shutdown_rx));
        info!(capacity, "scale dispatcher started");

        Self {
            tx,
            shutdown: Arc::new(shutdown_tx),
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Queue a snapshot without waiting.
    pub fn submit(&self, snapshot: QueueSnapshot) -> Result<(), DispatchError> {
        self.tx.try_send(snapshot).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::Full,
            TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    /// Stop accepting snapshots, finish the queued ones, and wait for the
    /// worker. Returns how many snapshots the worker processed in total.
    pub async fn shutdown(&self) -> usize {
        let _ = self.shutdown.send(true);
        let handle = self.worker.lock().await.take();
        match handle {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "scale dispatcher worker panicked");
                0
            }),
            None => 0,
        }
    }
}

async fn run_worker(
    autoscaler: Autoscaler,
    mut rx: mpsc::Receiver<QueueSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut processed = 0;

    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(snapshot) => {
                    process(&autoscaler, snapshot).await;
                    processed += 1;
                }
                None => break,
            },
            _ = shutdown.changed() => {
                rx.close();
                while let Some(snapshot) = rx.recv().await {
                    process(&autoscaler, snapshot).await;
                    processed += 1;
                }
                break;
            }
        }
    }

    info!(processed, "scale dispatcher stopped");
    processed
}

async fn process(autoscaler: &Autoscaler, snapshot: QueueSnapshot) {
    match autoscaler.scale_with(&snapshot).await {
        Ok(decision) => debug!(?decision, ?snapshot, "dispatched scale decision"),
        Err(e) => warn!(error = %e, ?snapshot, "dispatched scale decision failed"),
    }
}
