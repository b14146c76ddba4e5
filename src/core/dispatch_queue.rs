//! FIFO admission queue for stream requests
//!
//! Requests are accepted without blocking the caller and started in arrival
//! order by a single dispatcher task. A semaphore caps how many run at once;
//! the permit travels with the spawned execution and is released when it
//! finishes, whether it returns or panics.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Weak,
};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, warn};

use crate::{config::QueueConfig, protocols::ws::StreamRequest};

/// Runs one dequeued stream request to completion.
#[async_trait]
pub trait StreamExecutor: Send + Sync {
    async fn execute(&self, connection_id: &str, request: StreamRequest);
}

#[derive(Debug)]
pub struct QueueItem {
    pub connection_id: String,
    pub request: StreamRequest,
    /// Fired once the execution has finished
    pub on_complete: Option<oneshot::Sender<()>>,
}

impl QueueItem {
    pub fn new(connection_id: impl Into<String>, request: StreamRequest) -> Self {
        Self {
            connection_id: connection_id.into(),
            request,
            on_complete: None,
        }
    }

    /// Attach a completion notification, returning its receiving end.
    pub fn with_completion(mut self) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        self.on_complete = Some(tx);
        (self, rx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueLoad {
    pub pending: usize,
    pub in_flight: usize,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Dispatch queue is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight count when an execution ends, including by panic.
struct InFlightGuard {
    counters: Arc<Counters>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    counters: Arc<Counters>,
    max_concurrent: usize,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("load", &self.load())
            .finish()
    }
}

impl DispatchQueue {
    /// Create the queue and spawn its dispatcher.
    ///
    /// The executor is held weakly so that the owner of the queue can also be
    /// its executor; once it is dropped, remaining items are discarded.
    pub fn new(config: &QueueConfig, executor: Weak<dyn StreamExecutor>) -> Arc<Self> {
        let max_concurrent = config.max_concurrent.max(1);
        let (tx, mut rx) = mpsc::unbounded_channel::<QueueItem>();
        let counters = Arc::new(Counters::default());
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        debug!(max_concurrent, "Initializing dispatch queue");

        let queue = Arc::new(Self {
            tx,
            counters: counters.clone(),
            max_concurrent,
        });

        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                // Blocks while the concurrency cap is reached
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    error!("Semaphore closed, stopping dispatcher");
                    break;
                };
                counters.pending.fetch_sub(1, Ordering::AcqRel);

                let Some(executor) = executor.upgrade() else {
                    warn!(
                        connection_id = %item.connection_id,
                        "Executor dropped, discarding queued request"
                    );
                    continue;
                };

                counters.in_flight.fetch_add(1, Ordering::AcqRel);
                let guard = InFlightGuard {
                    counters: counters.clone(),
                    _permit: permit,
                };

                tokio::spawn(async move {
                    let QueueItem {
                        connection_id,
                        request,
                        on_complete,
                    } = item;
                    debug!(%connection_id, model = %request.model, "Dispatching stream request");
                    executor.execute(&connection_id, request).await;
                    drop(guard);
                    if let Some(done) = on_complete {
                        let _ = done.send(());
                    }
                });
            }

            debug!("Dispatch queue stopped");
        });

        queue
    }

    /// Append a request. Never waits for capacity.
    pub fn enqueue(&self, item: QueueItem) -> Result<(), QueueError> {
        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(item).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueError::Closed);
        }
        debug!(load = ?self.load(), "Stream request queued");
        Ok(())
    }

    pub fn load(&self) -> QueueLoad {
        QueueLoad {
            pending: self.counters.pending.load(Ordering::Acquire),
            in_flight: self.counters.in_flight.load(Ordering::Acquire),
            max_concurrent: self.max_concurrent,
        }
    }
}
