//! Bounded relay queue drained by a fixed pool of workers.
//!
//! Request handlers hand events to [`RelayQueue::enqueue`], which never
//! waits: a full queue rejects the job instead of stalling the request. The
//! event row is already durable at that point, so a dropped job costs one
//! relay, not the event. Workers share one receiver and run each event's
//! attempt sequence to completion before taking the next.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use conduit_core::Event;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Mutex,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{RelayError, Result},
    relay::Relayer,
};

/// Queue and pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayQueueConfig {
    /// Maximum queued events.
    pub capacity: usize,
    /// Number of workers.
    pub worker_count: usize,
    /// How long shutdown waits for in-flight relays.
    pub shutdown_timeout: Duration,
}

impl Default for RelayQueueConfig {
    fn default() -> Self {
        Self { capacity: 10_000, worker_count: 4, shutdown_timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
}

/// Producer side of the relay queue.
#[derive(Debug, Clone)]
pub struct RelayQueue {
    sender: mpsc::Sender<Event>,
    counters: Arc<QueueCounters>,
}

impl RelayQueue {
    /// Queues an event for relay without waiting.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::QueueFull` when at capacity and
    /// `RelayError::Internal` once the pool has shut down.
    pub fn enqueue(&self, event: Event) -> Result<()> {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(TrySendError::Full(event)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    tenant_key = %event.tenant_key,
                    event_id = %event.event_id,
                    capacity = self.sender.max_capacity(),
                    "relay queue full, relay skipped"
                );
                Err(RelayError::QueueFull { capacity: self.sender.max_capacity() })
            },
            Err(TrySendError::Closed(event)) => {
                warn!(
                    tenant_key = %event.tenant_key,
                    event_id = %event.event_id,
                    "relay queue closed, relay skipped"
                );
                Err(RelayError::internal("relay queue closed"))
            },
        }
    }

    /// Events waiting for a worker.
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Events accepted so far.
    pub fn enqueued(&self) -> u64 {
        self.counters.enqueued.load(Ordering::Relaxed)
    }

    /// Events rejected because the queue was full.
    pub fn rejected(&self) -> u64 {
        self.counters.rejected.load(Ordering::Relaxed)
    }
}

/// Fixed set of relay workers.
pub struct WorkerPool {
    config: RelayQueueConfig,
    relayer: Arc<Relayer>,
    receiver: Arc<Mutex<mpsc::Receiver<Event>>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates the pool and the queue feeding it. Workers start on
    /// [`Self::spawn_workers`].
    pub fn new(
        relayer: Arc<Relayer>,
        config: RelayQueueConfig,
        cancellation_token: CancellationToken,
    ) -> (Self, RelayQueue) {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));

        let pool = Self {
            config,
            relayer,
            receiver: Arc::new(Mutex::new(receiver)),
            cancellation_token,
            worker_handles: Vec::new(),
        };
        let queue = RelayQueue { sender, counters: Arc::new(QueueCounters::default()) };

        (pool, queue)
    }

    /// Spawns the configured number of workers.
    pub fn spawn_workers(&mut self) {
        info!(worker_count = self.config.worker_count, "spawning relay workers");

        for worker_id in 0..self.config.worker_count.max(1) {
            let relayer = self.relayer.clone();
            let receiver = self.receiver.clone();
            let token = self.cancellation_token.clone();

            self.worker_handles.push(tokio::spawn(async move {
                debug!(worker_id, "relay worker starting");
                run_worker(worker_id, relayer, receiver, token).await;
                debug!(worker_id, "relay worker stopped");
            }));
        }
    }

    /// Returns true while any worker task is alive.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }

    /// Stops taking new events and waits for in-flight relays.
    ///
    /// Events still queued are abandoned; their rows remain stored.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ShutdownTimeout` if workers are still busy when
    /// the configured timeout elapses. Those workers are aborted.
    pub async fn shutdown_graceful(mut self) -> Result<()> {
        let timeout = self.config.shutdown_timeout;
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful relay shutdown"
        );

        self.cancellation_token.cancel();
        let handles = std::mem::take(&mut self.worker_handles);
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let join_all = async {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "relay worker panicked");
                }
            }
        };

        if tokio::time::timeout(timeout, join_all).await.is_ok() {
            info!("relay worker pool shutdown completed");
            Ok(())
        } else {
            error!(
                timeout_seconds = timeout.as_secs(),
                "relay shutdown timed out, abandoning in-flight relays"
            );
            for abort in aborts {
                abort.abort();
            }
            Err(RelayError::ShutdownTimeout { timeout_seconds: timeout.as_secs() })
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        if active > 0 && !self.cancellation_token.is_cancelled() {
            warn!(active_workers = active, "worker pool dropped without shutdown, cancelling");
            self.cancellation_token.cancel();
        }
    }
}

async fn run_worker(
    worker_id: usize,
    relayer: Arc<Relayer>,
    receiver: Arc<Mutex<mpsc::Receiver<Event>>>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => None,
            event = async { receiver.lock().await.recv().await } => event,
        };

        let Some(event) = next else {
            break;
        };

        debug!(worker_id, event_id = %event.event_id, "relay picked up");
        relayer.relay(&event).await;
    }
}
