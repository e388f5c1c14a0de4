//! Single-consumer event dispatch.
//!
//! Producers push [`MetricsEvent`]s into a bounded queue; one spawned task
//! drains it and calls every registered [`Observer`] in registration order
//! before taking the next event.  All observers therefore see the same
//! totally ordered stream.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::error::{MetricsError, MetricsResult};
use super::event::MetricsEvent;

/// Anything that wants to see the event stream.
///
/// Called synchronously on the dispatch task; keep it short.
pub trait Observer: Send + Sync {
    fn observe(&self, event: &MetricsEvent);
}

/// Collects observers, then spawns the dispatch loop with [`EventBus::start`].
pub struct EventBus {
    observers: Vec<Arc<dyn Observer>>,
    capacity: usize,
}

/// Cloneable producer side of the queue.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<MetricsEvent>,
    capacity: usize,
}

/// Owns the dispatch task.  Dropping it also stops dispatch, without
/// waiting for the loop to exit.
pub struct BusHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> MetricsResult<Self> {
        if capacity == 0 {
            return Err(MetricsError::InvalidQueueCapacity(capacity));
        }
        Ok(Self {
            observers: Vec::new(),
            capacity,
        })
    }

    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Spawn the dispatch loop.  Must be called inside a tokio runtime.
    pub fn start(self) -> (EventSender, BusHandle) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let (stop, stop_rx) = watch::channel(false);

        tracing::debug!(
            observers = self.observers.len(),
            capacity = self.capacity,
            "event bus started"
        );
        let task = tokio::spawn(dispatch(rx, stop_rx, self.observers));

        (
            EventSender {
                tx,
                capacity: self.capacity,
            },
            BusHandle { stop, task },
        )
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<MetricsEvent>,
    mut stop: watch::Receiver<bool>,
    observers: Vec<Arc<dyn Observer>>,
) -> u64 {
    let mut dispatched = 0u64;

    loop {
        tokio::select! {
            biased;

            // Only `true` is ever sent; a dropped handle also lands here
            _ = stop.changed() => break,
            next = rx.recv() => {
                let Some(event) = next else { break };
                for obs in &observers {
                    obs.observe(&event);
                }
                dispatched += 1;
            }
        }
    }

    tracing::debug!(dispatched, dropped = rx.len(), "event bus stopped");
    dispatched
}

impl EventSender {
    /// Enqueue, waiting for room when the queue is full.
    pub async fn send(&self, event: MetricsEvent) -> MetricsResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| MetricsError::BusClosed)
    }

    /// Enqueue without waiting; a full queue drops the event.
    pub fn try_send(&self, event: MetricsEvent) -> MetricsResult<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MetricsError::QueueFull(self.capacity),
            mpsc::error::TrySendError::Closed(_) => MetricsError::BusClosed,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl BusHandle {
    /// Stop dispatching and wait for the loop to exit.  Events still
    /// queued are dropped.  Returns how many events were dispatched.
    pub async fn shutdown(self) -> u64 {
        let _ = self.stop.send(true);
        match self.task.await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("event bus task failed: {e}");
                0
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
