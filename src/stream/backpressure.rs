//! Backpressure handling at the intake boundary
//!
//! Ingestion polls the chain and may deliver bursts. The core is a single
//! consumer, so the only coordination point is this bounded queue: when it
//! is full the producer either stalls or a transfer is discarded, never
//! unbounded growth.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::DropPolicy;
use crate::error::{Error, Result};

/// What happened to a transfer offered to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Queued without loss
    Queued,
    /// Queued after discarding the oldest entry
    DroppedOldest,
    /// Not queued
    DroppedIncoming,
}

struct QueueState<T> {
    buffer: VecDeque<T>,
    closed: bool,
}

/// Bounded single-consumer queue with a configurable full-queue policy
pub struct IntakeQueue<T> {
    capacity: usize,
    drop_policy: DropPolicy,
    state: Mutex<QueueState<T>>,
    item_ready: Notify,
    space_ready: Notify,
    dropped_count: AtomicU64,
}

impl<T: Send> IntakeQueue<T> {
    /// Create a new intake queue
    pub fn new(capacity: usize, drop_policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            drop_policy,
            state: Mutex::new(QueueState {
                buffer: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            dropped_count: AtomicU64::new(0),
        }
    }

    /// Offer an item to the queue.
    ///
    /// With [`DropPolicy::Block`] this waits for the consumer to free a slot.
    pub async fn send(&self, item: T) -> Result<Admission> {
        let mut item = Some(item);
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.closed {
                    return Err(Error::QueueClosed);
                }

                let mut admission = Admission::Queued;
                if state.buffer.len() >= self.capacity {
                    match self.drop_policy {
                        DropPolicy::DropOldest => {
                            state.buffer.pop_front();
                            self.dropped_count.fetch_add(1, Ordering::Relaxed);
                            debug!("Dropped oldest queued transfer due to backpressure");
                            admission = Admission::DroppedOldest;
                        }
                        DropPolicy::DropNewest => {
                            self.dropped_count.fetch_add(1, Ordering::Relaxed);
                            debug!("Dropped incoming transfer due to backpressure");
                            return Ok(Admission::DroppedIncoming);
                        }
                        DropPolicy::Block => {
                            // Fall through to wait for space
                            admission = Admission::DroppedIncoming;
                        }
                    }
                }

                if admission != Admission::DroppedIncoming {
                    if let Some(item) = item.take() {
                        state.buffer.push_back(item);
                    }
                    drop(state);
                    self.item_ready.notify_one();
                    return Ok(admission);
                }
            }

            debug!("Intake queue full, producer stalled");
            self.space_ready.notified().await;
        }
    }

    /// Receive the next item; `None` once the queue is closed and drained
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(item) = state.buffer.pop_front() {
                    drop(state);
                    self.space_ready.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.item_ready.notified().await;
        }
    }

    /// Try to receive without waiting
    pub fn try_recv(&self) -> Option<T> {
        let item = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .buffer
            .pop_front();
        if item.is_some() {
            self.space_ready.notify_one();
        }
        item
    }

    /// Stop accepting items; queued items can still be drained
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.closed {
            state.closed = true;
            if !state.buffer.is_empty() {
                warn!("Intake closed with {} transfers still queued", state.buffer.len());
            }
        }
        drop(state);
        self.item_ready.notify_one();
        self.space_ready.notify_one();
    }

    /// Get current buffer size
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.buffer.len())
            .unwrap_or(0)
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get number of dropped items
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Get capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get utilization percentage
    pub fn utilization(&self) -> f64 {
        (self.len() as f64 / self.capacity as f64) * 100.0
    }
}
