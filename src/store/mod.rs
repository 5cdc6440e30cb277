//! Bounded per-stream time-series storage
//!
//! Every `(device id, stream id)` pair gets its own FIFO ring buffer of
//! [`DataPoint`]s, created on first append. The capacity is store-wide and can
//! be changed at runtime; a new capacity is applied on the next append to a
//! buffer, existing buffers are not truncated eagerly.
//!
//! Writes are serialized through one `RwLock`; readers get cloned snapshots,
//! so a UI can hold on to a [`StreamSnapshot`] while ingestion continues.
//!
//! # Subscriptions
//!
//! [`TimeSeriesStore::subscribe`] hands out a bounded channel receiving every
//! accepted [`Sample`]. Subscribers that fall behind lose samples rather than
//! stalling ingestion; dropped receivers are pruned on the next append.

use crate::config::DEFAULT_BUFFER_CAPACITY;
use crate::types::{DataPoint, EpochMillis, StreamKey};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

/// Per-subscriber channel capacity
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

/// Ring buffer for a single stream
#[derive(Debug, Clone, Default)]
pub struct StreamBuffer {
    points: VecDeque<DataPoint>,
    last_update: EpochMillis,
}

impl StreamBuffer {
    /// Append a point and evict from the front until `len <= capacity`
    fn push(&mut self, point: DataPoint, capacity: usize) {
        self.points.push_back(point);
        while self.points.len() > capacity {
            self.points.pop_front();
        }
        self.last_update = point.timestamp;
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_update(&self) -> EpochMillis {
        self.last_update
    }

    pub fn last(&self) -> Option<&DataPoint> {
        self.points.back()
    }
}

/// Immutable copy of a buffer at read time
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    pub key: StreamKey,
    /// Points in arrival order, oldest first
    pub points: Vec<DataPoint>,
    /// Timestamp of the most recently accepted point
    pub last_update: EpochMillis,
}

impl StreamSnapshot {
    pub fn latest(&self) -> Option<&DataPoint> {
        self.points.last()
    }

    /// Get the value range of the data
    pub fn value_range(&self) -> Option<(f64, f64)> {
        if self.points.is_empty() {
            return None;
        }
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for dp in &self.points {
            min = min.min(dp.value);
            max = max.max(dp.value);
        }
        Some((min, max))
    }
}

/// A sample accepted by the store, as delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub key: StreamKey,
    pub point: DataPoint,
}

/// Read access to per-stream recency, consumed by the liveness evaluator
pub trait StreamRecency {
    /// `last_update` of every buffer owned by `device_id`
    fn last_updates_for_device(&self, device_id: &str) -> Vec<EpochMillis>;
}

/// Store of bounded per-stream buffers
#[derive(Debug)]
pub struct TimeSeriesStore {
    buffers: RwLock<HashMap<StreamKey, StreamBuffer>>,
    capacity: AtomicUsize,
    subscribers: Mutex<Vec<Sender<Sample>>>,
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl TimeSeriesStore {
    /// Create a store; a capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity: AtomicUsize::new(capacity.max(1)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Change the capacity used by subsequent appends
    pub fn set_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        let previous = self.capacity.swap(capacity, Ordering::SeqCst);
        if previous != capacity {
            tracing::debug!("Store capacity changed {} -> {}", previous, capacity);
        }
    }

    /// Append a sample, creating the buffer on first use
    pub fn append(&self, key: &StreamKey, value: f64, timestamp: EpochMillis) {
        let point = DataPoint::new(timestamp, value);
        let capacity = self.capacity();
        {
            let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
            match buffers.get_mut(key) {
                Some(buffer) => buffer.push(point, capacity),
                None => {
                    let mut buffer = StreamBuffer::default();
                    buffer.push(point, capacity);
                    buffers.insert(key.clone(), buffer);
                }
            }
        }
        tracing::trace!("{} <- {} @ {}", key, value, timestamp);
        self.notify(key, point);
    }

    /// Snapshot of one buffer, `None` if it was never populated
    pub fn read(&self, key: &StreamKey) -> Option<StreamSnapshot> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers.get(key).map(|buffer| StreamSnapshot {
            key: key.clone(),
            points: buffer.points.iter().copied().collect(),
            last_update: buffer.last_update,
        })
    }

    /// Newest point of one buffer
    pub fn latest(&self, key: &StreamKey) -> Option<DataPoint> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers.get(key).and_then(|b| b.last().copied())
    }

    /// `last_update` of one buffer
    pub fn last_update(&self, key: &StreamKey) -> Option<EpochMillis> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers.get(key).map(|b| b.last_update)
    }

    /// Delete a buffer entirely. Returns whether it existed.
    pub fn clear(&self, key: &StreamKey) -> bool {
        let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
        buffers.remove(key).is_some()
    }

    /// Delete every buffer owned by a device. Returns how many were removed.
    pub fn clear_device(&self, device_id: &str) -> usize {
        let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
        let before = buffers.len();
        buffers.retain(|key, _| key.device_id != device_id);
        before - buffers.len()
    }

    /// Delete all buffers
    pub fn clear_all(&self) {
        let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
        buffers.clear();
    }

    /// Keys of all populated buffers, sorted
    pub fn keys(&self) -> Vec<StreamKey> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<_> = buffers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.buffers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every sample accepted from now on
    pub fn subscribe(&self) -> Receiver<Sample> {
        let (tx, rx) = bounded(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn notify(&self, key: &StreamKey, point: DataPoint) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| {
            match tx.try_send(Sample {
                key: key.clone(),
                point,
            }) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::trace!("Subscriber lagging, dropped sample for {}", key);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }
}

impl StreamRecency for TimeSeriesStore {
    fn last_updates_for_device(&self, device_id: &str) -> Vec<EpochMillis> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers
            .iter()
            .filter(|(key, _)| key.device_id == device_id)
            .map(|(_, buffer)| buffer.last_update)
            .collect()
    }
}
