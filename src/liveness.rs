//! Device liveness
//!
//! [`LivenessEvaluator::evaluate`] is a pure function of a device, the
//! `lastUpdate` of its stream buffers and the current time:
//!
//! | Condition                                                        | Status    |
//! |------------------------------------------------------------------|-----------|
//! | `lastSeen` never recorded                                        | `unknown` |
//! | `lastSeen` or any buffer update within `threshold` of `now`      | `online`  |
//! | otherwise                                                        | `offline` |
//!
//! The result is relative to `now` and goes stale, so [`StatusMonitor`]
//! re-evaluates every device on a fixed cadence and publishes the results.

use crate::config::{DEFAULT_LIVENESS_THRESHOLD_MS, DEFAULT_STATUS_REFRESH_MS};
use crate::error::{EspMonError, Result};
use crate::registry::Registry;
use crate::store::{StreamRecency, TimeSeriesStore};
use crate::types::{now_millis, Device, DeviceStatus, EpochMillis};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Classifies devices as unknown, online or offline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessEvaluator {
    threshold_ms: i64,
}

impl Default for LivenessEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_LIVENESS_THRESHOLD_MS)
    }
}

impl LivenessEvaluator {
    pub fn new(threshold_ms: i64) -> Self {
        Self { threshold_ms }
    }

    pub fn threshold_ms(&self) -> i64 {
        self.threshold_ms
    }

    /// Within the threshold on either side of `now`
    fn is_recent(&self, timestamp: EpochMillis, now: EpochMillis) -> bool {
        now.saturating_sub(timestamp).saturating_abs() < self.threshold_ms
    }

    /// Classify a device given the `lastUpdate` of each of its buffers
    pub fn evaluate(
        &self,
        device: &Device,
        stream_updates: &[EpochMillis],
        now: EpochMillis,
    ) -> DeviceStatus {
        let Some(last_seen) = device.last_seen else {
            return DeviceStatus::Unknown;
        };

        if self.is_recent(last_seen, now)
            || stream_updates.iter().any(|&t| self.is_recent(t, now))
        {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        }
    }

    /// Classify a device, reading its buffers from `recency`
    pub fn status(
        &self,
        device: &Device,
        recency: &impl StreamRecency,
        now: EpochMillis,
    ) -> DeviceStatus {
        let updates = recency.last_updates_for_device(&device.id);
        self.evaluate(device, &updates, now)
    }
}

/// Status of every registered device at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub evaluated_at: EpochMillis,
    pub statuses: Vec<(String, DeviceStatus)>,
}

impl StatusReport {
    pub fn status_of(&self, device_id: &str) -> Option<DeviceStatus> {
        self.statuses
            .iter()
            .find(|(id, _)| id == device_id)
            .map(|(_, status)| *status)
    }

    pub fn online_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|(_, s)| *s == DeviceStatus::Online)
            .count()
    }
}

/// Evaluate every registered device
pub fn evaluate_all(
    evaluator: &LivenessEvaluator,
    registry: &Registry,
    store: &TimeSeriesStore,
    now: EpochMillis,
) -> StatusReport {
    let statuses = registry
        .devices()
        .into_iter()
        .map(|device| {
            let status = evaluator.status(&device, store, now);
            (device.id, status)
        })
        .collect();

    StatusReport {
        evaluated_at: now,
        statuses,
    }
}

/// Periodic re-evaluation thread
pub struct StatusMonitor {
    stop_tx: Option<Sender<()>>,
    reports: Receiver<StatusReport>,
    handle: Option<JoinHandle<()>>,
}

impl StatusMonitor {
    /// Start re-evaluating every `interval`
    ///
    /// Reports are published on a small bounded channel; when nobody drains
    /// it the oldest pending report is kept and new ones are skipped.
    pub fn spawn(
        evaluator: LivenessEvaluator,
        registry: Arc<Registry>,
        store: Arc<TimeSeriesStore>,
        interval: Duration,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (report_tx, reports) = bounded(16);

        let handle = std::thread::Builder::new()
            .name("status-monitor".to_string())
            .spawn(move || {
                let mut previous: HashMap<String, DeviceStatus> = HashMap::new();
                loop {
                    let report = evaluate_all(&evaluator, &registry, &store, now_millis());
                    log_transitions(&mut previous, &report);
                    let _ = report_tx.try_send(report);

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Status monitor stopped");
            })
            .map_err(|e| EspMonError::Channel(format!("Failed to start status monitor: {}", e)))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            reports,
            handle: Some(handle),
        })
    }

    /// Start with the default 5 s cadence
    pub fn spawn_default(registry: Arc<Registry>, store: Arc<TimeSeriesStore>) -> Result<Self> {
        Self::spawn(
            LivenessEvaluator::default(),
            registry,
            store,
            Duration::from_millis(DEFAULT_STATUS_REFRESH_MS),
        )
    }

    /// Receiver of periodic reports
    pub fn reports(&self) -> Receiver<StatusReport> {
        self.reports.clone()
    }

    /// Stop the timer and wait for the thread
    pub fn stop(&mut self) {
        // Dropping the sender wakes the thread
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Status monitor thread panicked");
            }
        }
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn log_transitions(previous: &mut HashMap<String, DeviceStatus>, report: &StatusReport) {
    for (id, status) in &report.statuses {
        match previous.insert(id.clone(), *status) {
            Some(old) if old != *status => {
                tracing::info!("Device {} is now {} (was {})", id, status, old)
            }
            None if *status != DeviceStatus::Unknown => {
                tracing::debug!("Device {} is {}", id, status)
            }
            _ => {}
        }
    }
    previous.retain(|id, _| report.statuses.iter().any(|(known, _)| known == id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamKey;

    const NOW: EpochMillis = 1_700_000_000_000;

    struct FixedRecency(Vec<EpochMillis>);

    impl StreamRecency for FixedRecency {
        fn last_updates_for_device(&self, _device_id: &str) -> Vec<EpochMillis> {
            self.0.clone()
        }
    }

    fn device(last_seen: Option<EpochMillis>) -> Device {
        let device = Device::new("x", "ESP32 x", "10.0.0.5");
        match last_seen {
            Some(t) => device.with_last_seen(t),
            None => device,
        }
    }

    #[test]
    fn test_never_seen_is_unknown() {
        let evaluator = LivenessEvaluator::default();
        assert_eq!(
            evaluator.evaluate(&device(None), &[NOW], NOW),
            DeviceStatus::Unknown
        );
    }

    #[test]
    fn test_threshold_boundaries() {
        let evaluator = LivenessEvaluator::default();
        assert_eq!(
            evaluator.evaluate(&device(Some(NOW - 29_000)), &[], NOW),
            DeviceStatus::Online
        );
        assert_eq!(
            evaluator.evaluate(&device(Some(NOW - 31_000)), &[], NOW),
            DeviceStatus::Offline
        );
        // Exactly at the threshold is no longer recent
        assert_eq!(
            evaluator.evaluate(&device(Some(NOW - 30_000)), &[], NOW),
            DeviceStatus::Offline
        );
    }

    #[test]
    fn test_recent_stream_update_keeps_online() {
        let evaluator = LivenessEvaluator::default();
        let recency = FixedRecency(vec![NOW - 120_000, NOW - 1_000]);
        assert_eq!(
            evaluator.status(&device(Some(NOW - 60_000)), &recency, NOW),
            DeviceStatus::Online
        );

        let stale = FixedRecency(vec![NOW - 120_000]);
        assert_eq!(
            evaluator.status(&device(Some(NOW - 60_000)), &stale, NOW),
            DeviceStatus::Offline
        );
    }

    #[test]
    fn test_future_stream_update_does_not_keep_online() {
        let evaluator = LivenessEvaluator::default();
        let ahead = FixedRecency(vec![NOW + 3_600_000]);
        assert_eq!(
            evaluator.status(&device(Some(NOW - 60_000)), &ahead, NOW),
            DeviceStatus::Offline
        );

        // Small clock skew still counts as recent
        let skewed = FixedRecency(vec![NOW + 2_000]);
        assert_eq!(
            evaluator.status(&device(Some(NOW - 60_000)), &skewed, NOW),
            DeviceStatus::Online
        );
    }

    #[test]
    fn test_custom_threshold() {
        let evaluator = LivenessEvaluator::new(5_000);
        assert_eq!(
            evaluator.evaluate(&device(Some(NOW - 6_000)), &[], NOW),
            DeviceStatus::Offline
        );
    }

    #[test]
    fn test_status_uses_store_buffers_of_device_only() {
        let evaluator = LivenessEvaluator::default();
        let store = TimeSeriesStore::new(10);
        store.append(&StreamKey::new("other", "temp"), 1.0, NOW);
        assert_eq!(
            evaluator.status(&device(Some(NOW - 60_000)), &store, NOW),
            DeviceStatus::Offline
        );

        store.append(&StreamKey::new("x", "temp"), 1.0, NOW - 10);
        assert_eq!(
            evaluator.status(&device(Some(NOW - 60_000)), &store, NOW),
            DeviceStatus::Online
        );
    }

    #[test]
    fn test_report_helpers() {
        let report = StatusReport {
            evaluated_at: NOW,
            statuses: vec![
                ("a".to_string(), DeviceStatus::Online),
                ("b".to_string(), DeviceStatus::Offline),
            ],
        };
        assert_eq!(report.status_of("b"), Some(DeviceStatus::Offline));
        assert_eq!(report.status_of("c"), None);
        assert_eq!(report.online_count(), 1);
    }
}
