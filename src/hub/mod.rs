//! Application root
//!
//! [`TelemetryHub`] owns the registry, the store and the liveness and dispatch
//! settings. UI code holds an `Arc<TelemetryHub>` and talks to the registry and
//! store through it; [`TelemetryHub::start`] adds the network side.
//!
//! # Thread Model
//!
//! ```text
//! ┌──────────────┐  bounded   ┌───────────────┐     ┌──────────┐
//! │ udp-listener │──events───>│ ingest-worker │────>│ Registry │──> registry-persist
//! └──────────────┘            └───────────────┘  │  └──────────┘
//!                                                └─>┌──────────┐
//!                              status-monitor ─────>│  Store   │<── UI reads
//!                                                   └──────────┘
//! ```
//!
//! The listener only parses. The single worker resolves and appends, so events
//! are applied in arrival order. Shutdown clears the running flag, joins the
//! listener and worker, stops the monitor and flushes the registry.
//!
//! # Example
//!
//! ```ignore
//! let hub = Arc::new(TelemetryHub::open(HubSettings::load_default()?)?);
//! let running = hub.start()?;
//!
//! for report in running.status_updates().iter() {
//!     println!("{} devices online", report.online_count());
//! }
//! ```

pub mod worker;

pub use worker::IngestWorker;

use crate::config::{ConfigStorage, HubSettings, JsonFileStorage};
use crate::error::{EspMonError, Result};
use crate::liveness::{evaluate_all, LivenessEvaluator, StatusMonitor, StatusReport};
use crate::net::{
    CommandDispatcher, DispatchHandle, ListenerStats, ListenerStatsSnapshot, TelemetryEvent,
    UdpListener,
};
use crate::registry::{Registry, RemovedDevice};
use crate::resolver::{resolve, Resolution};
use crate::store::TimeSeriesStore;
use crate::types::{now_millis, DeviceStatus, EpochMillis, Stream};
use crossbeam_channel::Receiver;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// What happened to one ingested event
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Sample appended to its buffer
    Stored(Resolution),
    /// Pair not registered and auto-detection off; sample discarded
    Dropped(Resolution),
}

impl IngestOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, IngestOutcome::Stored(_))
    }

    pub fn resolution(&self) -> &Resolution {
        match self {
            IngestOutcome::Stored(r) | IngestOutcome::Dropped(r) => r,
        }
    }
}

/// Counters of the ingest path
#[derive(Debug, Default)]
struct IngestStats {
    stored: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of the ingest counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub stored: u64,
    /// Samples for unregistered pairs while auto-detection was off
    pub rejected: u64,
}

/// Owner of the registry, store and related services
pub struct TelemetryHub {
    settings: HubSettings,
    registry: Arc<Registry>,
    store: Arc<TimeSeriesStore>,
    evaluator: LivenessEvaluator,
    dispatcher: CommandDispatcher,
    stats: IngestStats,
}

impl TelemetryHub {
    /// Build a hub over an explicit registry storage
    pub fn new(settings: HubSettings, storage: Box<dyn ConfigStorage>) -> Result<Self> {
        let registry = Arc::new(Registry::open(storage)?);
        let store = Arc::new(TimeSeriesStore::new(settings.store.capacity));

        Ok(Self {
            evaluator: LivenessEvaluator::new(settings.liveness.threshold_ms),
            dispatcher: CommandDispatcher::new(settings.dispatch.device_port),
            settings,
            registry,
            store,
            stats: IngestStats::default(),
        })
    }

    /// Build a hub over the configured (or default) registry file
    pub fn open(settings: HubSettings) -> Result<Self> {
        let storage = match &settings.storage.registry_path {
            Some(path) => JsonFileStorage::new(path),
            None => JsonFileStorage::at_default_location()?,
        };
        Self::new(settings, Box::new(storage))
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<TimeSeriesStore> {
        &self.store
    }

    pub fn evaluator(&self) -> LivenessEvaluator {
        self.evaluator
    }

    pub fn dispatcher(&self) -> CommandDispatcher {
        self.dispatcher
    }

    // ==================== Ingestion ====================

    /// Resolve one event and store its sample if the pair is registered
    pub fn ingest(&self, event: &TelemetryEvent) -> IngestOutcome {
        self.ingest_at(event, now_millis())
    }

    /// [`ingest`](Self::ingest) with an explicit processing time
    pub fn ingest_at(&self, event: &TelemetryEvent, now: EpochMillis) -> IngestOutcome {
        let resolution = resolve(&self.registry, event, now);

        if resolution.accepts_point() {
            self.store.append(&event.key(), event.value, event.timestamp);
            self.stats.stored.fetch_add(1, Ordering::Relaxed);
            IngestOutcome::Stored(resolution)
        } else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "Dropped sample for unregistered {} (auto-detection off)",
                event.key()
            );
            IngestOutcome::Dropped(resolution)
        }
    }

    pub fn ingest_stats(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            stored: self.stats.stored.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn set_buffer_capacity(&self, capacity: usize) {
        self.store.set_capacity(capacity);
    }

    // ==================== Cascading Removal ====================

    /// Remove a device, its streams, its commands and its buffers
    pub fn remove_device(&self, id: &str) -> Result<RemovedDevice> {
        let removed = self.registry.remove_device(id)?;
        let cleared = self.store.clear_device(id);
        tracing::info!("Removed device {} and {} buffers", id, cleared);
        Ok(removed)
    }

    /// Remove a stream and its buffer
    pub fn remove_stream(&self, id: &str) -> Result<Stream> {
        let stream = self.registry.remove_stream(id)?;
        self.store.clear(&stream.key());
        Ok(stream)
    }

    // ==================== Liveness ====================

    pub fn device_status(&self, device_id: &str, now: EpochMillis) -> Option<DeviceStatus> {
        self.registry
            .device(device_id)
            .map(|device| self.evaluator.status(&device, self.store.as_ref(), now))
    }

    pub fn statuses(&self, now: EpochMillis) -> StatusReport {
        evaluate_all(&self.evaluator, &self.registry, &self.store, now)
    }

    // ==================== Commands ====================

    /// Send a payload to a device's last known address
    pub fn send_to_device(
        &self,
        device_id: &str,
        payload: &serde_json::Value,
    ) -> Result<DispatchHandle> {
        let device = self
            .registry
            .device(device_id)
            .ok_or_else(|| EspMonError::not_found("device", device_id))?;
        self.dispatcher.send_to_address(&device.address, payload)
    }

    /// Send a stored command to its device
    pub fn send_command(&self, command_id: &str) -> Result<DispatchHandle> {
        let command = self
            .registry
            .command(command_id)
            .ok_or_else(|| EspMonError::not_found("command", command_id))?;
        let payload = command.parsed_payload()?;
        tracing::info!("Sending '{}' to {}", command.label, command.device_id);
        self.send_to_device(&command.device_id, &payload)
    }

    pub fn send_to_address(
        &self,
        address: &str,
        payload: &serde_json::Value,
    ) -> Result<DispatchHandle> {
        self.dispatcher.send_to_address(address, payload)
    }

    // ==================== Lifecycle ====================

    /// Bind the listener and start the worker and status monitor threads
    ///
    /// Only a failure to bind the UDP port (or to start a thread) is an error.
    pub fn start(self: &Arc<Self>) -> Result<RunningHub> {
        let running = Arc::new(AtomicBool::new(true));
        let (listener, events) = UdpListener::bind(&self.settings.listener, running.clone())?;
        let local_addr = listener.local_addr()?;
        let listener_stats = listener.stats();

        let listener_handle = std::thread::Builder::new()
            .name("udp-listener".to_string())
            .spawn(move || listener.run())?;

        let worker = IngestWorker::new(self.clone(), events, running.clone());
        let worker_handle = std::thread::Builder::new()
            .name("ingest-worker".to_string())
            .spawn(move || worker.run())?;

        let monitor = StatusMonitor::spawn(
            self.evaluator,
            self.registry.clone(),
            self.store.clone(),
            self.settings.liveness.refresh_interval(),
        )?;

        let reports = monitor.reports();

        tracing::info!("Hub listening on {}", local_addr);

        Ok(RunningHub {
            hub: self.clone(),
            running,
            local_addr,
            listener_stats,
            reports,
            listener: Some(listener_handle),
            worker: Some(worker_handle),
            monitor: Some(monitor),
        })
    }
}

/// Network side of a started hub; stopped on [`shutdown`](Self::shutdown) or drop
pub struct RunningHub {
    hub: Arc<TelemetryHub>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    listener_stats: Arc<ListenerStats>,
    reports: Receiver<StatusReport>,
    listener: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
    monitor: Option<StatusMonitor>,
}

impl RunningHub {
    pub fn hub(&self) -> &Arc<TelemetryHub> {
        &self.hub
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn listener_stats(&self) -> ListenerStatsSnapshot {
        self.listener_stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Periodic liveness reports
    pub fn status_updates(&self) -> Receiver<StatusReport> {
        self.reports.clone()
    }

    /// Stop accepting datagrams and wait for all threads
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.listener.is_none() && self.worker.is_none() && self.monitor.is_none() {
            return;
        }
        tracing::info!("Hub shutting down");
        self.running.store(false, Ordering::SeqCst);

        for (name, handle) in [("listener", self.listener.take()), ("worker", self.worker.take())] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    tracing::error!("{} thread panicked", name);
                }
            }
        }

        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }

        self.hub.registry.flush();
        let stats = self.listener_stats.snapshot();
        tracing::info!(
            "Hub stopped: {} datagrams received, {} malformed, {} dropped",
            stats.received,
            stats.malformed,
            stats.dropped
        );
    }
}

impl Drop for RunningHub {
    fn drop(&mut self) {
        self.stop();
    }
}
