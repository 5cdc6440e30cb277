//! # EspMon-RS: ESP32 UDP Telemetry Hub
//!
//! Collects numeric telemetry sent over UDP by a fleet of ESP32 sensor nodes,
//! keeps a bounded time series per `(device, stream)` pair in memory,
//! auto-registers unseen devices and streams, tracks device liveness and sends
//! JSON commands back to devices.
//!
//! ## Architecture
//!
//! - **Listener**: Parses datagrams on a dedicated thread into a bounded channel
//! - **Ingest worker**: Resolves each event against the registry, then appends to the store
//! - **Registry**: Devices, streams and commands, persisted in the background on every change
//! - **Store**: FIFO ring buffers per stream, readable concurrently with ingestion
//! - **Liveness**: Pure online/offline evaluation plus a periodic status monitor
//! - **Communication**: Crossbeam channels between every thread
//!
//! ## Configuration
//!
//! The registry (`config.json`) and service settings (`settings.toml`) live in
//! the platform-appropriate data directory under `dev.espmon.espmon-rs`:
//!
//! - **Linux**: `~/.local/share/dev.espmon.espmon-rs/`
//! - **macOS**: `~/Library/Application Support/dev.espmon.espmon-rs/`
//! - **Windows**: `%APPDATA%\dev.espmon.espmon-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use espmon_rs::{HubSettings, StreamKey, TelemetryHub};
//! use std::sync::Arc;
//!
//! fn main() -> espmon_rs::Result<()> {
//!     let hub = Arc::new(TelemetryHub::open(HubSettings::load_default()?)?);
//!     let running = hub.start()?;
//!
//!     // UI side: poll the store and liveness
//!     let key = StreamKey::new("esp32-salon", "temperature");
//!     if let Some(snapshot) = hub.store().read(&key) {
//!         println!("{} points, latest {:?}", snapshot.points.len(), snapshot.latest());
//!     }
//!
//!     running.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod liveness;
pub mod net;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigStorage, HubSettings, JsonFileStorage, RegistryConfig};
pub use error::{EspMonError, Result, ResultExt};
pub use hub::{IngestOutcome, RunningHub, TelemetryHub};
pub use liveness::{LivenessEvaluator, StatusMonitor, StatusReport};
pub use net::{CommandDispatcher, DispatchHandle, TelemetryEvent};
pub use registry::{CommandUpdate, DeviceUpdate, Registry, StreamUpdate};
pub use store::{StreamSnapshot, TimeSeriesStore};
pub use types::{Command, DataPoint, Device, DeviceStatus, DisplayMode, Stream, StreamKey};
