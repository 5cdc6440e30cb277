//! Service settings loaded at startup
//!
//! Settings live in a TOML file (`settings.toml` in the app data dir unless a
//! path is given on the command line). Every field has a default, so an empty
//! or partial file is valid:
//!
//! ```toml
//! [listener]
//! port = 8888
//!
//! [store]
//! capacity = 2000
//!
//! [logging]
//! filter = "info,espmon_rs=trace"
//! file_logging = true
//! ```

use crate::error::{EspMonError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed UDP port shared by devices and the hub
pub const DEFAULT_UDP_PORT: u16 = 8888;

/// Default number of samples retained per stream
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Default liveness threshold in milliseconds
pub const DEFAULT_LIVENESS_THRESHOLD_MS: i64 = 30_000;

/// Default status refresh cadence in milliseconds
pub const DEFAULT_STATUS_REFRESH_MS: u64 = 5_000;

/// Top-level service settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub listener: ListenerSettings,
    pub store: StoreSettings,
    pub liveness: LivenessSettings,
    pub dispatch: DispatchSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl HubSettings {
    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| EspMonError::Config(format!("Failed to parse settings: {}", e)))
    }

    /// Load settings from a file; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            EspMonError::Config(format!("Failed to read settings {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Load from the default location, or defaults if the data dir is unknown
    pub fn load_default() -> Result<Self> {
        match super::settings_path() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Serialize settings back to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| EspMonError::Config(format!("Failed to serialize settings: {}", e)))
    }
}

/// UDP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Address to bind
    pub bind_address: IpAddr,
    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,
    /// Capacity of the listener → ingest worker channel
    pub channel_capacity: usize,
    /// Socket read timeout, bounds how long shutdown waits on the receive loop
    pub read_timeout_ms: u64,
    /// Receive buffer size
    pub max_datagram_size: usize,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_UDP_PORT,
            channel_capacity: 1024,
            read_timeout_ms: 100,
            max_datagram_size: 65_535,
        }
    }
}

impl ListenerSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

/// Time-series store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Samples retained per stream
    pub capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Liveness settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSettings {
    /// A device is online if seen or updated within this window
    pub threshold_ms: i64,
    /// How often the status monitor re-evaluates every device
    pub refresh_interval_ms: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_LIVENESS_THRESHOLD_MS,
            refresh_interval_ms: DEFAULT_STATUS_REFRESH_MS,
        }
    }
}

impl LivenessSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }
}

/// Outbound command settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Port commands are sent to on the device
    pub device_port: u16,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            device_port: DEFAULT_UDP_PORT,
        }
    }
}

/// Registry storage settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Override for the registry file (defaults to `config.json` in the app data dir)
    pub registry_path: Option<PathBuf>,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Also write a daily rolling log file
    pub file_logging: bool,
    /// Directory for log files (defaults to `logs/` in the app data dir)
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info,espmon_rs=debug".to_string(),
            file_logging: false,
            log_dir: None,
        }
    }
}
