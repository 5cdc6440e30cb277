//! Configuration module for EspMon-RS
//!
//! This module handles the persisted registry and the service settings:
//! - Registry file (`config.json`) holding devices, streams, commands and the
//!   auto-detection flag
//! - Import/export of the same schema at user-chosen paths
//! - Service settings (`settings.toml`), see [`settings`]
//!
//! # App Data Location
//!
//! Application data is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.espmon.espmon-rs/`
//! - **macOS**: `~/Library/Application Support/dev.espmon.espmon-rs/`
//! - **Windows**: `%APPDATA%\dev.espmon.espmon-rs\`
//!
//! # Registry File Format
//!
//! ```json
//! {
//!   "esp32s": [{ "id": "esp32-1", "name": "ESP32 Salon", "ip": "192.168.1.20", "color": "#3b82f6" }],
//!   "streams": [{ "id": "stream-1", "esp32Id": "esp32-1", "streamId": "temperature",
//!                 "nickname": "Temperature", "displayMode": "line", "unit": "°C" }],
//!   "commands": [],
//!   "autoDetection": true
//! }
//! ```
//!
//! Files written by older versions may lack `commands` or `autoDetection`;
//! those default to an empty list and `true`.

pub mod settings;

pub use settings::*;

use crate::error::{EspMonError, Result};
use crate::types::{validate_payload, Command, Device, Stream};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.espmon.espmon-rs";

/// Registry filename
pub const REGISTRY_FILE: &str = "config.json";

/// Service settings filename
pub const SETTINGS_FILE: &str = "settings.toml";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        EspMonError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            EspMonError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the fixed registry file
pub fn registry_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(REGISTRY_FILE))
}

/// Get the path to the default settings file
pub fn settings_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(SETTINGS_FILE))
}

// ==================== Registry Config ====================

/// Full registry state as persisted on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Registered devices
    #[serde(rename = "esp32s", default)]
    pub devices: Vec<Device>,

    /// Registered streams
    #[serde(default)]
    pub streams: Vec<Stream>,

    /// Stored commands
    #[serde(default)]
    pub commands: Vec<Command>,

    /// Whether unseen devices and streams are registered automatically
    #[serde(default = "default_true")]
    pub auto_detection: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            streams: Vec::new(),
            commands: Vec::new(),
            auto_detection: true,
        }
    }
}

impl RegistryConfig {
    /// Parse a registry document, defaulting any missing collection
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| EspMonError::Persistence(format!("Failed to parse registry: {}", e)))
    }

    /// Parse a user-supplied import document
    ///
    /// Unlike [`from_json`](Self::from_json), the device and stream collections
    /// must both be present, and the result must pass [`validate`](Self::validate).
    pub fn from_import_json(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| EspMonError::Import(format!("Not valid JSON: {}", e)))?;

        let object = value
            .as_object()
            .ok_or_else(|| EspMonError::Import("Top level must be an object".to_string()))?;

        for required in ["esp32s", "streams"] {
            if !object.get(required).is_some_and(|v| v.is_array()) {
                return Err(EspMonError::Import(format!(
                    "Missing '{}' collection",
                    required
                )));
            }
        }

        let config: RegistryConfig = serde_json::from_value(value)
            .map_err(|e| EspMonError::Import(format!("Invalid registry format: {}", e)))?;
        config
            .validate()
            .map_err(|e| EspMonError::Import(e.to_string()))?;
        Ok(config)
    }

    /// Check referential integrity and uniqueness
    pub fn validate(&self) -> Result<()> {
        let mut device_ids = HashSet::new();
        for device in &self.devices {
            if !device_ids.insert(device.id.as_str()) {
                return Err(EspMonError::duplicate("device", &device.id));
            }
        }

        let mut pairs = HashSet::new();
        for stream in &self.streams {
            if !device_ids.contains(stream.device_id.as_str()) {
                return Err(EspMonError::InvalidReference(format!(
                    "stream '{}' references unknown device '{}'",
                    stream.id, stream.device_id
                )));
            }
            if !pairs.insert((stream.device_id.as_str(), stream.external_id.as_str())) {
                return Err(EspMonError::duplicate("stream", stream.key().to_string()));
            }
        }

        let mut command_ids = HashSet::new();
        for command in &self.commands {
            if !device_ids.contains(command.device_id.as_str()) {
                return Err(EspMonError::InvalidReference(format!(
                    "command '{}' references unknown device '{}'",
                    command.id, command.device_id
                )));
            }
            if !command_ids.insert(command.id.as_str()) {
                return Err(EspMonError::duplicate("command", &command.id));
            }
            validate_payload(&command.payload)?;
        }

        Ok(())
    }

    /// Structural equality that ignores collection order
    pub fn same_contents(&self, other: &RegistryConfig) -> bool {
        fn sorted<T: Clone, K: Ord>(items: &[T], key: impl Fn(&T) -> K) -> Vec<T> {
            let mut items = items.to_vec();
            items.sort_by_key(|item| key(item));
            items
        }

        self.auto_detection == other.auto_detection
            && sorted(&self.devices, |d| d.id.clone()) == sorted(&other.devices, |d| d.id.clone())
            && sorted(&self.streams, |s| s.id.clone()) == sorted(&other.streams, |s| s.id.clone())
            && sorted(&self.commands, |c| c.id.clone())
                == sorted(&other.commands, |c| c.id.clone())
    }

    /// Load a registry document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EspMonError::Persistence(format!("Failed to read registry {:?}: {}", path, e))
        })?;
        Self::from_json(&content)
    }

    /// Save the registry to disk as pretty JSON
    ///
    /// Writes a sibling temp file first and renames it over the target.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                EspMonError::Persistence(format!("Failed to create registry directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| {
            EspMonError::Persistence(format!("Failed to write registry {:?}: {}", tmp, e))
        })?;
        std::fs::rename(&tmp, path).map_err(|e| {
            EspMonError::Persistence(format!("Failed to replace registry {:?}: {}", path, e))
        })
    }
}

// ==================== Storage Seam ====================

/// Durable backing store for the registry
///
/// The registry persistence thread owns one of these. [`JsonFileStorage`] is
/// the production implementation.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigStorage: Send {
    /// Read the stored registry, `None` if nothing has been stored yet
    fn load(&self) -> Result<Option<RegistryConfig>>;

    /// Replace the stored registry
    fn save(&self, config: &RegistryConfig) -> Result<()>;

    /// Human readable location for log messages
    fn describe(&self) -> String;
}

/// Registry storage in a single JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at `config.json` in the app data dir
    pub fn at_default_location() -> Result<Self> {
        let dir = ensure_app_data_dir()?;
        Ok(Self::new(dir.join(REGISTRY_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<RegistryConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        RegistryConfig::load(&self.path).map(Some)
    }

    fn save(&self, config: &RegistryConfig) -> Result<()> {
        config.save(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ==================== Tests ====================
