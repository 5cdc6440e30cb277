//! Configuration registry
//!
//! The [`Registry`] owns every [`Device`], [`Stream`] and [`Command`] record
//! plus the auto-detection flag. It is shared between the ingest worker (which
//! registers unseen devices and refreshes `lastSeen`) and the UI (CRUD calls).
//!
//! # Consistency
//!
//! All state sits behind one `RwLock`. Writers are serialized, readers get
//! clones taken under the read lock, so a reader never observes a stream
//! whose device is missing.
//!
//! # Persistence
//!
//! Every successful mutation queues a full snapshot for the background
//! writer (see [`persist`]) while still holding the write lock, which keeps
//! the on-disk order identical to the mutation order. Write failures are
//! reported through [`Registry::warnings`] and never undo the mutation.

pub mod persist;

pub use persist::{PersistenceWarning, Persister};

use crate::config::{ConfigStorage, RegistryConfig};
use crate::error::{EspMonError, Result};
use crate::resolver::palette_color;
use crate::types::{
    generate_id, validate_payload, Command, Device, DisplayMode, EpochMillis, Stream, StreamKey,
};
use crossbeam_channel::Receiver;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Partial device edit; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub color: Option<String>,
}

/// Partial stream edit
///
/// The `(device, stream id)` identity of a stream is fixed; remove and re-add
/// to move it.
#[derive(Debug, Clone, Default)]
pub struct StreamUpdate {
    pub nickname: Option<String>,
    pub display_mode: Option<DisplayMode>,
    /// `Some(None)` clears the unit
    pub unit: Option<Option<String>>,
    pub min: Option<Option<f64>>,
    pub max: Option<Option<f64>>,
}

/// Partial command edit
#[derive(Debug, Clone, Default)]
pub struct CommandUpdate {
    pub label: Option<String>,
    /// Validated as JSON before anything is changed
    pub payload: Option<String>,
    pub color: Option<Option<String>>,
    pub icon: Option<Option<String>>,
}

/// Records deleted by [`Registry::remove_device`]
#[derive(Debug, Clone)]
pub struct RemovedDevice {
    pub device: Device,
    pub streams: Vec<Stream>,
    pub commands: Vec<Command>,
}

/// What [`Registry::observe_device`] found
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceObservation {
    /// No record with that id
    Unknown,
    /// `lastSeen` refreshed, address unchanged
    Refreshed,
    /// `lastSeen` refreshed and the address replaced
    AddressChanged { previous: String },
}

/// Shared registry of devices, streams and commands
pub struct Registry {
    state: RwLock<RegistryConfig>,
    persister: Persister,
}

impl Registry {
    /// Load the registry from storage and start the background writer
    ///
    /// A missing or unreadable file is not fatal: the registry starts empty
    /// and a warning is published.
    pub fn open(storage: Box<dyn ConfigStorage>) -> Result<Self> {
        let location = storage.describe();
        let loaded = storage.load();
        let persister = Persister::spawn(storage)?;

        let config = match loaded {
            Ok(Some(config)) => {
                tracing::info!(
                    "Loaded registry from {}: {} devices, {} streams, {} commands",
                    location,
                    config.devices.len(),
                    config.streams.len(),
                    config.commands.len()
                );
                config
            }
            Ok(None) => {
                tracing::info!("No registry at {}, starting empty", location);
                RegistryConfig::default()
            }
            Err(e) => {
                persister.report(format!("Failed to load registry from {}: {}", location, e));
                RegistryConfig::default()
            }
        };

        if let Err(e) = config.validate() {
            persister.report(format!("Registry at {} is inconsistent: {}", location, e));
        }

        Ok(Self {
            state: RwLock::new(config),
            persister,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryConfig> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryConfig> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, state: &RegistryConfig) {
        self.persister.submit(state.clone());
    }

    // ==================== Devices ====================

    /// Register a device. An empty id is replaced with a generated one, an
    /// empty color with the next palette color.
    pub fn add_device(&self, mut device: Device) -> Result<Device> {
        if device.id.is_empty() {
            device.id = generate_id("esp32");
        }

        let mut state = self.write();
        if state.devices.iter().any(|d| d.id == device.id) {
            return Err(EspMonError::duplicate("device", &device.id));
        }
        if device.color.is_empty() {
            device.color = palette_color(state.devices.len()).to_string();
        }

        state.devices.push(device.clone());
        self.persist(&state);
        tracing::debug!("Added device {}", device.id);
        Ok(device)
    }

    pub fn update_device(&self, id: &str, update: DeviceUpdate) -> Result<Device> {
        let mut state = self.write();
        let device = state
            .devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| EspMonError::not_found("device", id))?;

        if let Some(name) = update.name {
            device.name = name;
        }
        if let Some(address) = update.address {
            device.address = address;
        }
        if let Some(color) = update.color {
            device.color = color;
        }

        let updated = device.clone();
        self.persist(&state);
        Ok(updated)
    }

    /// Remove a device together with its streams and commands
    pub fn remove_device(&self, id: &str) -> Result<RemovedDevice> {
        let mut state = self.write();
        let index = state
            .devices
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| EspMonError::not_found("device", id))?;
        let device = state.devices.remove(index);

        let (streams, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.streams)
            .into_iter()
            .partition(|s| s.device_id == id);
        state.streams = kept;

        let (commands, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.commands)
            .into_iter()
            .partition(|c| c.device_id == id);
        state.commands = kept;

        self.persist(&state);
        tracing::debug!(
            "Removed device {} ({} streams, {} commands)",
            id,
            streams.len(),
            commands.len()
        );
        Ok(RemovedDevice {
            device,
            streams,
            commands,
        })
    }

    pub fn device(&self, id: &str) -> Option<Device> {
        self.read().devices.iter().find(|d| d.id == id).cloned()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.read().devices.clone()
    }

    pub fn device_count(&self) -> usize {
        self.read().devices.len()
    }

    // ==================== Streams ====================

    /// Register a stream on an existing device
    pub fn add_stream(&self, mut stream: Stream) -> Result<Stream> {
        if stream.id.is_empty() {
            stream.id = generate_id("stream");
        }

        let mut state = self.write();
        check_new_stream(&state, &stream)?;
        state.streams.push(stream.clone());
        self.persist(&state);
        tracing::debug!("Added stream {} ({})", stream.id, stream.key());
        Ok(stream)
    }

    pub fn update_stream(&self, id: &str, update: StreamUpdate) -> Result<Stream> {
        let mut state = self.write();
        let stream = state
            .streams
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| EspMonError::not_found("stream", id))?;

        if let Some(nickname) = update.nickname {
            stream.nickname = nickname;
        }
        if let Some(mode) = update.display_mode {
            stream.display_mode = mode;
        }
        if let Some(unit) = update.unit {
            stream.unit = unit;
        }
        if let Some(min) = update.min {
            stream.min = min;
        }
        if let Some(max) = update.max {
            stream.max = max;
        }

        let updated = stream.clone();
        self.persist(&state);
        Ok(updated)
    }

    pub fn remove_stream(&self, id: &str) -> Result<Stream> {
        let mut state = self.write();
        let index = state
            .streams
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| EspMonError::not_found("stream", id))?;
        let stream = state.streams.remove(index);
        self.persist(&state);
        Ok(stream)
    }

    pub fn stream(&self, id: &str) -> Option<Stream> {
        self.read().streams.iter().find(|s| s.id == id).cloned()
    }

    /// Look up a stream by its `(device, stream id)` pair
    pub fn stream_by_key(&self, key: &StreamKey) -> Option<Stream> {
        self.read()
            .streams
            .iter()
            .find(|s| s.device_id == key.device_id && s.external_id == key.stream_id)
            .cloned()
    }

    pub fn has_stream(&self, key: &StreamKey) -> bool {
        self.read()
            .streams
            .iter()
            .any(|s| s.device_id == key.device_id && s.external_id == key.stream_id)
    }

    pub fn streams(&self) -> Vec<Stream> {
        self.read().streams.clone()
    }

    pub fn streams_for_device(&self, device_id: &str) -> Vec<Stream> {
        self.read()
            .streams
            .iter()
            .filter(|s| s.device_id == device_id)
            .cloned()
            .collect()
    }

    // ==================== Commands ====================

    /// Store a command; the payload must parse as JSON
    pub fn add_command(&self, mut command: Command) -> Result<Command> {
        validate_payload(&command.payload)?;
        if command.id.is_empty() {
            command.id = generate_id("cmd");
        }

        let mut state = self.write();
        if !state.devices.iter().any(|d| d.id == command.device_id) {
            return Err(EspMonError::InvalidReference(format!(
                "command '{}' references unknown device '{}'",
                command.label, command.device_id
            )));
        }
        if state.commands.iter().any(|c| c.id == command.id) {
            return Err(EspMonError::duplicate("command", &command.id));
        }

        state.commands.push(command.clone());
        self.persist(&state);
        Ok(command)
    }

    pub fn update_command(&self, id: &str, update: CommandUpdate) -> Result<Command> {
        if let Some(payload) = &update.payload {
            validate_payload(payload)?;
        }

        let mut state = self.write();
        let command = state
            .commands
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| EspMonError::not_found("command", id))?;

        if let Some(label) = update.label {
            command.label = label;
        }
        if let Some(payload) = update.payload {
            command.payload = payload;
        }
        if let Some(color) = update.color {
            command.color = color;
        }
        if let Some(icon) = update.icon {
            command.icon = icon;
        }

        let updated = command.clone();
        self.persist(&state);
        Ok(updated)
    }

    pub fn remove_command(&self, id: &str) -> Result<Command> {
        let mut state = self.write();
        let index = state
            .commands
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| EspMonError::not_found("command", id))?;
        let command = state.commands.remove(index);
        self.persist(&state);
        Ok(command)
    }

    pub fn command(&self, id: &str) -> Option<Command> {
        self.read().commands.iter().find(|c| c.id == id).cloned()
    }

    pub fn commands_for_device(&self, device_id: &str) -> Vec<Command> {
        self.read()
            .commands
            .iter()
            .filter(|c| c.device_id == device_id)
            .cloned()
            .collect()
    }

    // ==================== Auto-Detection Support ====================

    pub fn auto_detection(&self) -> bool {
        self.read().auto_detection
    }

    pub fn set_auto_detection(&self, enabled: bool) {
        let mut state = self.write();
        if state.auto_detection != enabled {
            tracing::info!(
                "Auto-detection {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        state.auto_detection = enabled;
        self.persist(&state);
    }

    /// Refresh `lastSeen` of a known device and learn its address
    pub fn observe_device(&self, id: &str, address: &str, now: EpochMillis) -> DeviceObservation {
        let mut state = self.write();
        let Some(device) = state.devices.iter_mut().find(|d| d.id == id) else {
            return DeviceObservation::Unknown;
        };

        device.last_seen = Some(now);
        let observation = if device.address != address {
            let previous = std::mem::replace(&mut device.address, address.to_string());
            DeviceObservation::AddressChanged { previous }
        } else {
            DeviceObservation::Refreshed
        };

        self.persist(&state);
        observation
    }

    /// Insert a device built by `make` unless `id` is already registered
    ///
    /// `make` receives the current device count. Returns whether a device was
    /// created.
    pub fn ensure_device<F>(&self, id: &str, make: F) -> bool
    where
        F: FnOnce(usize) -> Device,
    {
        let mut state = self.write();
        if state.devices.iter().any(|d| d.id == id) {
            return false;
        }
        let device = make(state.devices.len());
        tracing::debug!("Registered device {} ({})", device.id, device.address);
        state.devices.push(device);
        self.persist(&state);
        true
    }

    /// Insert a stream built by `make` unless the pair is already registered
    ///
    /// Fails if the owning device does not exist. Returns whether a stream was
    /// created.
    pub fn ensure_stream<F>(&self, key: &StreamKey, make: F) -> Result<bool>
    where
        F: FnOnce() -> Stream,
    {
        let mut state = self.write();
        if state
            .streams
            .iter()
            .any(|s| s.device_id == key.device_id && s.external_id == key.stream_id)
        {
            return Ok(false);
        }

        let stream = make();
        check_new_stream(&state, &stream)?;
        tracing::debug!("Registered stream {} ({})", stream.id, key);
        state.streams.push(stream);
        self.persist(&state);
        Ok(true)
    }

    // ==================== Snapshot / Import / Export ====================

    /// Consistent copy of the full registry
    pub fn snapshot(&self) -> RegistryConfig {
        self.read().clone()
    }

    /// Replace the whole registry after validating it
    pub fn replace(&self, config: RegistryConfig) -> Result<()> {
        config.validate()?;
        let mut state = self.write();
        *state = config;
        self.persist(&state);
        Ok(())
    }

    /// Replace the registry with the contents of an export file
    ///
    /// On any error the current registry is left unchanged.
    pub fn import_from(&self, path: impl AsRef<Path>) -> Result<RegistryConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EspMonError::Import(format!("Failed to read {:?}: {}", path, e)))?;
        let config = RegistryConfig::from_import_json(&content)?;

        self.replace(config.clone())?;
        tracing::info!(
            "Imported registry from {:?}: {} devices, {} streams",
            path,
            config.devices.len(),
            config.streams.len()
        );
        Ok(config)
    }

    /// Write the current registry to a user-chosen path
    pub fn export_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.snapshot().save(path)?;
        tracing::info!("Exported registry to {:?}", path);
        Ok(())
    }

    // ==================== Persistence ====================

    /// Receiver of non-fatal persistence warnings
    pub fn warnings(&self) -> Receiver<PersistenceWarning> {
        self.persister.warnings()
    }

    /// Block until all queued snapshots are written
    pub fn flush(&self) {
        self.persister.flush();
    }

    /// Flush and stop the background writer. Later mutations are not saved.
    pub fn close(&self) {
        self.persister.shutdown();
    }
}

fn check_new_stream(state: &RegistryConfig, stream: &Stream) -> Result<()> {
    if !state.devices.iter().any(|d| d.id == stream.device_id) {
        return Err(EspMonError::InvalidReference(format!(
            "stream '{}' references unknown device '{}'",
            stream.external_id, stream.device_id
        )));
    }
    if state.streams.iter().any(|s| s.id == stream.id) {
        return Err(EspMonError::duplicate("stream", &stream.id));
    }
    if state
        .streams
        .iter()
        .any(|s| s.device_id == stream.device_id && s.external_id == stream.external_id)
    {
        return Err(EspMonError::duplicate("stream", stream.key().to_string()));
    }
    Ok(())
}
