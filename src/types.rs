//! Core data types for EspMon-RS
//!
//! This module contains the fundamental data structures used throughout
//! the hub for representing devices, their streams, outbound commands and
//! the samples they produce.
//!
//! # Main Types
//!
//! - [`Device`] - A registered sensor endpoint (id, address, color, liveness data)
//! - [`Stream`] - A named numeric channel reported by a device
//! - [`Command`] - An opaque JSON payload addressed to a device
//! - [`DataPoint`] - A single timestamped numeric sample
//! - [`StreamKey`] - Composite `(device id, stream id)` key used by the store
//!
//! # Wire Names
//!
//! The serialized field names follow the registry file format shared with
//! the firmware tooling (`esp32s`, `esp32Id`, `streamId`, `ip`, ...), so the
//! Rust field names and the JSON names differ in a few places.

use crate::error::{EspMonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Milliseconds since the Unix epoch
pub type EpochMillis = i64;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> EpochMillis {
    chrono::Utc::now().timestamp_millis()
}

/// Global counter mixed into generated record ids
static NEXT_RECORD_SEQ: AtomicU64 = AtomicU64::new(1);

/// Generate a record id of the form `<prefix>-<epoch ms>-<sequence>`
pub fn generate_id(prefix: &str) -> String {
    let seq = NEXT_RECORD_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", prefix, now_millis(), seq)
}

/// Composite key identifying one stream buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    /// Owning device id
    pub device_id: String,
    /// External stream identifier as sent by the device
    pub stream_id: String,
}

impl StreamKey {
    pub fn new(device_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            stream_id: stream_id.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.stream_id)
    }
}

/// A single timestamped sample. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Sample time in epoch milliseconds
    pub timestamp: EpochMillis,
    /// Numeric reading
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: EpochMillis, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// How the UI renders a stream. Opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Line,
    Bar,
    Gauge,
    Table,
    Area,
    Donut,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayMode::Line => write!(f, "line"),
            DisplayMode::Bar => write!(f, "bar"),
            DisplayMode::Gauge => write!(f, "gauge"),
            DisplayMode::Table => write!(f, "table"),
            DisplayMode::Area => write!(f, "area"),
            DisplayMode::Donut => write!(f, "donut"),
        }
    }
}

/// Liveness classification of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// The device has never been seen
    Unknown,
    /// Seen or updated within the liveness threshold
    Online,
    /// Seen before, but nothing recent
    Offline,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Unknown => write!(f, "unknown"),
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline => write!(f, "offline"),
        }
    }
}

/// A registered sensor device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable device identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Last known network address (IP literal, may be empty for manual entries)
    #[serde(rename = "ip", default)]
    pub address: String,
    /// Display color (`#rrggbb`)
    #[serde(default)]
    pub color: String,
    /// Last time a packet from this device was processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<EpochMillis>,
    /// Whether the hub registered this device on its own
    #[serde(default)]
    pub auto_detected: bool,
}

impl Device {
    /// Create a manually registered device
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            color: String::new(),
            last_seen: None,
            auto_detected: false,
        }
    }

    /// Set the display color
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Set the last seen timestamp
    pub fn with_last_seen(mut self, last_seen: EpochMillis) -> Self {
        self.last_seen = Some(last_seen);
        self
    }
}

/// A numeric channel reported by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    /// Registry record id
    pub id: String,
    /// Owning device id
    #[serde(rename = "esp32Id")]
    pub device_id: String,
    /// Stream key as sent by the device
    #[serde(rename = "streamId")]
    pub external_id: String,
    /// Human readable name
    #[serde(default)]
    pub nickname: String,
    /// How the UI renders this stream
    #[serde(default)]
    pub display_mode: DisplayMode,
    /// Unit label (e.g. "°C", "%")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Expected minimum value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Expected maximum value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Whether the hub registered this stream on its own
    #[serde(default)]
    pub auto_detected: bool,
}

impl Stream {
    /// Create a stream with a generated record id
    pub fn new(device_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        let external_id = external_id.into();
        Self {
            id: generate_id("stream"),
            device_id: device_id.into(),
            nickname: external_id.clone(),
            external_id,
            display_mode: DisplayMode::Line,
            unit: None,
            min: None,
            max: None,
            auto_detected: false,
        }
    }

    /// Set the nickname
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }

    /// Set the display mode
    pub fn with_display_mode(mut self, mode: DisplayMode) -> Self {
        self.display_mode = mode;
        self
    }

    /// Set the unit label
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the expected value range
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Composite key of the buffer backing this stream
    pub fn key(&self) -> StreamKey {
        StreamKey::new(self.device_id.clone(), self.external_id.clone())
    }
}

/// An opaque outbound payload addressed to a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Registry record id
    pub id: String,
    /// Target device id
    #[serde(rename = "esp32Id")]
    pub device_id: String,
    /// Button label
    pub label: String,
    /// JSON text sent verbatim (after re-serialization) to the device
    #[serde(rename = "command")]
    pub payload: String,
    /// Presentation color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Presentation icon name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl Command {
    /// Create a command, rejecting payloads that are not valid JSON
    pub fn new(
        device_id: impl Into<String>,
        label: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<Self> {
        let payload = payload.into();
        validate_payload(&payload)?;
        Ok(Self {
            id: generate_id("cmd"),
            device_id: device_id.into(),
            label: label.into(),
            payload,
            color: None,
            icon: None,
        })
    }

    /// Parse the stored payload
    pub fn parsed_payload(&self) -> Result<serde_json::Value> {
        validate_payload(&self.payload)
    }
}

/// Parse command text as JSON, mapping failures to [`EspMonError::InvalidCommand`]
pub fn validate_payload(payload: &str) -> Result<serde_json::Value> {
    serde_json::from_str(payload).map_err(|e| EspMonError::InvalidCommand(e.to_string()))
}
