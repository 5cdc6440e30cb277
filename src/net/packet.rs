//! Inbound datagram parsing
//!
//! Devices send one JSON object per datagram:
//!
//! ```json
//! { "esp32Id": "esp32-salon", "streamId": "temperature", "timestamp": 1700000000000, "data": 21.5 }
//! ```
//!
//! Normalisation rules:
//! - the reading may be under `data` or `value` (`data` wins when both are set)
//!   and may be a number or a numeric string
//! - a missing or empty `esp32Id` is synthesized from the sender address
//! - a missing, null or zero `timestamp` becomes the processing time

use crate::types::{EpochMillis, StreamKey};
use serde_json::{Map, Value};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Reasons a datagram is dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PacketError {
    #[error("datagram is not valid JSON: {0}")]
    Json(String),

    #[error("datagram is not a JSON object")]
    NotAnObject,

    #[error("missing streamId")]
    MissingStreamId,

    #[error("missing numeric reading (data/value)")]
    MissingValue,

    #[error("reading is not a finite number: {0}")]
    InvalidValue(String),

    #[error("timestamp is not a valid epoch millisecond value: {0}")]
    InvalidTimestamp(String),
}

/// One canonical telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub device_id: String,
    pub stream_id: String,
    pub timestamp: EpochMillis,
    pub value: f64,
    /// Sender of the datagram, used for address learning
    pub source: SocketAddr,
    /// `device_id` was derived from `source` rather than sent by the device
    pub device_id_synthesized: bool,
}

impl TelemetryEvent {
    pub fn key(&self) -> StreamKey {
        StreamKey::new(self.device_id.clone(), self.stream_id.clone())
    }

    /// Sender IP as stored on the device record
    pub fn source_ip(&self) -> String {
        self.source.ip().to_string()
    }
}

/// Deterministic device id for packets without `esp32Id`
pub fn address_device_id(ip: IpAddr) -> String {
    let flattened: String = ip
        .to_string()
        .chars()
        .map(|c| if c == '.' || c == ':' { '-' } else { c })
        .collect();
    format!("ip-{}", flattened)
}

/// Parse and normalise one datagram
pub fn parse_datagram(
    bytes: &[u8],
    source: SocketAddr,
    now: EpochMillis,
) -> Result<TelemetryEvent, PacketError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| PacketError::Json(e.to_string()))?;
    let object = value.as_object().ok_or(PacketError::NotAnObject)?;

    let stream_id = stream_id(object)?;
    let reading = reading(object)?;
    let timestamp = timestamp(object, now)?;

    let (device_id, device_id_synthesized) = match object.get("esp32Id") {
        Some(Value::String(id)) if !id.trim().is_empty() => (id.trim().to_string(), false),
        Some(Value::Number(n)) => (n.to_string(), false),
        _ => (address_device_id(source.ip()), true),
    };

    Ok(TelemetryEvent {
        device_id,
        stream_id,
        timestamp,
        value: reading,
        source,
        device_id_synthesized,
    })
}

fn stream_id(object: &Map<String, Value>) -> Result<String, PacketError> {
    match object.get("streamId") {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PacketError::MissingStreamId),
    }
}

fn reading(object: &Map<String, Value>) -> Result<f64, PacketError> {
    let raw = match object.get("data") {
        Some(v) if !v.is_null() => v,
        _ => match object.get("value") {
            Some(v) if !v.is_null() => v,
            _ => return Err(PacketError::MissingValue),
        },
    };

    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(PacketError::InvalidValue(raw.to_string())),
    }
}

fn timestamp(object: &Map<String, Value>, now: EpochMillis) -> Result<EpochMillis, PacketError> {
    let raw = match object.get("timestamp") {
        None | Some(Value::Null) => return Ok(now),
        Some(v) => v,
    };

    let parsed = match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        _ => None,
    };

    match parsed {
        Some(0) => Ok(now),
        Some(ts) if ts > 0 => Ok(ts),
        _ => Err(PacketError::InvalidTimestamp(raw.to_string())),
    }
}
