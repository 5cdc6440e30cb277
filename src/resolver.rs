//! Auto-detection of devices and streams
//!
//! [`resolve`] runs once per [`TelemetryEvent`] before the sample reaches the
//! store. It always refreshes `lastSeen` of a known device. When the registry's
//! auto-detection flag is on it also registers unseen devices and streams with
//! heuristic defaults:
//!
//! - device name `ESP32 <id>`, color from [`PALETTE`] by device count
//! - stream nickname from the stream id (`outdoorTemp` -> `Outdoor Temp`)
//! - unit and expected range from a keyword table (`temp` -> °C, [-10, 50])
//!
//! Resolution is idempotent: a second event for the same pair only refreshes
//! `lastSeen`.

use crate::net::packet::TelemetryEvent;
use crate::registry::{DeviceObservation, Registry};
use crate::types::{Device, EpochMillis, Stream};

/// Colors assigned round-robin to auto-detected devices
pub const PALETTE: [&str; 12] = [
    "#3b82f6", "#ef4444", "#10b981", "#f59e0b", "#8b5cf6", "#ec4899", "#06b6d4", "#84cc16",
    "#f97316", "#6366f1", "#14b8a6", "#a855f7",
];

/// Palette color for the `index`-th device
pub fn palette_color(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

/// Unit and range suggestion for streams whose id contains a keyword
#[derive(Debug, Clone, Copy)]
pub struct UnitRule {
    pub keywords: &'static [&'static str],
    pub unit: &'static str,
    pub range: Option<(f64, f64)>,
}

pub const UNIT_RULES: &[UnitRule] = &[
    UnitRule {
        keywords: &["temp"],
        unit: "°C",
        range: Some((-10.0, 50.0)),
    },
    UnitRule {
        keywords: &["hum"],
        unit: "%",
        range: Some((0.0, 100.0)),
    },
    UnitRule {
        keywords: &["pres"],
        unit: "hPa",
        range: Some((900.0, 1100.0)),
    },
    UnitRule {
        keywords: &["volt"],
        unit: "V",
        range: Some((0.0, 5.0)),
    },
    UnitRule {
        keywords: &["current", "amp"],
        unit: "A",
        range: None,
    },
    UnitRule {
        keywords: &["power", "watt"],
        unit: "W",
        range: None,
    },
];

/// Split a stream id into words at `_`, `-`, whitespace and case boundaries
///
/// An uppercase run followed by a lowercase letter keeps its last letter for
/// the next word, so `CPUTemp` splits as `CPU`, `Temp`.
pub fn split_words(id: &str) -> Vec<String> {
    let chars: Vec<char> = id.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Human readable nickname for a stream id
pub fn nickname_for(id: &str) -> String {
    let joined = split_words(id).join(" ");
    let mut chars = joined.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => id.to_string(),
    }
}

/// First rule with a keyword contained in the id, ignoring case
pub fn unit_rule_for(id: &str) -> Option<&'static UnitRule> {
    let id = id.to_lowercase();
    UNIT_RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|keyword| id.contains(keyword)))
}

/// Device record for a first sighting
pub fn detected_device(event: &TelemetryEvent, device_count: usize, now: EpochMillis) -> Device {
    let mut device = Device::new(
        event.device_id.clone(),
        format!("ESP32 {}", event.device_id),
        event.source_ip(),
    )
    .with_color(palette_color(device_count))
    .with_last_seen(now);
    device.auto_detected = true;
    device
}

/// Stream record for a first sighting
pub fn detected_stream(device_id: &str, stream_id: &str) -> Stream {
    let mut stream = Stream::new(device_id, stream_id).with_nickname(nickname_for(stream_id));
    if let Some(rule) = unit_rule_for(stream_id) {
        stream = stream.with_unit(rule.unit);
        if let Some((min, max)) = rule.range {
            stream = stream.with_range(min, max);
        }
    }
    stream.auto_detected = true;
    stream
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceResolution {
    /// Created by this event
    Registered,
    /// Known; `lastSeen` refreshed
    Refreshed,
    /// Known; `lastSeen` refreshed and address updated
    AddressChanged { previous: String },
    /// Unknown and auto-detection is off
    Unregistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamResolution {
    /// Created by this event
    Registered,
    /// Already registered
    Known,
    /// Unknown and not registered
    Unregistered,
}

/// Outcome of resolving one event
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub device: DeviceResolution,
    pub stream: StreamResolution,
}

impl Resolution {
    /// Whether the sample may be stored
    pub fn accepts_point(&self) -> bool {
        self.stream != StreamResolution::Unregistered
    }
}

/// Ensure the event's device and stream exist, honoring the auto-detection flag
pub fn resolve(registry: &Registry, event: &TelemetryEvent, now: EpochMillis) -> Resolution {
    let auto = registry.auto_detection();
    let address = event.source_ip();

    let device = match registry.observe_device(&event.device_id, &address, now) {
        DeviceObservation::Refreshed => DeviceResolution::Refreshed,
        DeviceObservation::AddressChanged { previous } => {
            tracing::info!(
                "Device {} moved from {} to {}",
                event.device_id,
                previous,
                address
            );
            DeviceResolution::AddressChanged { previous }
        }
        DeviceObservation::Unknown if auto => {
            if registry.ensure_device(&event.device_id, |count| {
                detected_device(event, count, now)
            }) {
                tracing::info!("Auto-detected device {} at {}", event.device_id, address);
                DeviceResolution::Registered
            } else {
                // Registered by someone else since the lookup
                registry.observe_device(&event.device_id, &address, now);
                DeviceResolution::Refreshed
            }
        }
        DeviceObservation::Unknown => DeviceResolution::Unregistered,
    };

    let key = event.key();
    let stream = if registry.has_stream(&key) {
        StreamResolution::Known
    } else if auto && device != DeviceResolution::Unregistered {
        match registry.ensure_stream(&key, || detected_stream(&key.device_id, &key.stream_id)) {
            Ok(true) => {
                tracing::info!("Auto-detected stream {}", key);
                StreamResolution::Registered
            }
            Ok(false) => StreamResolution::Known,
            Err(e) => {
                tracing::warn!("Could not register stream {}: {}", key, e);
                StreamResolution::Unregistered
            }
        }
    } else {
        StreamResolution::Unregistered
    };

    Resolution { device, stream }
}
