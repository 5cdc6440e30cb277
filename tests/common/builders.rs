//! Test data builders for creating test objects

use espmon_rs::{Device, Stream, TelemetryEvent};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;

/// Builder for creating inbound datagram payloads
pub struct PacketBuilder {
    fields: Map<String, Value>,
}

impl PacketBuilder {
    pub fn new(stream_id: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("streamId".to_string(), json!(stream_id));
        Self { fields }
    }

    pub fn device(mut self, id: &str) -> Self {
        self.fields.insert("esp32Id".to_string(), json!(id));
        self
    }

    pub fn data(mut self, value: f64) -> Self {
        self.fields.insert("data".to_string(), json!(value));
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.fields.insert("value".to_string(), json!(value));
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.fields.insert("timestamp".to_string(), json!(timestamp));
        self
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_json()).unwrap()
    }

    /// Parse the packet as if it arrived from `source` at `now`
    pub fn parse(&self, source: &str, now: i64) -> TelemetryEvent {
        let source: SocketAddr = source.parse().unwrap();
        espmon_rs::net::parse_datagram(&self.to_bytes(), source, now).unwrap()
    }
}

/// Builder for creating test Devices
pub struct DeviceBuilder {
    device: Device,
}

impl DeviceBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            device: Device::new(id, format!("ESP32 {}", id), "127.0.0.1"),
        }
    }

    pub fn address(mut self, address: &str) -> Self {
        self.device.address = address.to_string();
        self
    }

    pub fn last_seen(mut self, timestamp: i64) -> Self {
        self.device.last_seen = Some(timestamp);
        self
    }

    pub fn build(self) -> Device {
        self.device
    }
}

/// Builder for creating test Streams
pub struct StreamBuilder {
    stream: Stream,
}

impl StreamBuilder {
    pub fn new(device_id: &str, stream_id: &str) -> Self {
        Self {
            stream: Stream::new(device_id, stream_id),
        }
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.stream = self.stream.with_unit(unit);
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.stream = self.stream.with_range(min, max);
        self
    }

    pub fn build(self) -> Stream {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_builder() {
        let event = PacketBuilder::new("temp")
            .device("x")
            .data(21.5)
            .parse("10.0.0.5:4210", 1_000);

        assert_eq!(event.device_id, "x");
        assert_eq!(event.stream_id, "temp");
        assert_eq!(event.timestamp, 1_000);
    }
}
