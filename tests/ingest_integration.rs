//! Integration tests for the ingest path
//!
//! These tests drive the hub with parsed packets, without sockets:
//! - Auto-registration of unseen devices and streams
//! - Buffer bounds and arrival order
//! - Liveness derived from ingested data
//! - Cascading removal

mod common;

use common::builders::{DeviceBuilder, PacketBuilder, StreamBuilder};
use common::mock_helpers::MemoryStorage;
use espmon_rs::resolver::{DeviceResolution, StreamResolution};
use espmon_rs::{DeviceStatus, DisplayMode, HubSettings, StreamKey, TelemetryHub};

const NOW: i64 = 1_700_000_000_000;
const SOURCE: &str = "192.168.1.20:4210";

fn hub_with(settings: HubSettings) -> (TelemetryHub, MemoryStorage) {
    let storage = MemoryStorage::new();
    let hub = TelemetryHub::new(settings, Box::new(storage.clone())).unwrap();
    (hub, storage)
}

fn hub() -> (TelemetryHub, MemoryStorage) {
    hub_with(HubSettings::default())
}

#[test]
fn test_unknown_device_packet_registers_everything() {
    let (hub, _storage) = hub();
    let event = PacketBuilder::new("temp")
        .device("x")
        .data(21.5)
        .parse(SOURCE, NOW);

    let outcome = hub.ingest_at(&event, NOW);
    assert!(outcome.is_stored());

    let device = hub.registry().device("x").unwrap();
    assert!(device.auto_detected);
    assert_eq!(device.address, "192.168.1.20");
    assert_eq!(device.last_seen, Some(NOW));

    let stream = hub
        .registry()
        .stream_by_key(&StreamKey::new("x", "temp"))
        .unwrap();
    assert!(stream.auto_detected);
    assert_eq!(stream.unit.as_deref(), Some("°C"));
    assert_eq!(stream.min, Some(-10.0));
    assert_eq!(stream.max, Some(50.0));
    assert_eq!(stream.display_mode, DisplayMode::Line);

    let snapshot = hub.store().read(&StreamKey::new("x", "temp")).unwrap();
    assert_eq!(snapshot.points.len(), 1);
    common::assert_float_eq(snapshot.points[0].value, 21.5, 1e-9);
    // No timestamp in the packet: processing time is used
    assert_eq!(snapshot.points[0].timestamp, NOW);
}

#[test]
fn test_repeated_pair_creates_no_duplicates() {
    let (hub, _storage) = hub();
    let packet = PacketBuilder::new("humidity").device("x").value(40.0);

    let first = hub.ingest_at(&packet.parse(SOURCE, NOW), NOW);
    let second = hub.ingest_at(&packet.parse(SOURCE, NOW + 1_000), NOW + 1_000);

    assert_eq!(first.resolution().device, DeviceResolution::Registered);
    assert_eq!(second.resolution().device, DeviceResolution::Refreshed);
    assert_eq!(second.resolution().stream, StreamResolution::Known);

    assert_eq!(hub.registry().devices().len(), 1);
    assert_eq!(hub.registry().streams().len(), 1);
    assert_eq!(
        hub.store()
            .read(&StreamKey::new("x", "humidity"))
            .unwrap()
            .points
            .len(),
        2
    );
}

#[test]
fn test_address_derived_device_is_stable() {
    let (hub, _storage) = hub();
    hub.ingest_at(&PacketBuilder::new("temp").data(1.0).parse(SOURCE, NOW), NOW);
    hub.ingest_at(&PacketBuilder::new("hum").data(2.0).parse(SOURCE, NOW), NOW);

    let devices = hub.registry().devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "ip-192-168-1-20");
    assert_eq!(hub.registry().streams_for_device("ip-192-168-1-20").len(), 2);
}

#[test]
fn test_buffer_capacity_from_settings() {
    let mut settings = HubSettings::default();
    settings.store.capacity = 5;
    let (hub, _storage) = hub_with(settings);

    for i in 0..20 {
        let event = PacketBuilder::new("temp")
            .device("x")
            .data(i as f64)
            .timestamp(NOW + i)
            .parse(SOURCE, NOW + i);
        hub.ingest_at(&event, NOW + i);
    }

    let snapshot = hub.store().read(&StreamKey::new("x", "temp")).unwrap();
    let values: Vec<f64> = snapshot.points.iter().map(|p| p.value).collect();
    assert_eq!(values, vec![15.0, 16.0, 17.0, 18.0, 19.0]);
    assert_eq!(snapshot.last_update, NOW + 19);

    // Shrinking applies on the next append
    hub.set_buffer_capacity(2);
    hub.ingest_at(
        &PacketBuilder::new("temp")
            .device("x")
            .data(20.0)
            .parse(SOURCE, NOW + 20),
        NOW + 20,
    );
    assert_eq!(
        hub.store()
            .read(&StreamKey::new("x", "temp"))
            .unwrap()
            .points
            .len(),
        2
    );
}

#[test]
fn test_detection_disabled_only_accepts_registered_pairs() {
    let (hub, _storage) = hub();
    hub.registry().set_auto_detection(false);
    hub.registry()
        .add_device(DeviceBuilder::new("x").address("192.168.1.20").build())
        .unwrap();
    hub.registry()
        .add_stream(StreamBuilder::new("x", "temp").unit("°C").build())
        .unwrap();

    let known = PacketBuilder::new("temp").device("x").data(1.0);
    let unknown_stream = PacketBuilder::new("hum").device("x").data(1.0);
    let unknown_device = PacketBuilder::new("temp").device("y").data(1.0);

    assert!(hub.ingest_at(&known.parse(SOURCE, NOW), NOW).is_stored());
    assert!(!hub.ingest_at(&unknown_stream.parse(SOURCE, NOW), NOW).is_stored());
    assert!(!hub.ingest_at(&unknown_device.parse(SOURCE, NOW), NOW).is_stored());

    assert_eq!(hub.registry().devices().len(), 1);
    assert_eq!(hub.store().keys(), vec![StreamKey::new("x", "temp")]);
    // Known device still refreshed
    assert_eq!(hub.registry().device("x").unwrap().last_seen, Some(NOW));
}

#[test]
fn test_liveness_thresholds() {
    let (hub, _storage) = hub();
    hub.registry()
        .add_device(DeviceBuilder::new("stale").last_seen(NOW - 31_000).build())
        .unwrap();
    hub.registry()
        .add_device(DeviceBuilder::new("fresh").last_seen(NOW - 29_000).build())
        .unwrap();
    hub.registry()
        .add_device(DeviceBuilder::new("never").build())
        .unwrap();

    assert_eq!(hub.device_status("stale", NOW), Some(DeviceStatus::Offline));
    assert_eq!(hub.device_status("fresh", NOW), Some(DeviceStatus::Online));
    assert_eq!(hub.device_status("never", NOW), Some(DeviceStatus::Unknown));

    let report = hub.statuses(NOW);
    assert_eq!(report.statuses.len(), 3);
    assert_eq!(report.online_count(), 1);
}

#[test]
fn test_remove_device_cascade_leaves_others() {
    let (hub, _storage) = hub();
    for (device, stream) in [("a", "temp"), ("a", "hum"), ("b", "temp"), ("b", "volt")] {
        let event = PacketBuilder::new(stream)
            .device(device)
            .data(1.0)
            .parse(SOURCE, NOW);
        hub.ingest_at(&event, NOW);
    }

    let removed = hub.remove_device("a").unwrap();
    assert_eq!(removed.streams.len(), 2);

    let remaining = hub.registry().streams();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|s| s.device_id == "b"));
    assert!(hub.store().read(&StreamKey::new("a", "temp")).is_none());
    assert!(hub.store().read(&StreamKey::new("b", "volt")).is_some());
}

#[test]
fn test_mutations_reach_storage() {
    let (hub, storage) = hub();
    hub.ingest_at(
        &PacketBuilder::new("temp").device("x").data(1.0).parse(SOURCE, NOW),
        NOW,
    );
    hub.registry().flush();

    let saved = storage.saved().unwrap();
    assert_eq!(saved.devices.len(), 1);
    assert_eq!(saved.streams.len(), 1);
    assert!(storage.save_count() >= 1);
}

#[test]
fn test_store_subscription_sees_ingested_samples() {
    let (hub, _storage) = hub();
    let samples = hub.store().subscribe();
    hub.ingest_at(
        &PacketBuilder::new("temp").device("x").data(3.5).parse(SOURCE, NOW),
        NOW,
    );

    let sample = samples.recv_timeout(common::test_timeout()).unwrap();
    assert_eq!(sample.key, StreamKey::new("x", "temp"));
    common::assert_float_eq(sample.point.value, 3.5, 1e-9);
}
