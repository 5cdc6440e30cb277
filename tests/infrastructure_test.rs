//! Test to verify test infrastructure works correctly

mod common;

use common::builders::{DeviceBuilder, PacketBuilder, StreamBuilder};
use common::mock_helpers::MemoryStorage;
use espmon_rs::{ConfigStorage, RegistryConfig};

#[test]
fn test_infrastructure_setup() {
    // Test that builders work
    let device = DeviceBuilder::new("test-board")
        .address("10.0.0.5")
        .last_seen(42)
        .build();
    assert_eq!(device.id, "test-board");
    assert_eq!(device.address, "10.0.0.5");
    assert_eq!(device.last_seen, Some(42));

    let stream = StreamBuilder::new("test-board", "temp").unit("°C").build();
    assert_eq!(stream.device_id, "test-board");
    assert_eq!(stream.external_id, "temp");
    assert_eq!(stream.unit.as_deref(), Some("°C"));

    let event = PacketBuilder::new("temp")
        .device("test-board")
        .data(1.5)
        .parse("10.0.0.5:4210", 1_000);
    assert_eq!(event.device_id, "test-board");
    assert_eq!(event.timestamp, 1_000);
}

#[test]
fn test_memory_storage_records_saves() {
    let storage = MemoryStorage::new();
    assert!(storage.saved().is_none());

    storage.save(&RegistryConfig::default()).unwrap();
    assert_eq!(storage.save_count(), 1);

    storage.set_fail_saves(true);
    assert!(storage.save(&RegistryConfig::default()).is_err());
    assert_eq!(storage.save_count(), 1);
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}
