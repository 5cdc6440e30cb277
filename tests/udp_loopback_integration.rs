//! Integration tests over real UDP sockets
//!
//! These tests start a hub on an ephemeral loopback port and validate:
//! - Datagrams flow through listener, worker, registry and store
//! - Malformed datagrams are counted and do not stop the listener
//! - Commands reach the device's last known address
//! - Shutdown joins every thread and persists the registry

mod common;

use common::mock_helpers::MemoryStorage;
use common::wait_until;
use espmon_rs::{Command, DeviceStatus, HubSettings, StreamKey, TelemetryHub};
use serial_test::serial;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;

fn loopback_settings() -> HubSettings {
    let mut settings = HubSettings::default();
    settings.listener.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
    settings.listener.port = 0;
    settings.listener.read_timeout_ms = 20;
    settings.liveness.refresh_interval_ms = 50;
    settings
}

#[test]
#[serial]
fn test_datagrams_reach_store() {
    let storage = MemoryStorage::new();
    let hub = Arc::new(
        TelemetryHub::new(loopback_settings(), Box::new(storage.clone())).unwrap(),
    );
    let running = hub.start().unwrap();
    let addr = running.local_addr();

    let device = UdpSocket::bind("127.0.0.1:0").unwrap();
    device.send_to(b"{ definitely not json", addr).unwrap();
    for i in 0..3 {
        let packet = format!(r#"{{"esp32Id":"bench","streamId":"temp","data":{}}}"#, 20 + i);
        device.send_to(packet.as_bytes(), addr).unwrap();
    }

    let key = StreamKey::new("bench", "temp");
    let store = hub.store().clone();
    assert!(wait_until(|| store
        .read(&key)
        .is_some_and(|s| s.points.len() == 3)));

    let values: Vec<f64> = hub
        .store()
        .read(&key)
        .unwrap()
        .points
        .iter()
        .map(|p| p.value)
        .collect();
    assert_eq!(values, vec![20.0, 21.0, 22.0]);

    let stats = running.listener_stats();
    assert_eq!(stats.received, 4);
    assert_eq!(stats.malformed, 1);

    let device_record = hub.registry().device("bench").unwrap();
    assert_eq!(device_record.address, "127.0.0.1");

    running.shutdown();
    assert!(storage
        .saved()
        .is_some_and(|saved| saved.devices.iter().any(|d| d.id == "bench")));
}

#[test]
#[serial]
fn test_status_monitor_publishes_reports() {
    let hub = Arc::new(
        TelemetryHub::new(loopback_settings(), Box::new(MemoryStorage::new())).unwrap(),
    );
    let running = hub.start().unwrap();

    let device = UdpSocket::bind("127.0.0.1:0").unwrap();
    device
        .send_to(
            br#"{"esp32Id":"live","streamId":"hum","value":55}"#,
            running.local_addr(),
        )
        .unwrap();
    assert!(wait_until(|| hub.registry().device("live").is_some()));

    let reports = running.status_updates();
    let saw_online = wait_until(|| {
        reports
            .try_iter()
            .any(|report| report.status_of("live") == Some(DeviceStatus::Online))
    });
    assert!(saw_online);

    running.shutdown();
}

#[test]
#[serial]
fn test_command_sent_to_learned_address() {
    // The "device" listens for commands on its own ephemeral port
    let device = UdpSocket::bind("127.0.0.1:0").unwrap();
    device.set_read_timeout(Some(common::test_timeout())).unwrap();

    let mut settings = loopback_settings();
    settings.dispatch.device_port = device.local_addr().unwrap().port();

    let hub = Arc::new(TelemetryHub::new(settings, Box::new(MemoryStorage::new())).unwrap());
    let running = hub.start().unwrap();

    device
        .send_to(
            br#"{"esp32Id":"relay-board","streamId":"power","data":12}"#,
            running.local_addr(),
        )
        .unwrap();
    assert!(wait_until(|| hub.registry().device("relay-board").is_some()));

    let command = Command::new("relay-board", "Relay off", r#"{"relay":false}"#).unwrap();
    let command = hub.registry().add_command(command).unwrap();
    let sent = hub
        .send_command(&command.id)
        .unwrap()
        .wait_timeout(common::test_timeout())
        .unwrap();

    let mut buf = [0u8; 512];
    let (len, _) = device.recv_from(&mut buf).unwrap();
    assert_eq!(len, sent);
    let payload: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
    assert_eq!(payload, serde_json::json!({"relay": false}));

    running.shutdown();
}

#[test]
#[serial]
fn test_port_in_use_is_fatal() {
    let blocker = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut settings = loopback_settings();
    settings.listener.port = blocker.local_addr().unwrap().port();

    let hub = Arc::new(TelemetryHub::new(settings, Box::new(MemoryStorage::new())).unwrap());
    assert!(hub.start().is_err());
}
