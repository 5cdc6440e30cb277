//! Outbound command datagrams
//!
//! Each send opens its own ephemeral socket on a short-lived thread, sends a
//! single datagram and reports the outcome once on a [`DispatchHandle`]. There
//! is no retry; callers may wait on the handle or drop it.

use crate::config::DEFAULT_UDP_PORT;
use crate::error::{EspMonError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Result of one delivery attempt
pub type DispatchOutcome = std::result::Result<usize, String>;

/// One-shot completion of a send
#[derive(Debug)]
pub struct DispatchHandle {
    target: SocketAddr,
    outcome: Receiver<DispatchOutcome>,
}

impl DispatchHandle {
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Block until the send completes; returns bytes sent
    pub fn wait(self) -> Result<usize> {
        match self.outcome.recv() {
            Ok(outcome) => outcome.map_err(EspMonError::Dispatch),
            Err(_) => Err(EspMonError::Dispatch(format!(
                "Send to {} ended without a result",
                self.target
            ))),
        }
    }

    /// Wait at most `timeout`
    pub fn wait_timeout(self, timeout: Duration) -> Result<usize> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => outcome.map_err(EspMonError::Dispatch),
            Err(RecvTimeoutError::Timeout) => Err(EspMonError::Dispatch(format!(
                "Send to {} did not complete within {:?}",
                self.target, timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(EspMonError::Dispatch(format!(
                "Send to {} ended without a result",
                self.target
            ))),
        }
    }

    /// Non-blocking poll; `None` while the send is still in flight
    pub fn try_result(&self) -> Option<Result<usize>> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome.map_err(EspMonError::Dispatch)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(EspMonError::Dispatch(format!(
                "Send to {} ended without a result",
                self.target
            )))),
        }
    }
}

/// Sends JSON payloads to devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDispatcher {
    device_port: u16,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_UDP_PORT)
    }
}

impl CommandDispatcher {
    pub fn new(device_port: u16) -> Self {
        Self { device_port }
    }

    pub fn device_port(&self) -> u16 {
        self.device_port
    }

    /// Target endpoint for a device address (IP literal, optionally with a port)
    pub fn resolve_target(&self, address: &str) -> Result<SocketAddr> {
        let address = address.trim();
        if address.is_empty() {
            return Err(EspMonError::Dispatch(
                "Device has no known address".to_string(),
            ));
        }
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return Ok(addr);
        }
        address
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, self.device_port))
            .map_err(|_| EspMonError::Dispatch(format!("Invalid device address '{}'", address)))
    }

    /// Send `payload` to a device address on the device port
    pub fn send_to_address(
        &self,
        address: &str,
        payload: &serde_json::Value,
    ) -> Result<DispatchHandle> {
        let target = self.resolve_target(address)?;
        self.send(target, payload)
    }

    /// Serialize `payload` and send it to `target` in the background
    pub fn send(&self, target: SocketAddr, payload: &serde_json::Value) -> Result<DispatchHandle> {
        let bytes = serde_json::to_vec(payload)?;
        let (tx, outcome) = bounded(1);

        std::thread::Builder::new()
            .name("command-dispatch".to_string())
            .spawn(move || {
                let result = send_once(target, &bytes);
                match &result {
                    Ok(sent) => tracing::debug!("Sent {} byte command to {}", sent, target),
                    Err(e) => tracing::warn!("Command to {} failed: {}", target, e),
                }
                let _ = tx.send(result);
            })
            .map_err(|e| EspMonError::Dispatch(format!("Failed to start send: {}", e)))?;

        Ok(DispatchHandle { target, outcome })
    }
}

fn send_once(target: SocketAddr, bytes: &[u8]) -> DispatchOutcome {
    let local = match target {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(local).map_err(|e| format!("bind failed: {}", e))?;
    socket
        .send_to(bytes, target)
        .map_err(|e| format!("send failed: {}", e))
}
