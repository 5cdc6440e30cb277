//! UDP receive loop
//!
//! The listener owns the bound socket and does nothing but read, parse and
//! forward: every valid datagram becomes one [`TelemetryEvent`] on a bounded
//! channel, consumed in arrival order by the ingest worker.
//!
//! ```ignore
//! let running = Arc::new(AtomicBool::new(true));
//! let (listener, events) = UdpListener::bind(&settings.listener, running.clone())?;
//! std::thread::spawn(move || listener.run());
//!
//! while let Ok(event) = events.recv() {
//!     println!("{} = {}", event.key(), event.value);
//! }
//! ```
//!
//! Malformed datagrams are logged and counted, never fatal. When the worker
//! falls behind and the channel is full, new events are dropped and counted.

use crate::config::ListenerSettings;
use crate::error::{EspMonError, Result};
use crate::net::packet::{parse_datagram, TelemetryEvent};
use crate::types::now_millis;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Datagram counters, shared with whoever wants to display them
#[derive(Debug, Default)]
pub struct ListenerStats {
    received: AtomicU64,
    malformed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`ListenerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStatsSnapshot {
    /// Datagrams read from the socket
    pub received: u64,
    /// Datagrams that failed to parse
    pub malformed: u64,
    /// Valid events discarded because the ingest channel was full
    pub dropped: u64,
}

impl ListenerStats {
    pub fn snapshot(&self) -> ListenerStatsSnapshot {
        ListenerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Receiver side of the telemetry socket
pub struct UdpListener {
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    events_tx: Sender<TelemetryEvent>,
    stats: Arc<ListenerStats>,
    max_datagram_size: usize,
}

impl UdpListener {
    /// Bind the socket and create the event channel
    ///
    /// Failing to bind is the one listener error callers should treat as fatal.
    pub fn bind(
        settings: &ListenerSettings,
        running: Arc<AtomicBool>,
    ) -> Result<(Self, Receiver<TelemetryEvent>)> {
        let addr = settings.socket_addr();
        let socket = UdpSocket::bind(addr).map_err(|e| {
            EspMonError::Io(e).with_context(format!("Failed to bind UDP listener on {}", addr))
        })?;

        // Short timeout so the loop notices shutdown
        socket.set_read_timeout(Some(settings.read_timeout()))?;

        let (events_tx, events_rx) = bounded(settings.channel_capacity.max(1));

        tracing::info!("UDP listener bound to {}", socket.local_addr()?);

        Ok((
            Self {
                socket,
                running,
                events_tx,
                stats: Arc::new(ListenerStats::default()),
                max_datagram_size: settings.max_datagram_size.max(1),
            },
            events_rx,
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        self.stats.clone()
    }

    /// Run the receive loop until `running` is cleared (blocking)
    pub fn run(self) {
        tracing::info!("UDP listener started");

        let mut buffer = vec![0u8; self.max_datagram_size];

        while self.running.load(Ordering::SeqCst) {
            let (len, source) = match self.socket.recv_from(&mut buffer) {
                Ok(result) => result,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    tracing::error!("UDP recv error: {}", e);
                    continue;
                }
            };
            self.stats.received.fetch_add(1, Ordering::Relaxed);

            let event = match parse_datagram(&buffer[..len], source, now_millis()) {
                Ok(event) => event,
                Err(e) => {
                    self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Dropped datagram from {}: {}", source, e);
                    continue;
                }
            };

            match self.events_tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Ingest queue full, dropped sample for {}", event.key());
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!("Event receiver gone, stopping listener");
                    break;
                }
            }
        }

        tracing::info!("UDP listener stopped");
    }
}
