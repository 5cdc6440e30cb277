//! UDP networking
//!
//! - [`packet`] - datagram parsing into [`TelemetryEvent`]s
//! - [`listener`] - the receive loop feeding the ingest channel
//! - [`dispatch`] - outbound command datagrams

pub mod dispatch;
pub mod listener;
pub mod packet;

pub use dispatch::{CommandDispatcher, DispatchHandle};
pub use listener::{ListenerStats, ListenerStatsSnapshot, UdpListener};
pub use packet::{address_device_id, parse_datagram, PacketError, TelemetryEvent};
