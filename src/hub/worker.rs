//! Ingest worker thread
//!
//! Drains the listener's event channel in arrival order and runs each event
//! through [`TelemetryHub::ingest`]. Exits when the listener side of the
//! channel is gone or the shared `running` flag is cleared.

use super::TelemetryHub;
use crate::net::packet::TelemetryEvent;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a `recv` waits before re-checking the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct IngestWorker {
    hub: Arc<TelemetryHub>,
    events: Receiver<TelemetryEvent>,
    running: Arc<AtomicBool>,
}

impl IngestWorker {
    pub fn new(
        hub: Arc<TelemetryHub>,
        events: Receiver<TelemetryEvent>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            hub,
            events,
            running,
        }
    }

    /// Run the worker loop (blocking)
    pub fn run(self) {
        tracing::debug!("Ingest worker started");

        loop {
            match self.events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => {
                    self.hub.ingest(&event);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Whatever the listener queued before stopping still counts
        while let Ok(event) = self.events.try_recv() {
            self.hub.ingest(&event);
        }

        tracing::debug!("Ingest worker stopped");
    }
}
