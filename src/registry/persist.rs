//! Background registry writer
//!
//! Mutations hand a full snapshot to [`Persister::submit`] and return
//! immediately. A dedicated thread owns the [`ConfigStorage`] and writes
//! snapshots in submission order; when several are queued only the newest is
//! written. Failures never reach the mutating caller, they are logged and
//! published as [`PersistenceWarning`]s.

use crate::config::{ConfigStorage, RegistryConfig};
use crate::error::{EspMonError, Result};
use crate::types::{now_millis, EpochMillis};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::Mutex;
use std::thread::JoinHandle;

/// Pending warnings kept for the UI before new ones are discarded
const WARNING_CHANNEL_CAPACITY: usize = 64;

/// A non-fatal persistence failure
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceWarning {
    pub timestamp: EpochMillis,
    pub message: String,
}

enum PersistRequest {
    Save(Box<RegistryConfig>),
    Flush(Sender<()>),
    Shutdown,
}

/// Handle to the writer thread
pub struct Persister {
    requests: Sender<PersistRequest>,
    warnings_tx: Sender<PersistenceWarning>,
    warnings_rx: Receiver<PersistenceWarning>,
    location: String,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Persister {
    /// Start the writer thread, taking ownership of the storage
    pub fn spawn(storage: Box<dyn ConfigStorage>) -> Result<Self> {
        let (requests, request_rx) = unbounded();
        let (warnings_tx, warnings_rx) = bounded(WARNING_CHANNEL_CAPACITY);
        let location = storage.describe();

        let thread_warnings = warnings_tx.clone();
        let handle = std::thread::Builder::new()
            .name("registry-persist".to_string())
            .spawn(move || run_writer(storage, request_rx, thread_warnings))
            .map_err(|e| EspMonError::Persistence(format!("Failed to start writer: {}", e)))?;

        Ok(Self {
            requests,
            warnings_tx,
            warnings_rx,
            location,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a snapshot for writing
    pub fn submit(&self, config: RegistryConfig) {
        if self.requests.send(PersistRequest::Save(Box::new(config))).is_err() {
            self.report(format!(
                "Registry writer for {} is not running, change not saved",
                self.location
            ));
        }
    }

    /// Block until every snapshot submitted so far has been written
    pub fn flush(&self) {
        let (tx, rx) = bounded(1);
        if self.requests.send(PersistRequest::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Receiver of persistence warnings
    pub fn warnings(&self) -> Receiver<PersistenceWarning> {
        self.warnings_rx.clone()
    }

    /// Publish a warning that did not come from the writer itself
    pub fn report(&self, message: String) {
        publish(&self.warnings_tx, message);
    }

    /// Write anything still queued and stop the thread
    pub fn shutdown(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = self.requests.send(PersistRequest::Shutdown);
            if handle.join().is_err() {
                tracing::error!("Registry writer thread panicked");
            }
        }
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn publish(warnings: &Sender<PersistenceWarning>, message: String) {
    tracing::warn!("{}", message);
    let warning = PersistenceWarning {
        timestamp: now_millis(),
        message,
    };
    if let Err(TrySendError::Full(_)) = warnings.try_send(warning) {
        tracing::debug!("Persistence warning queue full, warning discarded");
    }
}

fn run_writer(
    storage: Box<dyn ConfigStorage>,
    requests: Receiver<PersistRequest>,
    warnings: Sender<PersistenceWarning>,
) {
    tracing::debug!("Registry writer started for {}", storage.describe());

    while let Ok(first) = requests.recv() {
        let mut latest = None;
        let mut flushes = Vec::new();
        let mut shutdown = false;

        let mut next = Some(first);
        while let Some(request) = next.take() {
            match request {
                PersistRequest::Save(config) => latest = Some(config),
                PersistRequest::Flush(ack) => flushes.push(ack),
                PersistRequest::Shutdown => shutdown = true,
            }
            next = requests.try_recv().ok();
        }

        if let Some(config) = latest {
            match storage.save(&config) {
                Ok(()) => tracing::trace!("Registry saved to {}", storage.describe()),
                Err(e) => publish(
                    &warnings,
                    format!("Failed to save registry to {}: {}", storage.describe(), e),
                ),
            }
        }

        for ack in flushes {
            let _ = ack.send(());
        }

        if shutdown {
            break;
        }
    }

    tracing::debug!("Registry writer stopped");
}
