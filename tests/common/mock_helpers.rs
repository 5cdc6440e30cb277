//! In-memory registry storage for integration tests

use espmon_rs::{ConfigStorage, EspMonError, RegistryConfig, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Storage that keeps the last saved registry in memory
///
/// Clones share state, so a test can keep one handle while the registry owns
/// another.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    saved: Arc<Mutex<Option<RegistryConfig>>>,
    saves: Arc<AtomicUsize>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an already stored registry
    pub fn with_config(config: RegistryConfig) -> Self {
        let storage = Self::default();
        *storage.saved.lock().unwrap() = Some(config);
        storage
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Option<RegistryConfig> {
        self.saved.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ConfigStorage for MemoryStorage {
    fn load(&self) -> Result<Option<RegistryConfig>> {
        Ok(self.saved())
    }

    fn save(&self, config: &RegistryConfig) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(EspMonError::Persistence("simulated write failure".to_string()));
        }
        *self.saved.lock().unwrap() = Some(config.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
