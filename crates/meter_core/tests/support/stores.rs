#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use meter_core::persistence::{MemoryStore, PersistenceError, SnapshotStore};
use meter_core::pricing::RateConfig;
use meter_core::ride::RideState;

/// Memory store whose first `failures` snapshot saves fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn save_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl SnapshotStore for FlakyStore {
    fn save_active_ride(&self, state: &RideState) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PersistenceError::Io("disk full".to_string()));
        }
        self.inner.save_active_ride(state)
    }

    fn load_active_ride(&self) -> Result<Option<RideState>, PersistenceError> {
        self.inner.load_active_ride()
    }

    fn clear_active_ride(&self) -> Result<(), PersistenceError> {
        self.inner.clear_active_ride()
    }

    fn save_rate_config(&self, config: &RateConfig) -> Result<(), PersistenceError> {
        self.inner.save_rate_config(config)
    }

    fn load_rate_config(&self) -> Result<Option<RateConfig>, PersistenceError> {
        self.inner.load_rate_config()
    }
}
