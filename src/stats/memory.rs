//! In-memory counter store

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::{CounterDocument, CounterKind, CounterStore};
use crate::Result;

/// Counters kept for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    doc: Mutex<CounterDocument>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every counter
    pub fn document(&self) -> CounterDocument {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, kind: CounterKind, key: &str) -> Result<()> {
        self.doc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .increment(kind, key);
        Ok(())
    }

    fn snapshot(&self, kind: CounterKind) -> BTreeMap<String, u64> {
        self.doc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(kind)
            .clone()
    }

    fn record_last_country(&self, identity: &str, country_code: &str) -> Result<()> {
        self.doc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_login_country
            .insert(identity.to_string(), country_code.to_string());
        Ok(())
    }

    fn last_country(&self, identity: &str) -> Option<String> {
        self.doc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_login_country
            .get(identity)
            .cloned()
    }
}
