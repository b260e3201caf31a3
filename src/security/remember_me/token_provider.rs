//! Persisted remember-me records.
//!
//! # Design Decisions
//! - One record per series; series are never reused
//! - `update_token` is a compare-and-swap on the token value so concurrent
//!   rotations of the same series cannot both succeed

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Debug;

use crate::security::error::BackendError;

/// A persisted remember-me login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentLoginRecord {
    pub series: String,
    pub token_value: String,
    pub user_class: String,
    pub user_identifier: String,
    /// Unix seconds of the last successful use.
    pub last_used: u64,
}

/// Backend for persisted remember-me records, keyed by series.
pub trait TokenProvider: Send + Sync + Debug {
    fn load_token_by_series(&self, series: &str) -> Result<Option<PersistentLoginRecord>, BackendError>;

    /// Insert a new record. `Conflict` if the series already exists.
    fn create_new_token(&self, record: PersistentLoginRecord) -> Result<(), BackendError>;

    /// Set a new token value only if the stored one still equals `expected`.
    /// Returns whether the write happened.
    fn update_token(&self, series: &str, expected: &str, new_value: &str, last_used: u64) -> Result<bool, BackendError>;

    fn delete_token_by_series(&self, series: &str) -> Result<(), BackendError>;
}

/// In-process provider.
#[derive(Debug, Default)]
pub struct MemoryTokenProvider {
    records: DashMap<String, PersistentLoginRecord>,
}

impl MemoryTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl TokenProvider for MemoryTokenProvider {
    fn load_token_by_series(&self, series: &str) -> Result<Option<PersistentLoginRecord>, BackendError> {
        Ok(self.records.get(series).map(|r| r.value().clone()))
    }

    fn create_new_token(&self, record: PersistentLoginRecord) -> Result<(), BackendError> {
        match self.records.entry(record.series.clone()) {
            Entry::Occupied(_) => Err(BackendError::Conflict("series already exists".into())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    fn update_token(&self, series: &str, expected: &str, new_value: &str, last_used: u64) -> Result<bool, BackendError> {
        let Some(mut record) = self.records.get_mut(series) else {
            return Ok(false);
        };
        if record.token_value != expected {
            return Ok(false);
        }
        record.token_value = new_value.to_string();
        record.last_used = last_used;
        Ok(true)
    }

    fn delete_token_by_series(&self, series: &str) -> Result<(), BackendError> {
        self.records.remove(series);
        Ok(())
    }
}
