// rust/datalayer-core/src/storage/memory.rs

//! In-memory record store.
//!
//! Holds every source fully in memory. Useful for tests, synthetic datasets
//! and small evaluation sets.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::record::Record;
use super::traits::{RecordCursor, RecordStore};
use crate::error::{DataLayerError, Result};

/// A record store backed by in-memory vectors.
#[derive(Default)]
pub struct MemoryStore {
    sources: RwLock<HashMap<String, Arc<[Record]>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a named source.
    pub fn insert(&self, source: impl Into<String>, records: Vec<Record>) {
        self.sources.write().insert(source.into(), records.into());
    }

    /// Number of records in `source`, if it exists.
    pub fn len(&self, source: &str) -> Option<usize> {
        self.sources.read().get(source).map(|r| r.len())
    }
}

impl RecordStore for MemoryStore {
    fn open(&self, source: &str) -> Result<Box<dyn RecordCursor>> {
        let records = self
            .sources
            .read()
            .get(source)
            .cloned()
            .ok_or_else(|| DataLayerError::store(format!("unknown source '{}'", source)))?;

        if records.is_empty() {
            return Err(DataLayerError::store(format!("source '{}' is empty", source)));
        }

        Ok(Box::new(MemoryCursor::from_shared(records)))
    }

    fn sources(&self) -> Vec<String> {
        let mut names: Vec<_> = self.sources.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Cursor over an in-memory record slice.
///
/// Label-constrained lookups scan forward from the cursor, wrapping once
/// around the slice, and never move the cursor.
#[derive(Debug, Clone)]
pub struct MemoryCursor {
    records: Arc<[Record]>,
    position: usize,
}

impl MemoryCursor {
    pub fn new(records: Vec<Record>) -> Self {
        Self::from_shared(records.into())
    }

    fn from_shared(records: Arc<[Record]>) -> Self {
        Self {
            records,
            position: 0,
        }
    }

    /// Index of the record under the cursor.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl RecordCursor for MemoryCursor {
    fn seek_first(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        if self.position < self.records.len() {
            self.position += 1;
        }
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.position < self.records.len()
    }

    fn get(&mut self, label: Option<i32>) -> Result<Option<Record>> {
        let len = self.records.len();

        match label {
            None => {
                if !self.is_valid() {
                    return Err(DataLayerError::store("cursor is past the last record"));
                }
                Ok(Some(self.records[self.position].clone()))
            }
            Some(label) => {
                let start = if self.is_valid() { self.position } else { 0 };
                Ok((0..len)
                    .map(|i| &self.records[(start + i) % len])
                    .find(|r| r.label == label)
                    .cloned())
            }
        }
    }
}
