// rust/datalayer-core/src/storage/traits.rs

//! Record store abstraction traits for the data layer.
//!
//! The data layer never parses a record file itself. It walks a store
//! through a `RecordCursor`, which allows different store implementations
//! to be used interchangeably.

use crate::error::Result;

use super::record::Record;

/// Sequential iterator over a fixed record store.
///
/// A cursor is owned by exactly one pipeline worker and is never shared
/// between threads while in use.
pub trait RecordCursor: Send {
    /// Moves the cursor to the first record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be repositioned.
    fn seek_first(&mut self) -> Result<()>;

    /// Advances the cursor by one record. Moving past the last record
    /// leaves the cursor invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails while advancing.
    fn next(&mut self) -> Result<()>;

    /// Returns true while the cursor points at a record.
    fn is_valid(&self) -> bool;

    /// Reads a record.
    ///
    /// With `None` this is the record under the cursor. With `Some(label)`
    /// the store looks up a record carrying that label; `Ok(None)` means the
    /// label does not occur in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails while reading.
    fn get(&mut self, label: Option<i32>) -> Result<Option<Record>>;
}

/// A collection of named record sources.
pub trait RecordStore: Send + Sync {
    /// Opens a cursor positioned on the first record of `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source does not exist or is empty.
    fn open(&self, source: &str) -> Result<Box<dyn RecordCursor>>;

    /// Lists the available sources.
    fn sources(&self) -> Vec<String>;
}
