// rust/datalayer-core/src/dataset/reader.rs

use tracing::debug;

use super::cancel::CancelToken;
use super::sharding::ShardSelector;
use crate::error::{DataLayerError, Result};
use crate::storage::{Record, RecordCursor};

/// A cursor over a logically circular store, aware of this worker's shard.
///
/// The global offset counts every cursor step, owned or not, so that all
/// workers agree on which record an offset refers to.
pub struct RecordReader {
    cursor: Box<dyn RecordCursor>,
    selector: ShardSelector,
    offset: u64,
    wraps: u64,
}

impl RecordReader {
    pub fn new(cursor: Box<dyn RecordCursor>, selector: ShardSelector) -> Self {
        Self {
            cursor,
            selector,
            offset: 0,
            wraps: 0,
        }
    }

    /// Moves to the next record, restarting from the first one at the end
    /// of the store.
    pub fn advance(&mut self) -> Result<()> {
        self.cursor.next()?;

        if !self.cursor.is_valid() {
            debug!(offset = self.offset, "Restarting data prefetching from start");
            self.cursor.seek_first()?;
            self.wraps += 1;
        }

        self.offset += 1;
        Ok(())
    }

    /// Advances past records owned by other workers.
    ///
    /// Returns `Ok(false)` if `cancel` was set while skipping.
    pub fn skip_unowned(&mut self, cancel: &CancelToken) -> Result<bool> {
        while !self.selector.owns(self.offset) {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            self.advance()?;
        }
        Ok(true)
    }

    /// The record under the cursor.
    pub fn current(&mut self) -> Result<Record> {
        self.cursor
            .get(None)?
            .ok_or_else(|| DataLayerError::store("cursor returned no record"))
    }

    /// The record under the cursor, if the store has one.
    pub fn try_current(&mut self) -> Result<Option<Record>> {
        self.cursor.get(None)
    }

    /// A record carrying `label`, or `None` if the store has none.
    pub fn lookup(&mut self, label: i32) -> Result<Option<Record>> {
        self.cursor.get(Some(label))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of times the store has been restarted from its first record.
    pub fn wraps(&self) -> u64 {
        self.wraps
    }
}
