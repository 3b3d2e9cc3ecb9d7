// rust/datalayer-core/src/storage/mod.rs

//! Record store abstraction for the data layer.
//!
//! This module provides the traits the pipeline consumes to walk a record
//! store, the record types handed out by a store, and an in-memory
//! implementation.
//!
//! # Example
//!
//! ```no_run
//! use datalayer_core::storage::{MemoryStore, Record, RecordStore};
//!
//! let store = MemoryStore::new();
//! store.insert("digits", vec![
//!     Record::from_bytes(0, 1, 2, 2, vec![0u8, 1, 2, 3]),
//!     Record::from_bytes(1, 1, 2, 2, vec![4u8, 5, 6, 7]),
//! ]);
//!
//! let mut cursor = store.open("digits").unwrap();
//! while cursor.is_valid() {
//!     let record = cursor.get(None).unwrap().unwrap();
//!     println!("label {}", record.label);
//!     cursor.next().unwrap();
//! }
//! ```

mod memory;
mod record;
mod traits;

pub use memory::{MemoryCursor, MemoryStore};
pub use record::{Payload, Record, SideChannel, SideChannelFormat};
pub use traits::{RecordCursor, RecordStore};
