// rust/datalayer-core/src/lib.rs

//! Data Layer Runtime - Core Library
//!
//! This crate feeds training loops with batches read from record stores.
//! Records are sharded across workers, optionally paired into matching and
//! non-matching samples, and prefetched in the background into a fixed ring
//! of batches. Two pipelines can be synchronized so that a secondary
//! produces batches with exactly the labels of a primary.

pub mod config;
pub mod error;
pub mod storage;
pub mod tensor;
pub mod transform;

// Re-export commonly used types for convenience
pub use config::DataLayerConfig;
pub use error::{DataLayerError, Result};
pub use storage::{MemoryCursor, MemoryStore, Record, RecordCursor, RecordStore};
pub use tensor::Tensor;
pub use transform::{ScaleTransform, Transform};

pub mod dataset;
pub use dataset::{
    Batch, BatchLease, BatchObserver, CancelToken, LabelSync, PipelineState, PrefetchPipeline,
    ShardSelector,
};
