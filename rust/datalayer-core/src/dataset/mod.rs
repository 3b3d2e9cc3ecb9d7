// rust/datalayer-core/src/dataset/mod.rs

//! Batch production: sharded reading, pairing, assembly and prefetching.
//!
//! # Example
//!
//! ```ignore
//! use datalayer_core::{DataLayerConfig, MemoryStore, PrefetchPipeline, ScaleTransform};
//! use std::sync::Arc;
//!
//! let store = MemoryStore::new();
//! store.insert("train", records);
//!
//! let config: DataLayerConfig = "[data]\nbatch_size = 32".parse()?;
//! let mut pipeline = PrefetchPipeline::open(
//!     "train",
//!     config,
//!     &store,
//!     Arc::new(ScaleTransform::new(1.0 / 255.0)),
//! )?;
//! pipeline.start()?;
//!
//! let batch = pipeline.take()?;
//! // Consume batch.data and batch.label; dropping the lease recycles it.
//! ```

mod assembler;
mod cancel;
mod noise;
mod pairing;
mod prefetch;
mod reader;
mod sharding;
mod sync;

pub use assembler::{Batch, BatchAssembler, Fill};
pub use cancel::{CancelListener, CancelToken};
pub use noise::synthesize as synthesize_noise;
pub use pairing::{LabelScheme, PairKind, PairingEngine, NONMATCH_RETRIES};
pub use prefetch::{
    BatchLease, BatchObserver, PipelineState, PipelineStats, PrefetchPipeline, SubscriptionId,
};
pub use reader::RecordReader;
pub use sharding::{owns, ShardSelector};
pub use sync::{HandshakeState, LabelSync};
