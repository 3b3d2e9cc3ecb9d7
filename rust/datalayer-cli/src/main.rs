//! Data Layer Prefetch Driver
//!
//! This binary runs prefetch pipelines over a synthetic in-memory record
//! store and reports what they produce. With `--paired` a second pipeline
//! is connected to the first and must mirror its labels batch for batch.
//!
//! # Usage
//!
//! ```bash
//! # Run a single pipeline with default settings
//! dlr-prefetch
//!
//! # Run a connected pair for 20 batches
//! dlr-prefetch --paired --batches 20
//!
//! # Start with configuration file
//! dlr-prefetch --config datalayer.toml
//! ```

use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use datalayer_core::config::SyncRole;
use datalayer_core::{DataLayerConfig, MemoryStore, PrefetchPipeline, Record, ScaleTransform};

/// Data Layer Prefetch Driver
#[derive(Parser, Debug)]
#[command(name = "dlr-prefetch")]
#[command(about = "Runs prefetch pipelines over a synthetic record store")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Number of synthetic records
    #[arg(long, default_value = "256")]
    records: usize,

    /// Number of distinct labels
    #[arg(long, default_value = "10")]
    classes: i32,

    /// Number of batches to take
    #[arg(short, long, default_value = "8")]
    batches: usize,

    /// Connect a secondary pipeline that follows the primary's labels
    #[arg(long)]
    paired: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn synthetic_records(count: usize, classes: i32, seed: u8) -> Vec<Record> {
    (0..count)
        .map(|i| {
            let label = i as i32 % classes;
            let fill = (label as u8).wrapping_mul(16).wrapping_add(seed);
            Record::from_bytes(label, 1, 4, 4, Bytes::from(vec![fill; 16]))
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.classes <= 0 {
        return Err("--classes must be positive".into());
    }

    let config = match &args.config {
        Some(path) => DataLayerConfig::from_file(path)?,
        None => DataLayerConfig::default(),
    }
    .with_env_overrides();

    tracing::info!("Starting data layer prefetch driver");
    tracing::info!("  Records: {}", args.records);
    tracing::info!("  Classes: {}", args.classes);
    tracing::info!("  Batch size: {}", config.data.batch_size);
    tracing::info!("  Ring depth: {}", config.prefetch.ring_depth);
    tracing::info!("  Paired: {}", args.paired);

    let store = MemoryStore::new();
    store.insert(
        config.data.source.clone(),
        synthetic_records(args.records, args.classes, 0),
    );

    let transform = Arc::new(ScaleTransform::new(1.0 / 255.0));

    let mut primary_config = config.clone();
    if args.paired {
        primary_config.sync.role = SyncRole::Primary;
    }
    let mut primary = PrefetchPipeline::open("primary", primary_config, &store, transform.clone())?;

    let mut secondary = if args.paired {
        let source = format!("{}-secondary", config.data.source);
        store.insert(
            source.clone(),
            synthetic_records(args.records, args.classes, 1),
        );

        let mut secondary_config = config.clone();
        secondary_config.data.source = source;
        secondary_config.data.images_per_blob = 1;
        secondary_config.sync.role = SyncRole::Secondary;
        Some(PrefetchPipeline::open(
            "secondary",
            secondary_config,
            &store,
            transform.clone(),
        )?)
    } else {
        None
    };

    primary.start()?;
    if let Some(secondary) = secondary.as_mut() {
        secondary.start()?;
        secondary.connect(&primary)?;
    }

    let mut mismatches = 0usize;
    for index in 0..args.batches {
        let batch = primary.take()?;
        tracing::info!(
            "Batch {} (slot {}): data {} labels {:?}",
            batch.sequence,
            batch.slot,
            batch.data.size_string(),
            batch.labels
        );

        if let Some(secondary) = secondary.as_ref() {
            let mirrored = secondary.take()?;
            if mirrored.labels != batch.labels {
                mismatches += 1;
                tracing::warn!(
                    "Batch {} labels differ: primary {:?} secondary {:?}",
                    index,
                    batch.labels,
                    mirrored.labels
                );
            }
        }
    }

    if let Some(mut secondary) = secondary.take() {
        let stats = secondary.stats();
        secondary.stop();
        tracing::info!(
            "Secondary: filled {} delivered {}",
            stats.batches_filled,
            stats.batches_delivered
        );
    }

    let stats = primary.stats();
    primary.stop();
    tracing::info!(
        "Primary: filled {} delivered {}",
        stats.batches_filled,
        stats.batches_delivered
    );

    if args.paired {
        if mismatches > 0 {
            return Err(format!("{} batches were not mirrored", mismatches).into());
        }
        tracing::info!("All {} batches mirrored", args.batches);
    }

    tracing::info!("Prefetch driver stopped");
    Ok(())
}
