// rust/datalayer-core/src/config.rs

//! Configuration management for the data layer.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{DataLayerError, Result};

/// Largest number of records concatenated into one sample.
pub const MAX_IMAGES_PER_BLOB: usize = 2;

// Top-level data layer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLayerConfig {
    pub data: DataConfig,
    pub shard: ShardConfig,
    pub prefetch: PrefetchConfig,
    pub noise: NoiseConfig,
    pub sync: SyncConfig,
}

/// How labels are encoded into the label tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    /// One integer label per record.
    #[default]
    Single,
    /// A label vector carried in each record's side channel.
    Multiple,
}

/// Training phase the pipeline feeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Train,
    /// Evaluation is never sharded.
    Test,
}

/// Distribution used to synthesize the non-matching noise record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillerType {
    #[default]
    Constant,
    Uniform,
    Gaussian,
}

/// Role of this pipeline in a cross-pipeline rendezvous.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRole {
    #[default]
    None,
    /// Publishes its label sequence to a connected secondary.
    Primary,
    /// Reproduces the label sequence of the pipeline it connects to.
    Secondary,
}

impl FromStr for SyncRole {
    type Err = DataLayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(DataLayerError::config(format!("unknown sync role '{}'", other))),
        }
    }
}

// Batch assembly options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    // Name of the record source to open.
    pub source: String,
    // Number of samples per batch.
    pub batch_size: usize,
    // Records concatenated along the channel axis per sample (1 or 2).
    pub images_per_blob: usize,
    // Whether a label tensor is produced at all.
    pub output_labels: bool,
    pub label_type: LabelType,
    // With paired samples, emit every record's label instead of a same/different flag.
    pub output_all_labels: bool,
    // Overrides the anchor label in all-labels output when >= 0.
    pub forced_primary_label: i32,
    // Alternate matching and non-matching pairs.
    pub balance_matches: bool,
    // Use a synthesized noise record as the non-matching companion.
    pub enable_noise_for_nonmatch: bool,
    // Log read and transform times for every batch.
    pub display_timing: bool,
}

// Data-parallel sharding options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub worker_count: u64,
    pub worker_rank: u64,
    pub phase: Phase,
}

/// Prefetch ring options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Number of batches in the ring.
    pub ring_depth: usize,
}

/// Noise record synthesis options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub filler: FillerType,
    /// Value used by the constant filler.
    pub value: f32,
    /// Inclusive lower bound of the uniform filler.
    pub min: f32,
    /// Exclusive upper bound of the uniform filler.
    pub max: f32,
    /// Mean of the gaussian filler.
    pub mean: f32,
    /// Standard deviation of the gaussian filler.
    pub std: f32,
    /// Multiply the noise by the transform's mean image.
    pub use_noisy_mean: bool,
    /// Label carried by the noise record.
    pub label: i32,
    /// Seed for reproducible noise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Cross-pipeline synchronization options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub role: SyncRole,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            source: "train".to_string(),
            batch_size: 64,
            images_per_blob: 1,
            output_labels: true,
            label_type: LabelType::Single,
            output_all_labels: false,
            forced_primary_label: -1,
            balance_matches: true,
            enable_noise_for_nonmatch: false,
            display_timing: false,
        }
    }
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            worker_rank: 0,
            phase: Phase::Train,
        }
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self { ring_depth: 3 }
    }
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            filler: FillerType::Constant,
            value: 0.0,
            min: 0.0,
            max: 1.0,
            mean: 0.0,
            std: 1.0,
            use_noisy_mean: false,
            label: -1,
            seed: None,
        }
    }
}

impl FromStr for DataLayerConfig {
    type Err = DataLayerError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| DataLayerError::config_with_source("failed to parse TOML config", e))
    }
}

impl DataLayerConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| DataLayerError::io(path, e))?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `DLR_` and use underscores
    // to separate nested fields. For example:
    // - `DLR_DATA_BATCH_SIZE` overrides `data.batch_size`
    // - `DLR_SHARD_WORKER_RANK` overrides `shard.worker_rank`
    // - `DLR_SYNC_ROLE` overrides `sync.role` ("none", "primary" or "secondary")
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Data overrides
        if let Ok(val) = std::env::var("DLR_DATA_SOURCE") {
            self.data.source = val;
        }
        if let Ok(val) = std::env::var("DLR_DATA_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.data.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("DLR_DATA_IMAGES_PER_BLOB") {
            if let Ok(v) = val.parse() {
                self.data.images_per_blob = v;
            }
        }
        if let Ok(val) = std::env::var("DLR_DATA_BALANCE_MATCHES") {
            if let Ok(v) = val.parse() {
                self.data.balance_matches = v;
            }
        }
        if let Ok(val) = std::env::var("DLR_DATA_ENABLE_NOISE_FOR_NONMATCH") {
            if let Ok(v) = val.parse() {
                self.data.enable_noise_for_nonmatch = v;
            }
        }
        if let Ok(val) = std::env::var("DLR_DATA_DISPLAY_TIMING") {
            if let Ok(v) = val.parse() {
                self.data.display_timing = v;
            }
        }

        // Shard overrides
        if let Ok(val) = std::env::var("DLR_SHARD_WORKER_COUNT") {
            if let Ok(v) = val.parse() {
                self.shard.worker_count = v;
            }
        }
        if let Ok(val) = std::env::var("DLR_SHARD_WORKER_RANK") {
            if let Ok(v) = val.parse() {
                self.shard.worker_rank = v;
            }
        }
        if let Ok(val) = std::env::var("DLR_SHARD_PHASE") {
            match val.to_lowercase().as_str() {
                "train" => self.shard.phase = Phase::Train,
                "test" => self.shard.phase = Phase::Test,
                _ => {} // ignore invalid values
            }
        }

        // Prefetch overrides
        if let Ok(val) = std::env::var("DLR_PREFETCH_RING_DEPTH") {
            if let Ok(v) = val.parse() {
                self.prefetch.ring_depth = v;
            }
        }

        // Noise overrides
        if let Ok(val) = std::env::var("DLR_NOISE_SEED") {
            if let Ok(v) = val.parse() {
                self.noise.seed = Some(v);
            }
        }

        // Sync overrides
        if let Ok(val) = std::env::var("DLR_SYNC_ROLE") {
            if let Ok(role) = val.parse() {
                self.sync.role = role;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        // Data validation
        if self.data.source.is_empty() {
            return Err(DataLayerError::config("data.source must not be empty"));
        }
        if self.data.batch_size == 0 {
            return Err(DataLayerError::config("data.batch_size must be greater than 0"));
        }
        if self.data.images_per_blob == 0 || self.data.images_per_blob > MAX_IMAGES_PER_BLOB {
            return Err(DataLayerError::config(format!(
                "data.images_per_blob must be 1 or {}, got {}",
                MAX_IMAGES_PER_BLOB, self.data.images_per_blob
            )));
        }
        if self.data.label_type == LabelType::Multiple && self.data.images_per_blob > 1 {
            return Err(DataLayerError::config(
                "data.label_type 'multiple' cannot be combined with paired samples",
            ));
        }

        // Shard validation
        if self.shard.worker_count == 0 {
            return Err(DataLayerError::config(
                "shard.worker_count must be greater than 0",
            ));
        }
        if self.shard.worker_rank >= self.shard.worker_count {
            return Err(DataLayerError::config(format!(
                "shard.worker_rank {} must be less than shard.worker_count {}",
                self.shard.worker_rank, self.shard.worker_count
            )));
        }

        // Prefetch validation
        if self.prefetch.ring_depth == 0 {
            return Err(DataLayerError::config(
                "prefetch.ring_depth must be greater than 0",
            ));
        }

        // Noise validation
        match self.noise.filler {
            FillerType::Uniform if self.noise.min >= self.noise.max => {
                return Err(DataLayerError::config(
                    "noise.min must be less than noise.max for the uniform filler",
                ));
            }
            FillerType::Gaussian if self.noise.std <= 0.0 => {
                return Err(DataLayerError::config(
                    "noise.std must be greater than 0 for the gaussian filler",
                ));
            }
            _ => {}
        }

        // Sync validation
        if self.sync.role == SyncRole::Secondary && self.data.images_per_blob > 1 {
            return Err(DataLayerError::config(
                "a secondary pipeline cannot load more than one record per sample",
            ));
        }

        Ok(())
    }

    /// Number of records concatenated into each sample.
    pub fn pairing_width(&self) -> usize {
        self.data.images_per_blob
    }

    /// Whether the worker waits for `connect` before producing.
    pub fn delays_start(&self) -> bool {
        self.sync.role != SyncRole::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = DataLayerConfig::default();

        assert_eq!(config.data.source, "train");
        assert_eq!(config.data.batch_size, 64);
        assert_eq!(config.data.images_per_blob, 1);
        assert!(config.data.output_labels);
        assert_eq!(config.data.label_type, LabelType::Single);
        assert!(!config.data.output_all_labels);
        assert_eq!(config.data.forced_primary_label, -1);
        assert!(config.data.balance_matches);
        assert!(!config.data.enable_noise_for_nonmatch);

        assert_eq!(config.shard.worker_count, 1);
        assert_eq!(config.shard.worker_rank, 0);
        assert_eq!(config.shard.phase, Phase::Train);

        assert_eq!(config.prefetch.ring_depth, 3);

        assert_eq!(config.noise.filler, FillerType::Constant);
        assert_eq!(config.noise.label, -1);
        assert!(config.noise.seed.is_none());

        assert_eq!(config.sync.role, SyncRole::None);
        assert!(!config.delays_start());
    }

    #[test]
    fn test_default_validates() {
        let config = DataLayerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_empty() {
        let config: DataLayerConfig = "".parse().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_full() {
        let toml = r#"
            [data]
            source = "pairs"
            batch_size = 8
            images_per_blob = 2
            output_all_labels = true
            forced_primary_label = 3
            balance_matches = true
            enable_noise_for_nonmatch = true
            display_timing = true

            [shard]
            worker_count = 4
            worker_rank = 2
            phase = "test"

            [prefetch]
            ring_depth = 5

            [noise]
            filler = "gaussian"
            mean = 0.5
            std = 0.1
            label = 99
            seed = 7

            [sync]
            role = "primary"
        "#;
        let config: DataLayerConfig = toml.parse().unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.data.source, "pairs");
        assert_eq!(config.data.batch_size, 8);
        assert_eq!(config.pairing_width(), 2);
        assert!(config.data.output_all_labels);
        assert_eq!(config.data.forced_primary_label, 3);
        assert!(config.data.enable_noise_for_nonmatch);
        assert!(config.data.display_timing);
        assert_eq!(config.shard.worker_count, 4);
        assert_eq!(config.shard.worker_rank, 2);
        assert_eq!(config.shard.phase, Phase::Test);
        assert_eq!(config.prefetch.ring_depth, 5);
        assert_eq!(config.noise.filler, FillerType::Gaussian);
        assert_eq!(config.noise.label, 99);
        assert_eq!(config.noise.seed, Some(7));
        assert_eq!(config.sync.role, SyncRole::Primary);
        assert!(config.delays_start());
    }

    #[test]
    fn test_from_str_invalid() {
        let result: Result<DataLayerConfig> = "[data]\nbatch_size = \"many\"".parse();
        assert!(matches!(result, Err(DataLayerError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_wide_pairing() {
        let mut config = DataLayerConfig::default();
        config.data.images_per_blob = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_multi_label_pairs() {
        let mut config = DataLayerConfig::default();
        config.data.images_per_blob = 2;
        config.data.label_type = LabelType::Multiple;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_rank() {
        let mut config = DataLayerConfig::default();
        config.shard.worker_count = 2;
        config.shard.worker_rank = 2;
        assert!(config.validate().is_err());

        config.shard.worker_count = 0;
        config.shard.worker_rank = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_paired_secondary() {
        let mut config = DataLayerConfig::default();
        config.sync.role = SyncRole::Secondary;
        config.data.images_per_blob = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_noise_ranges() {
        let mut config = DataLayerConfig::default();
        config.noise.filler = FillerType::Uniform;
        config.noise.min = 1.0;
        config.noise.max = 1.0;
        assert!(config.validate().is_err());

        config.noise.filler = FillerType::Gaussian;
        config.noise.std = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_ring() {
        let mut config = DataLayerConfig::default();
        config.prefetch.ring_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[data]\nbatch_size = 16\n\n[prefetch]\nring_depth = 2").unwrap();

        let config = DataLayerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.data.batch_size, 16);
        assert_eq!(config.prefetch.ring_depth, 2);
    }

    #[test]
    fn test_from_file_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[data]\nbatch_size = 0").unwrap();

        assert!(DataLayerConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let result = DataLayerConfig::from_file("/nonexistent/datalayer.toml");
        assert!(matches!(result, Err(DataLayerError::Io { .. })));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("DLR_PREFETCH_RING_DEPTH", "9");
        std::env::set_var("DLR_SYNC_ROLE", "secondary");
        std::env::set_var("DLR_SHARD_PHASE", "bogus");

        let config = DataLayerConfig::default().with_env_overrides();

        std::env::remove_var("DLR_PREFETCH_RING_DEPTH");
        std::env::remove_var("DLR_SYNC_ROLE");
        std::env::remove_var("DLR_SHARD_PHASE");

        assert_eq!(config.prefetch.ring_depth, 9);
        assert_eq!(config.sync.role, SyncRole::Secondary);
        assert_eq!(config.shard.phase, Phase::Train);
    }

    #[test]
    fn test_sync_role_from_str() {
        assert_eq!("Primary".parse::<SyncRole>().unwrap(), SyncRole::Primary);
        assert!("leader".parse::<SyncRole>().is_err());
    }
}
