// rust/datalayer-core/src/dataset/pairing.rs

//! Companion selection and label encoding for paired samples.

use tracing::trace;

use super::reader::RecordReader;
use crate::config::{DataConfig, LabelType};
use crate::error::{DataLayerError, Result};
use crate::storage::Record;

/// Draws allowed after the first one when looking for a non-matching companion.
pub const NONMATCH_RETRIES: usize = 3;

/// Whether the next companion should share the anchor's label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairKind {
    Matching,
    NonMatching,
}

/// How labels are written for each sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelScheme {
    /// The anchor label.
    Single,
    /// `1` when anchor and companion share a label, else `0`.
    PairFlag,
    /// The anchor label (or a forced value) followed by the companion label.
    AllLabels { forced_primary: Option<i32> },
    /// A vector decoded from the record's side channel.
    Multiple { dim: usize },
}

impl LabelScheme {
    /// Picks the scheme for `config`, decoding `first` to size multi-labels.
    ///
    /// Returns `Ok(None)` when labels are not produced.
    pub fn from_config(config: &DataConfig, first: &Record) -> Result<Option<Self>> {
        if !config.output_labels {
            return Ok(None);
        }

        let scheme = match config.label_type {
            LabelType::Multiple => {
                let side = first.side_channel.as_ref().ok_or_else(|| {
                    DataLayerError::malformed_labels("multi-label record has no side channel")
                })?;
                Self::Multiple {
                    dim: side.decode()?.len(),
                }
            }
            LabelType::Single if config.images_per_blob > 1 => {
                if config.output_all_labels {
                    Self::AllLabels {
                        forced_primary: (config.forced_primary_label >= 0)
                            .then_some(config.forced_primary_label),
                    }
                } else {
                    Self::PairFlag
                }
            }
            LabelType::Single => Self::Single,
        };

        Ok(Some(scheme))
    }

    /// Values written per sample.
    pub fn label_dim(&self) -> usize {
        match self {
            Self::Single | Self::PairFlag => 1,
            Self::AllLabels { .. } => 2,
            Self::Multiple { dim } => *dim,
        }
    }

    /// Writes the labels for one sample into `out`, which holds exactly
    /// `label_dim()` values.
    pub fn encode(&self, anchor: &Record, companion: Option<&Record>, out: &mut [f32]) -> Result<()> {
        match self {
            Self::Single => out[0] = anchor.label as f32,
            Self::PairFlag => {
                let companion = require_companion(companion)?;
                out[0] = if anchor.label == companion.label { 1.0 } else { 0.0 };
            }
            Self::AllLabels { forced_primary } => {
                let companion = require_companion(companion)?;
                out[0] = forced_primary.unwrap_or(anchor.label) as f32;
                out[1] = companion.label as f32;
            }
            Self::Multiple { dim } => {
                let side = anchor.side_channel.as_ref().ok_or_else(|| {
                    DataLayerError::malformed_labels(format!(
                        "record with label {} has no side channel",
                        anchor.label
                    ))
                })?;
                let labels = side.decode()?;
                if labels.len() != *dim {
                    return Err(DataLayerError::malformed_labels(format!(
                        "expected {} labels, decoded {}",
                        dim,
                        labels.len()
                    )));
                }
                out.copy_from_slice(&labels);
            }
        }
        Ok(())
    }
}

fn require_companion(companion: Option<&Record>) -> Result<&Record> {
    companion.ok_or_else(|| DataLayerError::config("paired label scheme without a companion record"))
}

/// Chooses the second record of each paired sample.
///
/// With balancing enabled, samples alternate between matching and
/// non-matching companions, starting with a matching one.
#[derive(Debug, Clone)]
pub struct PairingEngine {
    matching_cycle: bool,
    balance_matches: bool,
    noise: Option<Record>,
}

impl PairingEngine {
    pub fn new(balance_matches: bool, noise: Option<Record>) -> Self {
        Self {
            matching_cycle: true,
            balance_matches,
            noise,
        }
    }

    /// The kind of companion the next sample needs.
    pub fn decision(&self) -> PairKind {
        if self.matching_cycle {
            PairKind::Matching
        } else {
            PairKind::NonMatching
        }
    }

    /// Flips the balancing cycle. Called once per sample.
    pub fn advance_cycle(&mut self) {
        self.matching_cycle = !self.matching_cycle;
    }

    /// Returns a companion for `anchor`. The reader must already be
    /// positioned on the candidate following the anchor.
    pub fn choose(&self, anchor: &Record, reader: &mut RecordReader) -> Result<Record> {
        if !self.balance_matches {
            return match &self.noise {
                Some(noise) => Ok(noise.clone()),
                None => reader.current(),
            };
        }

        match self.decision() {
            PairKind::Matching => reader
                .lookup(anchor.label)?
                .ok_or(DataLayerError::LabelNotFound {
                    label: anchor.label,
                }),
            PairKind::NonMatching => match &self.noise {
                Some(noise) => Ok(noise.clone()),
                None => draw_nonmatching(anchor, reader),
            },
        }
    }

    pub fn noise(&self) -> Option<&Record> {
        self.noise.as_ref()
    }
}

fn draw_nonmatching(anchor: &Record, reader: &mut RecordReader) -> Result<Record> {
    let mut candidate = reader.try_current()?;
    let mut attempts = 0;

    loop {
        match candidate.take() {
            Some(record) if record.label != anchor.label => return Ok(record),
            _ if attempts == NONMATCH_RETRIES => {
                return Err(DataLayerError::PairingExhausted {
                    label: anchor.label,
                    attempts,
                });
            }
            _ => {
                trace!(label = anchor.label, attempts, "redrawing non-matching companion");
                reader.advance()?;
                candidate = reader.try_current()?;
                attempts += 1;
            }
        }
    }
}
