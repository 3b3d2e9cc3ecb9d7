// rust/datalayer-core/src/dataset/assembler.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::cancel::CancelToken;
use super::pairing::{LabelScheme, PairingEngine};
use super::reader::RecordReader;
use super::sync::LabelSync;
use crate::config::DataLayerConfig;
use crate::error::{DataLayerError, Result};
use crate::storage::Record;
use crate::tensor::{shape_count, Tensor};
use crate::transform::Transform;

/// One slot of the prefetch ring.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Ring position this batch occupies.
    pub slot: usize,
    /// Fill count at which this batch was produced.
    pub sequence: u64,
    pub data: Tensor,
    pub label: Option<Tensor>,
    /// Anchor labels of the last completed fill, in sample order.
    pub labels: Vec<i32>,
}

impl Batch {
    pub fn new(slot: usize, data_shape: &[usize], label_shape: Option<&[usize]>) -> Self {
        Self {
            slot,
            sequence: 0,
            data: Tensor::new(data_shape),
            label: label_shape.map(Tensor::new),
            labels: Vec::new(),
        }
    }

    /// Number of samples in the last completed fill.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Outcome of a fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fill {
    /// Every sample was loaded; carries the realized labels.
    Complete(Vec<i32>),
    /// Cancellation was observed; the batch is unchanged.
    Cancelled,
}

/// Fills batches from a sharded reader.
///
/// Samples are staged in scratch buffers and only copied into the batch
/// once the whole batch is loaded, so an interrupted fill never exposes a
/// partially written batch.
pub struct BatchAssembler {
    name: String,
    batch_size: usize,
    width: usize,
    scheme: Option<LabelScheme>,
    reader: RecordReader,
    pairing: PairingEngine,
    transform: Arc<dyn Transform>,
    sync: Option<Arc<LabelSync>>,
    display_timing: bool,
    data_shape: Vec<usize>,
    scratch_data: Vec<f32>,
    scratch_labels: Vec<f32>,
}

impl BatchAssembler {
    pub fn new(
        name: impl Into<String>,
        config: &DataLayerConfig,
        reader: RecordReader,
        transform: Arc<dyn Transform>,
        pairing: PairingEngine,
        scheme: Option<LabelScheme>,
    ) -> Self {
        Self {
            name: name.into(),
            batch_size: config.data.batch_size,
            width: config.pairing_width(),
            scheme,
            reader,
            pairing,
            transform,
            sync: None,
            display_timing: config.data.display_timing,
            data_shape: Vec::new(),
            scratch_data: Vec::new(),
            scratch_labels: Vec::new(),
        }
    }

    /// Makes this assembler follow label sequences published through `sync`.
    #[must_use]
    pub fn with_sync(mut self, sync: Arc<LabelSync>) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Loads `batch_size` samples into `batch`.
    ///
    /// # Errors
    ///
    /// Propagates store and transform failures, plus pairing and label
    /// errors. The batch is left untouched on error or cancellation.
    pub fn fill(&mut self, batch: &mut Batch, cancel: &CancelToken) -> Result<Fill> {
        let started = Instant::now();
        let mut read_time = Duration::ZERO;
        let mut transform_time = Duration::ZERO;

        let targets = match &self.sync {
            Some(sync) => match sync.consume() {
                Some(labels) => {
                    if labels.len() != self.batch_size {
                        return Err(DataLayerError::LabelCountMismatch {
                            expected: self.batch_size,
                            actual: labels.len(),
                        });
                    }
                    Some(labels)
                }
                None => return Ok(Fill::Cancelled),
            },
            None => None,
        };

        let label_dim = self.scheme.map_or(0, |s| s.label_dim());
        self.scratch_labels.clear();
        self.scratch_labels.resize(self.batch_size * label_dim, 0.0);

        let mut realized = Vec::with_capacity(self.batch_size);
        let mut record_dim = 0;

        for i in 0..self.batch_size {
            let t = Instant::now();
            if !self.reader.skip_unowned(cancel)? {
                return Ok(Fill::Cancelled);
            }

            let (anchor, companion) = match &targets {
                Some(labels) => {
                    let label = labels[i];
                    let record = self
                        .reader
                        .lookup(label)?
                        .ok_or(DataLayerError::LabelNotFound { label })?;
                    (record, None)
                }
                None => {
                    let anchor = self.reader.current()?;
                    let companion = if self.width > 1 {
                        self.reader.advance()?;
                        if !self.reader.skip_unowned(cancel)? {
                            return Ok(Fill::Cancelled);
                        }
                        Some(self.pairing.choose(&anchor, &mut self.reader)?)
                    } else {
                        None
                    };
                    self.pairing.advance_cycle();
                    (anchor, companion)
                }
            };
            read_time += t.elapsed();

            let t = Instant::now();
            if i == 0 {
                record_dim = self.reshape_from(&anchor)?;
            }
            let item_dim = record_dim * self.width;
            let base = i * item_dim;

            self.stage(&anchor, base, record_dim)?;
            if let Some(companion) = &companion {
                self.stage(companion, base + record_dim, record_dim)?;
            }

            if let Some(scheme) = self.scheme {
                let out = &mut self.scratch_labels[i * label_dim..(i + 1) * label_dim];
                scheme.encode(&anchor, companion.as_ref(), out)?;
            }
            transform_time += t.elapsed();

            realized.push(anchor.label);
            self.reader.advance()?;

            if cancel.is_cancelled() {
                return Ok(Fill::Cancelled);
            }
        }

        batch.data.reshape(&self.data_shape);
        batch.data.copy_into(0, &self.scratch_data)?;
        if let (Some(label), Some(_)) = (batch.label.as_mut(), self.scheme) {
            label.reshape(&[self.batch_size, label_dim]);
            label.copy_into(0, &self.scratch_labels)?;
        }
        batch.labels.clear();
        batch.labels.extend_from_slice(&realized);

        if let Some(sync) = &self.sync {
            sync.complete();
        }

        if self.display_timing {
            info!(
                pipeline = %self.name,
                total_ms = started.elapsed().as_secs_f64() * 1000.0,
                read_ms = read_time.as_secs_f64() * 1000.0,
                transform_ms = transform_time.as_secs_f64() * 1000.0,
                "prefetch batch"
            );
        }

        Ok(Fill::Complete(realized))
    }

    /// Recomputes the batch shape from the first sample of a fill.
    fn reshape_from(&mut self, record: &Record) -> Result<usize> {
        let mut shape = self.transform.infer_shape(record);
        if shape.is_empty() {
            return Err(DataLayerError::config("transform inferred an empty shape"));
        }
        let record_dim = shape_count(&shape);
        shape[0] *= self.width;

        let mut data_shape = Vec::with_capacity(shape.len() + 1);
        data_shape.push(self.batch_size);
        data_shape.extend_from_slice(&shape);

        if data_shape != self.data_shape {
            debug!(pipeline = %self.name, shape = ?data_shape, "batch shape changed");
            self.data_shape = data_shape;
        }
        self.scratch_data.clear();
        self.scratch_data
            .resize(self.batch_size * record_dim * self.width, 0.0);

        Ok(record_dim)
    }

    fn stage(&mut self, record: &Record, offset: usize, record_dim: usize) -> Result<()> {
        let values = self.transform.apply(record)?;
        if values.len() != record_dim {
            return Err(DataLayerError::ShapeMismatch {
                expected: record_dim,
                actual: values.len(),
            });
        }
        self.scratch_data[offset..offset + record_dim].copy_from_slice(&values);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reader(&self) -> &RecordReader {
        &self.reader
    }
}
