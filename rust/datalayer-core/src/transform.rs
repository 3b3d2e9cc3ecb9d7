// rust/datalayer-core/src/transform.rs

//! Per-record transform seam.
//!
//! A transform is a stateless function from a raw record to the values
//! written into one slot of a batch. Augmentations such as crop and mirror
//! live behind this trait and outside this crate.

use crate::error::{DataLayerError, Result};
use crate::storage::Record;

/// Turns a record into tensor values.
pub trait Transform: Send + Sync {
    /// Shape of one transformed record, `[channels, height, width]`.
    fn infer_shape(&self, record: &Record) -> Vec<usize>;

    /// Transforms `record` into exactly `product(infer_shape(record))` values.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be transformed.
    fn apply(&self, record: &Record) -> Result<Vec<f32>>;

    /// Per-value dataset mean, when the transform has one.
    fn mean(&self) -> Option<&[f32]> {
        None
    }
}

/// Subtracts an optional mean image and scales every value.
#[derive(Debug, Clone)]
pub struct ScaleTransform {
    scale: f32,
    mean: Option<Vec<f32>>,
}

impl Default for ScaleTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            mean: None,
        }
    }
}

impl ScaleTransform {
    pub fn new(scale: f32) -> Self {
        Self { scale, mean: None }
    }

    #[must_use]
    pub fn with_mean(mut self, mean: Vec<f32>) -> Self {
        self.mean = Some(mean);
        self
    }
}

impl Transform for ScaleTransform {
    fn infer_shape(&self, record: &Record) -> Vec<usize> {
        vec![record.channels, record.height, record.width]
    }

    fn apply(&self, record: &Record) -> Result<Vec<f32>> {
        let mut values = record.payload.to_f32();
        if values.len() != record.dim() {
            return Err(DataLayerError::ShapeMismatch {
                expected: record.dim(),
                actual: values.len(),
            });
        }

        match &self.mean {
            Some(mean) => {
                if mean.len() != values.len() {
                    return Err(DataLayerError::ShapeMismatch {
                        expected: values.len(),
                        actual: mean.len(),
                    });
                }
                for (v, m) in values.iter_mut().zip(mean) {
                    *v = (*v - m) * self.scale;
                }
            }
            None => {
                for v in values.iter_mut() {
                    *v *= self.scale;
                }
            }
        }

        Ok(values)
    }

    fn mean(&self) -> Option<&[f32]> {
        self.mean.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_only() {
        let transform = ScaleTransform::new(0.5);
        let record = Record::from_bytes(0, 1, 1, 2, vec![2u8, 4]);
        assert_eq!(transform.infer_shape(&record), vec![1, 1, 2]);
        assert_eq!(transform.apply(&record).unwrap(), vec![1.0, 2.0]);
        assert!(transform.mean().is_none());
    }

    #[test]
    fn test_mean_subtraction() {
        let transform = ScaleTransform::new(2.0).with_mean(vec![1.0, 1.0]);
        let record = Record::from_real(0, 1, 1, 2, vec![3.0f32, 1.0]);
        assert_eq!(transform.apply(&record).unwrap(), vec![4.0, 0.0]);
    }

    #[test]
    fn test_payload_dimension_mismatch() {
        let transform = ScaleTransform::default();
        let record = Record::from_bytes(0, 1, 2, 2, vec![1u8, 2, 3]);
        assert!(matches!(
            transform.apply(&record),
            Err(DataLayerError::ShapeMismatch { expected: 4, actual: 3 })
        ));
    }
}
