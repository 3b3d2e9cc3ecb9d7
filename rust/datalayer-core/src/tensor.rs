// rust/datalayer-core/src/tensor.rs

//! Minimal host-side tensor container.
//!
//! Batches hand their tensors to the training loop, which uploads them to
//! the device. Only reshaping and offset copies are needed here.

use crate::error::{DataLayerError, Result};

/// A contiguous `f32` buffer with a shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: &[usize]) -> Self {
        let mut tensor = Self::default();
        tensor.reshape(shape);
        tensor
    }

    /// Changes the shape, growing or shrinking the buffer to match.
    /// Existing values in the retained prefix are kept.
    pub fn reshape(&mut self, shape: &[usize]) {
        self.shape.clear();
        self.shape.extend_from_slice(shape);
        self.data.resize(shape_count(shape), 0.0);
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of values.
    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Number of values per item along the first axis.
    pub fn item_count(&self) -> usize {
        shape_count(self.shape.get(1..).unwrap_or(&[]))
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Copies `src` into the buffer starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the range does not fit.
    pub fn copy_into(&mut self, offset: usize, src: &[f32]) -> Result<()> {
        let end = offset + src.len();
        if end > self.data.len() {
            return Err(DataLayerError::ShapeMismatch {
                expected: self.data.len(),
                actual: end,
            });
        }
        self.data[offset..end].copy_from_slice(src);
        Ok(())
    }

    /// Formats the shape as `a x b x c (n)`.
    pub fn size_string(&self) -> String {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        format!("{} ({})", dims.join(" x "), self.count())
    }
}

/// Number of values described by `shape`.
pub fn shape_count(shape: &[usize]) -> usize {
    shape.iter().product()
}
