// rust/datalayer-core/src/storage/record.rs

//! Labeled records as handed out by a record store.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{DataLayerError, Result};

/// Size of the trailer that ends a byte-list side channel: item count,
/// item size and two reserved little-endian `i32` fields.
const BYTE_LIST_TRAILER: usize = 4 * std::mem::size_of::<i32>();

/// Raw record contents.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// 8-bit samples, usually pixels.
    Bytes(Bytes),
    /// Real-valued features.
    Real(Arc<[f32]>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Bytes(b) => b.len(),
            Payload::Real(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Payload::Real(_))
    }

    /// Returns the payload widened to `f32`.
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            Payload::Bytes(b) => b.iter().map(|&v| v as f32).collect(),
            Payload::Real(r) => r.to_vec(),
        }
    }
}

/// Encoding of a record's side-channel label vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideChannelFormat {
    /// Little-endian `f64` values.
    F64List,
    /// Little-endian `f32` values.
    F32List,
    /// One byte per label followed by a 16-byte trailer.
    ByteList,
}

/// Secondary per-record labels used by the multi-label scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct SideChannel {
    pub format: SideChannelFormat,
    pub bytes: Bytes,
}

impl SideChannel {
    pub fn new(format: SideChannelFormat, bytes: impl Into<Bytes>) -> Self {
        Self {
            format,
            bytes: bytes.into(),
        }
    }

    /// Builds a byte-list side channel, trailer included.
    pub fn from_byte_labels(labels: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(labels.len() + BYTE_LIST_TRAILER);
        bytes.extend_from_slice(labels);
        bytes.extend_from_slice(&(labels.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        Self::new(SideChannelFormat::ByteList, bytes)
    }

    /// Builds an `f32` list side channel.
    pub fn from_f32_labels(labels: &[f32]) -> Self {
        let bytes: Vec<u8> = labels.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(SideChannelFormat::F32List, bytes)
    }

    /// Decodes the label vector.
    ///
    /// # Errors
    ///
    /// Returns `MalformedLabels` when the payload does not match its format.
    pub fn decode(&self) -> Result<Vec<f32>> {
        let data = &self.bytes[..];
        if data.is_empty() {
            return Err(DataLayerError::malformed_labels("side channel is empty"));
        }

        match self.format {
            SideChannelFormat::F64List => {
                if data.len() % 8 != 0 {
                    return Err(DataLayerError::malformed_labels(format!(
                        "f64 list of {} bytes is not a multiple of 8",
                        data.len()
                    )));
                }
                Ok(data
                    .chunks_exact(8)
                    .map(|c| {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(c);
                        f64::from_le_bytes(raw) as f32
                    })
                    .collect())
            }
            SideChannelFormat::F32List => {
                if data.len() % 4 != 0 {
                    return Err(DataLayerError::malformed_labels(format!(
                        "f32 list of {} bytes is not a multiple of 4",
                        data.len()
                    )));
                }
                Ok(data
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect())
            }
            SideChannelFormat::ByteList => {
                if data.len() < BYTE_LIST_TRAILER {
                    return Err(DataLayerError::malformed_labels(format!(
                        "byte list of {} bytes is shorter than its trailer",
                        data.len()
                    )));
                }
                let trailer = &data[data.len() - BYTE_LIST_TRAILER..];
                let count = i32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
                let item_size = i32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

                if item_size != 1 {
                    return Err(DataLayerError::malformed_labels(format!(
                        "only byte sized labels are supported, got item size {}",
                        item_size
                    )));
                }
                let body = data.len() - BYTE_LIST_TRAILER;
                if count < 0 || count as usize > body {
                    return Err(DataLayerError::malformed_labels(format!(
                        "trailer declares {} labels but only {} bytes precede it",
                        count, body
                    )));
                }
                Ok(data[..count as usize].iter().map(|&b| b as f32).collect())
            }
        }
    }
}

/// One labeled unit of training data.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub label: i32,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub payload: Payload,
    pub side_channel: Option<SideChannel>,
}

impl Record {
    pub fn from_bytes(
        label: i32,
        channels: usize,
        height: usize,
        width: usize,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            label,
            channels,
            height,
            width,
            payload: Payload::Bytes(data.into()),
            side_channel: None,
        }
    }

    pub fn from_real(
        label: i32,
        channels: usize,
        height: usize,
        width: usize,
        data: impl Into<Arc<[f32]>>,
    ) -> Self {
        Self {
            label,
            channels,
            height,
            width,
            payload: Payload::Real(data.into()),
            side_channel: None,
        }
    }

    #[must_use]
    pub fn with_side_channel(mut self, side_channel: SideChannel) -> Self {
        self.side_channel = Some(side_channel);
        self
    }

    /// Number of values described by the record's dimensions.
    pub fn dim(&self) -> usize {
        self.channels * self.height * self.width
    }
}
