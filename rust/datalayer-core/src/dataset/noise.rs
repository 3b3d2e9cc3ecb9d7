// rust/datalayer-core/src/dataset/noise.rs

//! Synthetic noise companion for non-matching pairs.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Normal, Uniform};
use tracing::{debug, warn};

use crate::config::{FillerType, NoiseConfig};
use crate::error::{DataLayerError, Result};
use crate::storage::{Payload, Record};

/// Builds the noise record used in place of a stored non-matching companion.
///
/// The record copies the dimensions and payload kind of `template`. With
/// `use_noisy_mean` the generated values scale the transform's mean image,
/// which must then be present and match the record size.
pub fn synthesize(config: &NoiseConfig, template: &Record, mean: Option<&[f32]>) -> Result<Record> {
    let count = template.dim();
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };

    let mut values = fill(config, count, &mut rng)?;

    if config.use_noisy_mean {
        let mean = mean.ok_or_else(|| {
            DataLayerError::config("use_noisy_mean requires a transform with a mean image")
        })?;
        if mean.len() != count {
            return Err(DataLayerError::ShapeMismatch {
                expected: count,
                actual: mean.len(),
            });
        }

        if !template.payload.is_real() && noise_exceeds_unit_range(config) {
            warn!(
                filler = ?config.filler,
                "noise values outside [-1, 1] scaled by a byte mean image will saturate"
            );
        }

        for (v, m) in values.iter_mut().zip(mean) {
            *v *= m;
        }
    }

    let payload = if template.payload.is_real() {
        Payload::Real(values.into())
    } else {
        let bytes: Vec<u8> = values.iter().map(|v| v.clamp(0.0, 255.0) as u8).collect();
        Payload::Bytes(Bytes::from(bytes))
    };

    debug!(label = config.label, count, filler = ?config.filler, "synthesized noise record");

    Ok(Record {
        label: config.label,
        channels: template.channels,
        height: template.height,
        width: template.width,
        payload,
        side_channel: None,
    })
}

fn fill(config: &NoiseConfig, count: usize, rng: &mut StdRng) -> Result<Vec<f32>> {
    let values = match config.filler {
        FillerType::Constant => vec![config.value; count],
        FillerType::Uniform => {
            let dist = Uniform::new(config.min, config.max)
                .map_err(|e| DataLayerError::config(format!("invalid uniform noise range: {}", e)))?;
            (0..count).map(|_| rng.sample(dist)).collect()
        }
        FillerType::Gaussian => {
            let dist = Normal::new(config.mean, config.std)
                .map_err(|e| DataLayerError::config(format!("invalid gaussian noise: {}", e)))?;
            (0..count).map(|_| rng.sample(dist)).collect()
        }
    };
    Ok(values)
}

fn noise_exceeds_unit_range(config: &NoiseConfig) -> bool {
    match config.filler {
        FillerType::Constant => config.value.abs() > 1.0,
        FillerType::Uniform => config.min < -1.0 || config.max > 1.0,
        // Unbounded.
        FillerType::Gaussian => true,
    }
}
