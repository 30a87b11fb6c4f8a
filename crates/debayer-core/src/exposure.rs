//! Autoexposure gain estimation.
//!
//! Samples the center region of a debayered intermediate TIFF and derives a
//! multiplicative gain that brings the region mean to a target luminance.
//! Estimation failure is a degraded mode, never a pipeline error: the caller
//! falls back to gain 1.0.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Computes exposure gains from decoded intermediates.
#[derive(Debug, Clone, Copy)]
pub struct ExposureEstimator {
    /// Target mean luminance for the sampled region.
    pub target: f32,
    /// Sample box size as a fraction of image width/height, centered.
    pub center: f32,
}

impl ExposureEstimator {
    /// Creates an estimator.
    pub fn new(target: f32, center: f32) -> Self {
        Self { target, center }
    }

    /// Estimates the gain for `image`, or `None` when the image cannot be
    /// decoded or yields a non-positive mean.
    pub fn estimate(&self, image: &Path) -> Option<f32> {
        match self.sample_mean(image) {
            Ok(mean) if mean > 0.0 => {
                let gain = self.target / mean;
                debug!(image = %image.display(), mean, gain, "sampled exposure");
                Some(gain)
            }
            Ok(mean) => {
                warn!(image = %image.display(), mean, "non-positive sample mean");
                None
            }
            Err(err) => {
                warn!(image = %image.display(), %err, "exposure sampling unavailable");
                None
            }
        }
    }

    /// Mean of all channel values inside the centered sample box.
    fn sample_mean(&self, path: &Path) -> Result<f32> {
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| Error::decode(path, e.to_string()))?;
        let (width, height) = decoder
            .dimensions()
            .map_err(|e| Error::decode(path, e.to_string()))?;
        let channels = match decoder
            .colortype()
            .map_err(|e| Error::decode(path, e.to_string()))?
        {
            ColorType::Gray(_) => 1,
            ColorType::GrayA(_) => 2,
            ColorType::RGB(_) | ColorType::YCbCr(_) => 3,
            ColorType::RGBA(_) | ColorType::CMYK(_) => 4,
            other => {
                return Err(Error::decode(path, format!("unsupported color type {other:?}")));
            }
        };
        let samples = decoder
            .read_image()
            .map_err(|e| Error::decode(path, e.to_string()))?;

        let roi = Roi::centered(width as usize, height as usize, self.center);
        match samples {
            DecodingResult::U8(data) => {
                Ok(roi.mean(&data, channels, |v| v as f32 / u8::MAX as f32))
            }
            DecodingResult::U16(data) => {
                Ok(roi.mean(&data, channels, |v| v as f32 / u16::MAX as f32))
            }
            DecodingResult::U32(data) => {
                Ok(roi.mean(&data, channels, |v| v as f32 / u32::MAX as f32))
            }
            DecodingResult::F32(data) => Ok(roi.mean(&data, channels, |v| v)),
            DecodingResult::F64(data) => Ok(roi.mean(&data, channels, |v| v as f32)),
            _ => Err(Error::decode(path, "unsupported sample format")),
        }
    }
}

/// Centered rectangular region of interest over an interleaved pixel buffer.
struct Roi {
    width: usize,
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
}

impl Roi {
    /// A box covering `fraction` of each axis, centered; insets are
    /// `(1 - fraction) / 2` per side. Degenerate boxes grow to one pixel.
    fn centered(width: usize, height: usize, fraction: f32) -> Self {
        let inset = (1.0 - fraction.clamp(0.0, 1.0)) / 2.0;
        let x0 = (width as f32 * inset) as usize;
        let y0 = (height as f32 * inset) as usize;
        let x1 = (width - x0).max(x0 + 1).min(width.max(1));
        let y1 = (height - y0).max(y0 + 1).min(height.max(1));
        Self {
            width,
            x0,
            x1,
            y0,
            y1,
        }
    }

    /// Mean of every channel value inside the box.
    fn mean<T: Copy>(&self, data: &[T], channels: usize, to_f32: impl Fn(T) -> f32) -> f32 {
        let mut sum = 0.0f64;
        let mut count = 0u64;
        for y in self.y0..self.y1 {
            for x in self.x0..self.x1 {
                let base = (y * self.width + x) * channels;
                for c in 0..channels {
                    if let Some(&v) = data.get(base + c) {
                        sum += to_f32(v) as f64;
                        count += 1;
                    }
                }
            }
        }
        if count == 0 {
            return 0.0;
        }
        (sum / count as f64) as f32
    }
}
