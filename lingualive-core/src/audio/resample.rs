//! Sample-rate conversion using rubato's `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Devices run at their native rate (commonly 44.1 or 48 kHz) while the wire
//! formats are fixed: 16 kHz upstream, 24 kHz downstream. Two shapes of
//! conversion are needed:
//!
//! - [`RateConverter`]: streaming, for the capture thread. Input arrives in
//!   arbitrary slices and is accumulated into fixed rubato chunks.
//! - [`convert_once`]: whole-buffer, for playback. Each inbound frame is
//!   scheduled independently, so it is converted with its own resampler and
//!   flushed, keeping its duration intact.
//!
//! When both rates match, neither creates a rubato session.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{LiveError, Result};

/// Converts a continuous f32 mono stream from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `LiveError::AudioStream` if rubato rejects the parameters.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| LiveError::AudioStream(format!("resampler init: {e}")))?;

        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        tracing::debug!(source_rate, target_rate, chunk_size, "streaming resampler ready");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
        })
    }

    /// Feed samples, returning whatever output is ready (may be empty).
    ///
    /// A remainder shorter than `chunk_size` stays buffered for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        let mut consumed = 0;
        while self.input_buf.len() - consumed >= self.chunk_size {
            let input_slice = &self.input_buf[consumed..consumed + self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_, produced)) => result.extend_from_slice(&self.output_buf[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            consumed += self.chunk_size;
        }
        self.input_buf.drain(..consumed);

        result
    }

    /// Drop any buffered remainder.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(ref mut resampler) = self.resampler {
            resampler.reset();
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert one complete buffer, preserving its duration.
///
/// The resampler's output delay is trimmed from the front and the tail is
/// flushed, so the result holds `len * target / source` samples (rounded).
pub fn convert_once(source_rate: u32, target_rate: u32, samples: &[f32]) -> Result<Vec<f32>> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, samples.len(), 1)
            .map_err(|e| LiveError::AudioStream(format!("resampler init: {e}")))?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * ratio).round() as usize;

    let mut out = resampler
        .process(&[samples], None)
        .map_err(|e| LiveError::AudioStream(format!("resample: {e}")))?
        .remove(0);
    let tail = resampler
        .process_partial(None::<&[&[f32]]>, None)
        .map_err(|e| LiveError::AudioStream(format!("resample flush: {e}")))?;
    out.extend_from_slice(&tail[0]);

    let start = delay.min(out.len());
    let end = (start + expected).min(out.len());
    Ok(out[start..end].to_vec())
}
