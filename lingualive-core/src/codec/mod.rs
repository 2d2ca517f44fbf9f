//! Audio frame types and the PCM wire codec.
//!
//! Two representations of the same audio travel through the pipeline:
//!
//! | Type | Samples | Used by |
//! |------|---------|---------|
//! | [`AudioFrame`] | `i16`, fixed-point | capture output, wire conversion |
//! | [`AudioBuffer`] | `f32` in [-1.0, 1.0] | playback scheduling |
//!
//! A wire frame is base64 text of the frame's little-endian `i16` bytes with
//! no header. Frame boundaries are the message boundaries of the transport.

pub mod pcm;

use crate::error::Result;

/// An immutable block of fixed-point mono samples tagged with its sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    /// Quantize float samples into a mono frame. Out-of-range values saturate.
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            samples: samples.iter().copied().map(pcm::quantize).collect(),
            sample_rate,
            channels: 1,
        }
    }

    /// Parse a wire frame produced by [`AudioFrame::to_wire`] or the remote service.
    ///
    /// # Errors
    /// `LiveError::MalformedAudioData` for invalid base64 or an odd byte count.
    pub fn from_wire(wire: &str, sample_rate: u32) -> Result<Self> {
        let bytes = pcm::decode(wire)?;
        pcm::check_sample_width(bytes.len())?;
        let samples = bytes
            .chunks_exact(pcm::SAMPLE_WIDTH)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok(Self {
            samples,
            sample_rate,
            channels: 1,
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Little-endian byte image of the samples.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * pcm::SAMPLE_WIDTH);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    /// Base64 wire representation.
    pub fn to_wire(&self) -> String {
        pcm::encode_bytes(&self.to_le_bytes())
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.channels as f64 / self.sample_rate as f64
    }
}

/// A playable block of interleaved f32 samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (24000 for inbound audio).
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
