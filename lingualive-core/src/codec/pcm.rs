//! 16-bit PCM ⇄ base64 conversion. Pure functions, no state.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use super::AudioBuffer;
use crate::error::{LiveError, Result};

/// Fixed-point full-scale value: `1.0` maps to `32768` before clamping.
pub const FULL_SCALE: f32 = 32768.0;

/// Bytes per fixed-point sample.
pub const SAMPLE_WIDTH: usize = 2;

/// Scale, clamp and truncate one float sample into the `i16` range.
///
/// `1.5` saturates to `i16::MAX`, `-1.5` to `i16::MIN`. NaN maps to 0.
#[inline]
pub fn quantize(sample: f32) -> i16 {
    (sample * FULL_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode float samples into a wire frame (base64 of little-endian `i16`).
pub fn encode(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_WIDTH);
    for &sample in samples {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    encode_bytes(&bytes)
}

pub(crate) fn encode_bytes(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Text-decode a wire frame into its raw bytes. Does not interpret them.
///
/// # Errors
/// `LiveError::MalformedAudioData` if the text is not valid base64.
pub fn decode(wire: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(wire.trim())
        .map_err(|e| LiveError::MalformedAudioData(format!("invalid base64: {e}")))
}

pub(crate) fn check_sample_width(byte_len: usize) -> Result<()> {
    if byte_len % SAMPLE_WIDTH != 0 {
        return Err(LiveError::MalformedAudioData(format!(
            "{byte_len} bytes is not a whole number of 16-bit samples"
        )));
    }
    Ok(())
}

/// Interpret little-endian `i16` bytes as a playable buffer.
///
/// Produces `bytes.len() / 2` interleaved samples rescaled to [-1.0, 1.0).
///
/// # Errors
/// `LiveError::MalformedAudioData` when the byte length is not a multiple of
/// the sample width, or the sample count does not divide into `channels`.
pub fn bytes_to_audio_buffer(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    check_sample_width(bytes.len())?;
    if channels == 0 {
        return Err(LiveError::MalformedAudioData("zero channels".into()));
    }
    let sample_count = bytes.len() / SAMPLE_WIDTH;
    if sample_count % channels as usize != 0 {
        return Err(LiveError::MalformedAudioData(format!(
            "{sample_count} samples do not split into {channels} channels"
        )));
    }

    let samples = bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / FULL_SCALE)
        .collect();

    Ok(AudioBuffer::new(samples, sample_rate, channels))
}

/// Decode a wire frame straight to mono float samples.
pub fn decode_to_float(wire: &str) -> Result<Vec<f32>> {
    let bytes = decode(wire)?;
    // Sample rate is irrelevant for the raw values.
    Ok(bytes_to_audio_buffer(&bytes, 1, 1)?.samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const STEP: f32 = 1.0 / FULL_SCALE;

    #[test]
    fn round_trip_within_one_quantization_step() {
        let samples: Vec<f32> = (0..=400).map(|i| -1.0 + i as f32 * 0.005).collect();
        let decoded = decode_to_float(&encode(&samples)).expect("decode");
        assert_eq!(decoded.len(), samples.len());
        for (orig, got) in samples.iter().zip(&decoded) {
            assert_abs_diff_eq!(*orig, *got, epsilon = STEP);
        }
    }

    #[test]
    fn out_of_range_samples_saturate_instead_of_wrapping() {
        assert_eq!(quantize(1.5), i16::MAX);
        assert_eq!(quantize(-1.5), i16::MIN);
        assert_eq!(quantize(1.0), i16::MAX);
        assert_eq!(quantize(-1.0), i16::MIN);

        let bytes = decode(&encode(&[1.5, -1.5])).expect("decode");
        assert_eq!(bytes, [0xFF, 0x7F, 0x00, 0x80]);
    }

    #[test]
    fn quantize_truncates_toward_zero() {
        // 0.5 / 32768 * 32768 = 0.5 → 0; -1.5 steps → -1
        assert_eq!(quantize(0.5 * STEP), 0);
        assert_eq!(quantize(-1.5 * STEP), -1);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn encoding_is_little_endian() {
        // 0.25 * 32768 = 8192 = 0x2000
        let bytes = decode(&encode(&[0.25])).expect("decode");
        assert_eq!(bytes, [0x00, 0x20]);
    }

    #[test]
    fn odd_byte_length_is_malformed() {
        let err = bytes_to_audio_buffer(&[0x00, 0x10, 0x20], 24_000, 1).unwrap_err();
        assert!(matches!(err, LiveError::MalformedAudioData(_)));
    }

    #[test]
    fn invalid_base64_is_malformed() {
        let err = decode("not*base64").unwrap_err();
        assert!(matches!(err, LiveError::MalformedAudioData(_)));
    }

    #[test]
    fn empty_frame_decodes_to_empty_buffer() {
        let buffer = bytes_to_audio_buffer(&[], 24_000, 1).expect("empty is valid");
        assert!(buffer.is_empty());
        assert_eq!(buffer.duration_secs(), 0.0);
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn buffer_length_is_half_the_byte_length() {
        let bytes = vec![0u8; 24_000 * 2];
        let buffer = bytes_to_audio_buffer(&bytes, 24_000, 1).expect("valid");
        assert_eq!(buffer.samples.len(), 24_000);
        assert_abs_diff_eq!(buffer.duration_secs(), 1.0, epsilon = 1e-9);
    }
}
