//! # Sample Decoding
//!
//! Converts a validated PCM payload into normalized floating-point samples, the
//! representation every speech decoder consumes.
//!
//! ## Supported Encodings:
//! - **16-bit**: the reference case, divided by 32768.0
//! - **24-bit** and **32-bit**: divided by 2^23 and 2^31 respectively
//! - Anything else (including 8-bit, which WAV stores unsigned) fails with
//!   `UnsupportedBitDepth` rather than being reinterpreted
//!
//! All encodings are little-endian signed integers, mono, packed with no gaps.

use crate::error::ValidationError;
use byteorder::{ByteOrder, LittleEndian};

/// Energy reported for digital silence instead of negative infinity.
pub const SILENCE_FLOOR_DB: f32 = -120.0;

/// Largest `f32` strictly below 1.0; keeps 32-bit samples inside [-1.0, 1.0).
const LARGEST_BELOW_ONE: f32 = 1.0 - f32::EPSILON / 2.0;

/// An ordered run of normalized mono samples at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SampleWindow {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration = number_of_samples / sample_rate
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Signal energy of the whole window, see [`rms_db`].
    pub fn energy_db(&self) -> f32 {
        rms_db(&self.samples)
    }
}

/// Decode a little-endian PCM payload into normalized samples.
///
/// ## Returns:
/// - **Ok(samples)**: `payload.len() / (bit_depth / 8)` samples in [-1.0, 1.0)
/// - **Err(UnsupportedBitDepth)**: no decoder for this sample width
/// - **Err(TruncatedPayload)**: the payload ends in the middle of a sample
pub fn decode_samples(payload: &[u8], bit_depth: u16) -> Result<Vec<f32>, ValidationError> {
    let sample_width = match bit_depth {
        16 => 2,
        24 => 3,
        32 => 4,
        other => return Err(ValidationError::UnsupportedBitDepth(other)),
    };

    if payload.len() % sample_width != 0 {
        return Err(ValidationError::TruncatedPayload {
            len: payload.len(),
            sample_width,
        });
    }

    let samples = payload
        .chunks_exact(sample_width)
        .map(|bytes| match sample_width {
            2 => LittleEndian::read_i16(bytes) as f32 / 32768.0,
            3 => LittleEndian::read_i24(bytes) as f32 / 8_388_608.0,
            _ => ((LittleEndian::read_i32(bytes) as f64 / 2_147_483_648.0) as f32).min(LARGEST_BELOW_ONE),
        })
        .collect();

    Ok(samples)
}

/// Root-mean-square level of `samples` in dBFS.
///
/// Advisory only: used for logging and the activity recognizer, never to accept
/// or reject audio. Empty or all-zero input reports [`SILENCE_FLOOR_DB`].
pub fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_FLOOR_DB;
    }

    let mean_square = samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / samples.len() as f64;
    if mean_square <= 0.0 {
        return SILENCE_FLOOR_DB;
    }

    let db = 10.0 * mean_square.log10();
    (db as f32).max(SILENCE_FLOOR_DB)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_pcm16_normalization() {
        let payload = pcm16(&[0, 16384, -16384, 32767, -32768]);
        let samples = decode_samples(&payload, 16).unwrap();

        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 0.5);
        assert_eq!(samples[2], -0.5);
        assert_eq!(samples[4], -1.0);
        assert!(samples[3] < 1.0);
    }

    #[test]
    fn test_pcm16_count_and_range_over_all_extremes() {
        let raw: Vec<i16> = (i16::MIN..=i16::MAX).step_by(97).chain([i16::MAX]).collect();
        let payload = pcm16(&raw);
        let samples = decode_samples(&payload, 16).unwrap();

        assert_eq!(samples.len(), payload.len() / 2);
        for s in samples {
            assert!((-1.0..1.0).contains(&s), "sample {} out of range", s);
        }
    }

    #[test]
    fn test_pcm24_and_pcm32() {
        let payload24 = [0x00, 0x00, 0x40, 0xff, 0xff, 0x7f];
        let samples = decode_samples(&payload24, 24).unwrap();
        assert_eq!(samples[0], 0.5);
        assert!(samples[1] < 1.0);

        let payload32: Vec<u8> = [i32::MAX, i32::MIN].iter().flat_map(|s| s.to_le_bytes()).collect();
        let samples = decode_samples(&payload32, 32).unwrap();
        assert!(samples[0] < 1.0);
        assert_eq!(samples[1], -1.0);
    }

    #[test]
    fn test_truncated_payload() {
        let err = decode_samples(&[0u8; 15], 16).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TruncatedPayload {
                len: 15,
                sample_width: 2
            }
        );
    }

    #[test]
    fn test_unsupported_bit_depth() {
        assert_eq!(
            decode_samples(&[0u8; 4], 8).unwrap_err(),
            ValidationError::UnsupportedBitDepth(8)
        );
        assert_eq!(
            decode_samples(&[0u8; 4], 12).unwrap_err(),
            ValidationError::UnsupportedBitDepth(12)
        );
    }

    #[test]
    fn test_rms_db() {
        assert_eq!(rms_db(&[]), SILENCE_FLOOR_DB);
        assert_eq!(rms_db(&[0.0; 100]), SILENCE_FLOOR_DB);

        // Full-scale square wave is 0 dBFS
        let square: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!(rms_db(&square).abs() < 1e-4);

        // Half amplitude is about -6 dB
        let half: Vec<f32> = square.iter().map(|s| s * 0.5).collect();
        assert!((rms_db(&half) + 6.02).abs() < 0.01);
    }

    #[test]
    fn test_sample_window_duration() {
        let window = SampleWindow::new(vec![0.0; 8000], 16000);
        assert_eq!(window.duration_seconds(), 0.5);
        assert_eq!(window.len(), 8000);
        assert_eq!(window.energy_db(), SILENCE_FLOOR_DB);
    }
}
