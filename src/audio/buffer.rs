//! # Rolling Audio Buffer
//!
//! Holds the "unconfirmed" audio of one session: everything received since the
//! last commit point. The transcriber re-decodes this whole region on every
//! processing pass and trims it from the front once text for a prefix has been
//! finalized.
//!
//! ## Key Features:
//! - **Append-only tail**: samples are appended in arrival order, never reordered
//! - **Front trimming**: `commit(n)` drops the first `n` samples
//! - **Absolute positions**: `origin()` counts every sample ever trimmed, so a
//!   decoder can anchor timestamps across commits
//! - **Single writer**: one buffer per session, owned by its transcriber; no locks

use crate::audio::processor::SampleWindow;
use crate::error::BufferError;

/// Borrowed view of the buffer handed to a decoder for one pass.
#[derive(Debug, Clone, Copy)]
pub struct DecodeWindow<'a> {
    pub samples: &'a [f32],
    pub sample_rate: u32,
    /// Absolute index (since session start) of `samples[0]`.
    pub start: u64,
}

impl DecodeWindow<'_> {
    /// Absolute index one past the last sample.
    pub fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Unconfirmed audio accumulated since the last commit.
///
/// The sample rate is fixed by the first appended window (or up front with
/// [`RollingAudioBuffer::with_sample_rate`]) and never changes afterwards.
#[derive(Debug, Clone, Default)]
pub struct RollingAudioBuffer {
    samples: Vec<f32>,
    sample_rate: Option<u32>,
    /// Number of samples trimmed from the front so far.
    origin: u64,
}

impl RollingAudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            ..Self::default()
        }
    }

    /// Append a decoded window to the end of the unconfirmed region.
    ///
    /// Refuses windows whose rate differs from the buffer's; mixing rates
    /// would silently corrupt every timestamp downstream.
    pub fn append(&mut self, window: &SampleWindow) -> Result<(), BufferError> {
        match self.sample_rate {
            Some(rate) if rate != window.sample_rate() => {
                return Err(BufferError::RateMismatch {
                    expected: rate,
                    found: window.sample_rate(),
                });
            }
            Some(_) => {}
            None => self.sample_rate = Some(window.sample_rate()),
        }

        self.samples.extend_from_slice(window.samples());
        Ok(())
    }

    /// Owned copy of the whole unconfirmed region.
    pub fn snapshot(&self) -> SampleWindow {
        SampleWindow::new(self.samples.clone(), self.sample_rate.unwrap_or_default())
    }

    /// Borrowed view of the unconfirmed region for a decode pass.
    pub fn window(&self) -> DecodeWindow<'_> {
        DecodeWindow {
            samples: &self.samples,
            sample_rate: self.sample_rate.unwrap_or_default(),
            start: self.origin,
        }
    }

    /// Drop the first `n` samples, whose transcription is now final.
    ///
    /// ## Errors:
    /// `n` larger than the buffer means the caller lost track of what it fed
    /// the decoder; that is reported as `BufferError::Desync` and the buffer is
    /// left untouched.
    pub fn commit(&mut self, n: usize) -> Result<(), BufferError> {
        if n > self.samples.len() {
            return Err(BufferError::Desync {
                requested: n,
                available: self.samples.len(),
            });
        }

        self.samples.drain(..n);
        self.origin += n as u64;
        Ok(())
    }

    /// Drop the oldest samples so at most `max_len` remain. Returns how many were dropped.
    pub fn trim_to(&mut self, max_len: usize) -> usize {
        let excess = self.samples.len().saturating_sub(max_len);
        if excess > 0 {
            self.samples.drain(..excess);
            self.origin += excess as u64;
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Duration of unconfirmed audio in seconds (0 until the rate is known).
    pub fn duration_seconds(&self) -> f64 {
        match self.sample_rate {
            Some(rate) if rate > 0 => self.samples.len() as f64 / rate as f64,
            _ => 0.0,
        }
    }

    /// Release all buffered audio. Called when a session closes.
    pub fn clear(&mut self) {
        self.origin += self.samples.len() as u64;
        self.samples.clear();
        self.samples.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: usize, len: usize) -> SampleWindow {
        let samples = (start..start + len).map(|i| i as f32 / 1000.0).collect();
        SampleWindow::new(samples, 16000)
    }

    #[test]
    fn test_append_preserves_order() {
        let mut buffer = RollingAudioBuffer::new();
        buffer.append(&ramp(0, 10)).unwrap();
        buffer.append(&ramp(10, 5)).unwrap();

        assert_eq!(buffer.len(), 15);
        assert_eq!(buffer.sample_rate(), Some(16000));
        assert_eq!(buffer.snapshot(), ramp(0, 15));
    }

    #[test]
    fn test_commit_leaves_remainder() {
        let mut buffer = RollingAudioBuffer::new();
        buffer.append(&ramp(0, 100)).unwrap();

        buffer.commit(40).unwrap();
        assert_eq!(buffer.len(), 60);
        assert_eq!(buffer.origin(), 40);
        assert_eq!(buffer.snapshot(), ramp(40, 60));

        let window = buffer.window();
        assert_eq!(window.start, 40);
        assert_eq!(window.end(), 100);
    }

    #[test]
    fn test_commit_zero_and_everything() {
        let mut buffer = RollingAudioBuffer::new();
        buffer.append(&ramp(0, 10)).unwrap();

        buffer.commit(0).unwrap();
        assert_eq!(buffer.len(), 10);

        buffer.commit(10).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.origin(), 10);
    }

    #[test]
    fn test_commit_past_end_is_desync() {
        let mut buffer = RollingAudioBuffer::new();
        buffer.append(&ramp(0, 10)).unwrap();

        let err = buffer.commit(11).unwrap_err();
        assert_eq!(
            err,
            BufferError::Desync {
                requested: 11,
                available: 10
            }
        );
        // Untouched
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.origin(), 0);
    }

    #[test]
    fn test_rate_mismatch_is_refused() {
        let mut buffer = RollingAudioBuffer::with_sample_rate(16000);
        let err = buffer.append(&SampleWindow::new(vec![0.0; 4], 44100)).unwrap_err();

        assert_eq!(
            err,
            BufferError::RateMismatch {
                expected: 16000,
                found: 44100
            }
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_trim_to_drops_oldest() {
        let mut buffer = RollingAudioBuffer::new();
        buffer.append(&ramp(0, 50)).unwrap();

        assert_eq!(buffer.trim_to(100), 0);
        assert_eq!(buffer.trim_to(20), 30);
        assert_eq!(buffer.snapshot(), ramp(30, 20));
        assert_eq!(buffer.origin(), 30);
    }

    #[test]
    fn test_duration_and_clear() {
        let mut buffer = RollingAudioBuffer::new();
        assert_eq!(buffer.duration_seconds(), 0.0);

        buffer.append(&SampleWindow::new(vec![0.0; 8000], 16000)).unwrap();
        assert_eq!(buffer.duration_seconds(), 0.5);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.origin(), 8000);
    }
}
