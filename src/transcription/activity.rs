//! # Activity Recognizer
//!
//! A model-free `WordRecognizer` that marks where someone is speaking without
//! saying what they said. Each voiced region becomes one token such as
//! `[speech 1.2s]`. It is what a session uses when no neural recognizer is
//! plugged in, and it exercises the full buffering/commit pipeline end to end.
//!
//! ## Method:
//! 1. Split the window into 20 ms frames aligned to absolute sample positions,
//!    so re-decoding a trimmed window yields identical frames
//! 2. A frame is voiced when its RMS level exceeds the threshold
//! 3. Voiced frames separated by short gaps merge into one region
//! 4. Regions shorter than the minimum duration are treated as clicks and dropped

use crate::audio::buffer::DecodeWindow;
use crate::audio::processor::rms_db;
use crate::error::DecoderError;
use crate::transcription::agreement::{TimedWord, WordRecognizer};

const FRAMES_PER_SECOND: u32 = 50;

#[derive(Debug, Clone)]
pub struct ActivityConfig {
    /// Frames louder than this (dBFS) count as voiced.
    pub threshold_db: f32,
    /// Gaps up to this long do not split a region.
    pub max_gap_ms: u32,
    /// Regions shorter than this are dropped.
    pub min_speech_ms: u32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            threshold_db: -40.0,
            max_gap_ms: 200,
            min_speech_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivityRecognizer {
    config: ActivityConfig,
}

impl ActivityRecognizer {
    pub fn new(config: ActivityConfig) -> Self {
        Self { config }
    }
}

impl WordRecognizer for ActivityRecognizer {
    fn name(&self) -> &str {
        "activity"
    }

    fn recognize(&mut self, window: &DecodeWindow<'_>) -> Result<Vec<TimedWord>, DecoderError> {
        if window.sample_rate == 0 {
            return Err(DecoderError::Failed("window has no sample rate".to_string()));
        }

        let frame_len = (window.sample_rate / FRAMES_PER_SECOND).max(1) as u64;
        let ms_to_frames = |ms: u32| (ms as u64 * FRAMES_PER_SECOND as u64).div_ceil(1000);
        let max_gap = ms_to_frames(self.config.max_gap_ms);
        let min_frames = ms_to_frames(self.config.min_speech_ms).max(1);

        let mut regions: Vec<(u64, u64)> = Vec::new(); // (first frame, last frame), inclusive
        let mut frame = window.start.div_ceil(frame_len);
        while (frame + 1) * frame_len <= window.end() {
            let offset = (frame * frame_len - window.start) as usize;
            let samples = &window.samples[offset..offset + frame_len as usize];

            if rms_db(samples) > self.config.threshold_db {
                match regions.last_mut() {
                    Some((_, last)) if frame - *last <= max_gap + 1 => *last = frame,
                    _ => regions.push((frame, frame)),
                }
            }
            frame += 1;
        }

        let words = regions
            .into_iter()
            .filter(|(first, last)| last - first + 1 >= min_frames)
            .map(|(first, last)| {
                let start = first * frame_len;
                let end = (last + 1) * frame_len;
                let seconds = (end - start) as f64 / window.sample_rate as f64;
                TimedWord::new(start, end, format!("[speech {:.1}s]", seconds))
            })
            .collect();

        Ok(words)
    }
}
