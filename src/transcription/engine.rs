//! # Incremental Transcriber
//!
//! Drives one session's speech decoder over its rolling buffer of unconfirmed
//! audio and keeps the two halves of the transcript apart:
//!
//! - **committed text**: append-only, never retracted
//! - **tentative text**: the decoder's latest guess for the unconfirmed tail,
//!   replaced wholesale on every pass
//!
//! ## State Machine:
//! ```text
//! Idle --insert--> Buffering --process_iter--> Decoding --> Buffering | Idle
//!   \______________________ close / fatal error ______________________> Closed
//! ```
//!
//! Inserting audio never decodes. Decoding happens only in `process_iter`, so
//! the arrival rate of audio is decoupled from the cost of recognizing it.
//!
//! ## Failure Policy:
//! - decoder error: reported for that pass, buffer and transcript untouched,
//!   retried on the next call
//! - decoder asks to commit more audio than is buffered: the two have
//!   desynchronized, the transcriber closes itself
//! - buffer grows past its bound: oldest samples are dropped and reported

use crate::audio::buffer::RollingAudioBuffer;
use crate::audio::processor::SampleWindow;
use crate::error::TranscriptionError;
use crate::transcription::decoder::SpeechDecoder;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriberState {
    Idle,
    Buffering,
    Decoding,
    Closed,
}

/// Output of one processing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationOutput {
    /// Text newly appended to the committed transcript by this pass.
    pub committed_delta: String,
    pub tentative_text: String,
    /// Samples trimmed from the front of the buffer by this pass.
    pub committed_samples: usize,
}

/// Oldest audio had to be dropped to keep the buffer inside its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overrun {
    pub dropped_samples: usize,
}

/// Running counters for one transcriber.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TranscriberStats {
    pub passes: u64,
    pub decode_failures: u64,
    pub overruns: u64,
    pub dropped_samples: u64,
    pub total_decode_ms: f64,
}

pub struct IncrementalTranscriber {
    buffer: RollingAudioBuffer,
    decoder: Box<dyn SpeechDecoder>,
    committed: String,
    tentative: String,
    state: TranscriberState,
    /// Audio arrived (or a pass failed) since the last successful pass.
    dirty: bool,
    max_buffer_secs: Option<f64>,
    stats: TranscriberStats,
}

impl IncrementalTranscriber {
    pub fn new(decoder: Box<dyn SpeechDecoder>) -> Self {
        Self {
            buffer: RollingAudioBuffer::new(),
            decoder,
            committed: String::new(),
            tentative: String::new(),
            state: TranscriberState::Idle,
            dirty: false,
            max_buffer_secs: None,
            stats: TranscriberStats::default(),
        }
    }

    /// Bound the unconfirmed audio to `secs` seconds. Non-positive or
    /// non-finite values disable the bound.
    pub fn with_max_buffer_secs(mut self, secs: f64) -> Self {
        self.max_buffer_secs = (secs.is_finite() && secs > 0.0).then_some(secs);
        self
    }

    /// Add decoded audio to the unconfirmed buffer.
    ///
    /// ## Returns:
    /// - **Ok(None)**: appended, buffer within bound
    /// - **Ok(Some(overrun))**: appended, oldest audio dropped to stay within bound
    /// - **Err**: transcriber closed, or the window's rate differs from the buffer's
    pub fn insert_audio_chunk(
        &mut self,
        window: SampleWindow,
    ) -> Result<Option<Overrun>, TranscriptionError> {
        if self.state == TranscriberState::Closed {
            return Err(TranscriptionError::Closed);
        }
        if window.is_empty() {
            return Ok(None);
        }

        if let Err(err) = self.buffer.append(&window) {
            self.close();
            return Err(err.into());
        }
        self.state = TranscriberState::Buffering;
        self.dirty = true;

        let Some(max_secs) = self.max_buffer_secs else {
            return Ok(None);
        };
        let max_samples = (max_secs * window.sample_rate() as f64) as usize;
        let dropped = self.buffer.trim_to(max_samples);
        if dropped == 0 {
            return Ok(None);
        }

        self.stats.overruns += 1;
        self.stats.dropped_samples += dropped as u64;
        tracing::warn!(
            dropped_samples = dropped,
            max_buffer_secs = max_secs,
            "unconfirmed audio exceeded bound, dropped oldest samples"
        );
        Ok(Some(Overrun {
            dropped_samples: dropped,
        }))
    }

    /// Run one decode pass over the unconfirmed buffer.
    ///
    /// A second call with no audio inserted in between returns the same
    /// tentative text and commits nothing.
    pub fn process_iter(&mut self) -> Result<IterationOutput, TranscriptionError> {
        match self.state {
            TranscriberState::Closed => return Err(TranscriptionError::Closed),
            TranscriberState::Idle => return Ok(self.unchanged()),
            _ => {}
        }
        if !self.dirty {
            return Ok(self.unchanged());
        }

        self.state = TranscriberState::Decoding;
        let started = Instant::now();
        let result = self.decoder.decode(&self.buffer.window());
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.passes += 1;
        self.stats.total_decode_ms += elapsed_ms;

        let hypothesis = match result {
            Ok(hypothesis) => hypothesis,
            Err(err) => {
                self.stats.decode_failures += 1;
                self.state = TranscriberState::Buffering;
                tracing::warn!(error = %err, decoder = self.decoder.name(), "decode pass failed");
                return Err(err.into());
            }
        };

        if let Err(err) = self.buffer.commit(hypothesis.committed_samples) {
            tracing::error!(error = %err, "decoder and buffer desynchronized");
            self.close();
            return Err(err.into());
        }

        let delta = hypothesis.committed_text.trim().to_string();
        if !delta.is_empty() {
            if !self.committed.is_empty() {
                self.committed.push(' ');
            }
            self.committed.push_str(&delta);
        }
        self.tentative = hypothesis.tentative_text;
        self.dirty = false;
        self.state = if self.buffer.is_empty() {
            TranscriberState::Idle
        } else {
            TranscriberState::Buffering
        };

        tracing::debug!(
            decoder = self.decoder.name(),
            committed_samples = hypothesis.committed_samples,
            buffered_samples = self.buffer.len(),
            decode_ms = elapsed_ms,
            "decode pass complete"
        );

        Ok(IterationOutput {
            committed_delta: delta,
            tentative_text: self.tentative.clone(),
            committed_samples: hypothesis.committed_samples,
        })
    }

    fn unchanged(&self) -> IterationOutput {
        IterationOutput {
            committed_delta: String::new(),
            tentative_text: self.tentative.clone(),
            committed_samples: 0,
        }
    }

    /// Release buffered audio and refuse further work. Unstable tentative text is discarded.
    pub fn close(&mut self) {
        self.buffer.clear();
        self.tentative.clear();
        self.dirty = false;
        self.state = TranscriberState::Closed;
    }

    pub fn committed_text(&self) -> &str {
        &self.committed
    }

    pub fn tentative_text(&self) -> &str {
        &self.tentative
    }

    pub fn state(&self) -> TranscriberState {
        self.state
    }

    pub fn buffer(&self) -> &RollingAudioBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> TranscriberStats {
        self.stats
    }

    pub fn decoder_name(&self) -> &str {
        self.decoder.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::DecodeWindow;
    use crate::error::{BufferError, DecoderError};
    use crate::transcription::activity::ActivityRecognizer;
    use crate::transcription::agreement::LocalAgreementDecoder;
    use crate::transcription::decoder::Hypothesis;
    use std::collections::VecDeque;

    /// Plays back canned hypotheses; commits are clamped by the script, not the window.
    struct ScriptedDecoder {
        script: VecDeque<Result<Hypothesis, DecoderError>>,
    }

    impl ScriptedDecoder {
        fn boxed(script: Vec<Result<Hypothesis, DecoderError>>) -> Box<dyn SpeechDecoder> {
            Box::new(Self {
                script: script.into(),
            })
        }
    }

    impl SpeechDecoder for ScriptedDecoder {
        fn name(&self) -> &str {
            "scripted"
        }

        fn decode(&mut self, _window: &DecodeWindow<'_>) -> Result<Hypothesis, DecoderError> {
            self.script.pop_front().unwrap_or_else(|| Ok(Hypothesis::default()))
        }
    }

    fn hyp(committed: &str, samples: usize, tentative: &str) -> Result<Hypothesis, DecoderError> {
        Ok(Hypothesis {
            committed_text: committed.to_string(),
            committed_samples: samples,
            tentative_text: tentative.to_string(),
        })
    }

    fn chunk(len: usize) -> SampleWindow {
        SampleWindow::new(vec![0.1; len], 16000)
    }

    #[test]
    fn test_insert_does_not_decode() {
        let mut t = IncrementalTranscriber::new(ScriptedDecoder::boxed(vec![]));
        assert_eq!(t.state(), TranscriberState::Idle);

        t.insert_audio_chunk(chunk(100)).unwrap();
        assert_eq!(t.state(), TranscriberState::Buffering);
        assert_eq!(t.stats().passes, 0);
        assert_eq!(t.buffer().len(), 100);
    }

    #[test]
    fn test_committed_text_is_append_only() {
        let mut t = IncrementalTranscriber::new(ScriptedDecoder::boxed(vec![
            hyp("", 0, "the"),
            hyp("the", 40, "quick"),
            hyp("quick brown", 80, "fox"),
        ]));

        let mut previous = String::new();
        for _ in 0..3 {
            t.insert_audio_chunk(chunk(100)).unwrap();
            t.process_iter().unwrap();
            assert!(t.committed_text().starts_with(&previous));
            previous = t.committed_text().to_string();
        }

        assert_eq!(t.committed_text(), "the quick brown");
        assert_eq!(t.tentative_text(), "fox");
        // 300 inserted, 120 committed
        assert_eq!(t.buffer().len(), 180);
    }

    #[test]
    fn test_process_iter_is_idempotent_without_new_audio() {
        let mut t = IncrementalTranscriber::new(ScriptedDecoder::boxed(vec![
            hyp("hello", 50, "wor"),
            hyp("SHOULD NOT APPEAR", 10, "nope"),
        ]));
        t.insert_audio_chunk(chunk(100)).unwrap();

        let first = t.process_iter().unwrap();
        let second = t.process_iter().unwrap();

        assert_eq!(first.committed_delta, "hello");
        assert_eq!(second.committed_delta, "");
        assert_eq!(second.committed_samples, 0);
        assert_eq!(first.tentative_text, second.tentative_text);
        assert_eq!(t.buffer().len(), 50);
        assert_eq!(t.stats().passes, 1);
    }

    #[test]
    fn test_decode_failure_preserves_state_and_recovers() {
        let mut t = IncrementalTranscriber::new(ScriptedDecoder::boxed(vec![
            hyp("one", 50, "two"),
            Err(DecoderError::Failed("out of memory".to_string())),
            hyp("two", 100, ""),
        ]));

        t.insert_audio_chunk(chunk(100)).unwrap();
        t.process_iter().unwrap();
        assert_eq!(t.buffer().len(), 50);

        t.insert_audio_chunk(chunk(100)).unwrap();
        let err = t.process_iter().unwrap_err();
        assert!(matches!(err, TranscriptionError::DecodeFailure(_)));
        assert!(!err.is_fatal());
        assert_eq!(t.committed_text(), "one");
        assert_eq!(t.tentative_text(), "two");
        assert_eq!(t.buffer().len(), 150);

        t.insert_audio_chunk(chunk(100)).unwrap();
        let out = t.process_iter().unwrap();
        assert_eq!(out.committed_delta, "two");
        assert_eq!(t.committed_text(), "one two");
        assert_eq!(t.buffer().len(), 150);
        assert_eq!(t.stats().decode_failures, 1);
    }

    #[test]
    fn test_failed_pass_is_retried_without_new_audio() {
        let mut t = IncrementalTranscriber::new(ScriptedDecoder::boxed(vec![
            Err(DecoderError::Failed("transient".to_string())),
            hyp("ok", 10, ""),
        ]));
        t.insert_audio_chunk(chunk(20)).unwrap();

        assert!(t.process_iter().is_err());
        assert_eq!(t.process_iter().unwrap().committed_delta, "ok");
    }

    #[test]
    fn test_commit_beyond_buffer_is_fatal() {
        let mut t = IncrementalTranscriber::new(ScriptedDecoder::boxed(vec![hyp("x", 500, "")]));
        t.insert_audio_chunk(chunk(100)).unwrap();

        let err = t.process_iter().unwrap_err();
        assert_eq!(
            err,
            TranscriptionError::Buffer(BufferError::Desync {
                requested: 500,
                available: 100
            })
        );
        assert!(err.is_fatal());
        assert_eq!(t.state(), TranscriberState::Closed);
        assert_eq!(t.committed_text(), "");
        assert_eq!(t.process_iter(), Err(TranscriptionError::Closed));
        assert_eq!(
            t.insert_audio_chunk(chunk(10)),
            Err(TranscriptionError::Closed)
        );
    }

    #[test]
    fn test_overrun_drops_oldest_audio() {
        let mut t =
            IncrementalTranscriber::new(ScriptedDecoder::boxed(vec![])).with_max_buffer_secs(0.01);

        // 0.01 s at 16 kHz = 160 samples
        assert_eq!(t.insert_audio_chunk(chunk(100)).unwrap(), None);
        let overrun = t.insert_audio_chunk(chunk(100)).unwrap();

        assert_eq!(
            overrun,
            Some(Overrun {
                dropped_samples: 40
            })
        );
        assert_eq!(t.buffer().len(), 160);
        assert_eq!(t.buffer().origin(), 40);
        assert_eq!(t.stats().overruns, 1);
    }

    #[test]
    fn test_three_silent_fragments() {
        let decoder = Box::new(LocalAgreementDecoder::new(ActivityRecognizer::default()));
        let mut t = IncrementalTranscriber::new(decoder);

        for _ in 0..3 {
            t.insert_audio_chunk(SampleWindow::new(vec![0.0; 8000], 16000))
                .unwrap();
            let before = t.buffer().len();
            let out = t.process_iter().unwrap();
            assert!(t.buffer().len() <= before);
            assert_eq!(out.committed_delta, "");
        }

        assert_eq!(t.committed_text(), "");
        assert_eq!(t.stats().decode_failures, 0);
        // 1.5 s in, everything older than the 1 s guard committed
        assert_eq!(t.buffer().len(), 16000);
    }

    #[test]
    fn test_close_releases_buffer() {
        let mut t = IncrementalTranscriber::new(ScriptedDecoder::boxed(vec![hyp("a", 0, "b")]));
        t.insert_audio_chunk(chunk(100)).unwrap();
        t.process_iter().unwrap();

        t.close();
        assert!(t.buffer().is_empty());
        assert_eq!(t.tentative_text(), "");
        assert_eq!(t.committed_text(), "a");
        assert_eq!(t.state(), TranscriberState::Closed);
    }
}
