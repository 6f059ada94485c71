//! # Local Agreement Stabilization
//!
//! Turns a word-level recognizer that re-transcribes the whole window every pass
//! into an incremental decoder with a stable prefix.
//!
//! ## Policy:
//! A word is confirmed once two consecutive hypotheses agree on it. Each pass:
//! 1. Recognize the full window into timestamped words
//! 2. Ignore words that belong to audio already committed
//! 3. Confirm the longest common prefix of this hypothesis and the previous
//!    pass's unconfirmed tail
//! 4. Commit audio up to the end of the last confirmed word; the rest of the
//!    hypothesis becomes tentative text and the new "previous tail"
//!
//! Audio with no words in it is committed once it is older than a trailing guard,
//! so silence never piles up in the buffer.

use crate::audio::buffer::DecodeWindow;
use crate::error::DecoderError;
use crate::transcription::decoder::{Hypothesis, SpeechDecoder};

/// Default trailing guard kept in the buffer when committing silence.
pub const DEFAULT_SILENCE_GUARD_SECS: f64 = 1.0;

/// A recognized word anchored to absolute sample positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedWord {
    pub start: u64,
    pub end: u64,
    pub text: String,
}

impl TimedWord {
    pub fn new(start: u64, end: u64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    fn midpoint(&self) -> u64 {
        self.start + (self.end.saturating_sub(self.start)) / 2
    }
}

/// Re-transcribes a whole window into timestamped words.
///
/// Timestamps are absolute (`window.start` based), so they stay comparable
/// across passes even after the buffer has been trimmed.
pub trait WordRecognizer: Send {
    fn name(&self) -> &str;

    fn recognize(&mut self, window: &DecodeWindow<'_>) -> Result<Vec<TimedWord>, DecoderError>;
}

pub struct LocalAgreementDecoder<R> {
    recognizer: R,
    /// Unconfirmed tail of the previous hypothesis.
    pending: Vec<TimedWord>,
    /// Absolute sample index up to which audio has been committed.
    committed_until: u64,
    silence_guard_secs: f64,
}

impl<R: WordRecognizer> LocalAgreementDecoder<R> {
    pub fn new(recognizer: R) -> Self {
        Self {
            recognizer,
            pending: Vec::new(),
            committed_until: 0,
            silence_guard_secs: DEFAULT_SILENCE_GUARD_SECS,
        }
    }

    pub fn with_silence_guard(mut self, secs: f64) -> Self {
        self.silence_guard_secs = secs.max(0.0);
        self
    }

    pub fn committed_until(&self) -> u64 {
        self.committed_until
    }
}

impl<R: WordRecognizer> SpeechDecoder for LocalAgreementDecoder<R> {
    fn name(&self) -> &str {
        self.recognizer.name()
    }

    fn decode(&mut self, window: &DecodeWindow<'_>) -> Result<Hypothesis, DecoderError> {
        // Nothing below mutates `self` until the recognizer has succeeded.
        let words = self.recognizer.recognize(window)?;

        let floor = self.committed_until.max(window.start);
        let fresh: Vec<TimedWord> = words
            .into_iter()
            .filter(|w| w.midpoint() >= floor && w.start < window.end())
            .collect();

        let agreed = fresh
            .iter()
            .zip(self.pending.iter().filter(|w| w.midpoint() >= floor))
            .take_while(|(new, old)| same_word(&new.text, &old.text))
            .count();

        let (confirmed, unconfirmed) = fresh.split_at(agreed);

        let guard = (self.silence_guard_secs * window.sample_rate as f64) as u64;
        let mut commit_point = confirmed.last().map_or(floor, |w| w.end.max(floor));
        let quiet_until = match unconfirmed.first() {
            Some(next) => next.start.saturating_sub(guard),
            None => window.end().saturating_sub(guard),
        };
        commit_point = commit_point.max(quiet_until).min(window.end());

        let hypothesis = Hypothesis {
            committed_text: join_words(confirmed),
            committed_samples: commit_point.saturating_sub(window.start) as usize,
            tentative_text: join_words(unconfirmed),
        };

        if !confirmed.is_empty() {
            tracing::trace!(
                confirmed = confirmed.len(),
                pending = unconfirmed.len(),
                commit_point,
                "local agreement confirmed words"
            );
        }

        self.pending = unconfirmed.to_vec();
        self.committed_until = self.committed_until.max(commit_point);

        Ok(hypothesis)
    }
}

fn normalize(word: &str) -> String {
    word.trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() && c != '[' && c != ']')
        .to_lowercase()
}

fn same_word(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

fn join_words(words: &[TimedWord]) -> String {
    words
        .iter()
        .map(|w| w.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
