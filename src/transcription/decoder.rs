//! # Speech Decoder Contract
//!
//! The speech recognizer is a black box to the rest of the crate. Anything that
//! can look at the current unconfirmed window and say "this prefix is stable,
//! this tail is my best guess" can drive a session.
//!
//! ## Contract:
//! - `decode` sees the *whole* unconfirmed window every pass, not just new audio
//! - `Hypothesis::committed_samples` counts samples from the window start whose
//!   text is final; it must never exceed the window length
//! - a failed pass returns `Err` and must leave the decoder's own state as it was,
//!   so the same window can be retried later
//!
//! Decoders are `Send` so a session can move its decoder onto a blocking thread
//! for the duration of a pass; they are never shared between sessions.

use crate::audio::buffer::DecodeWindow;
use crate::error::DecoderError;
use serde::{Deserialize, Serialize};

/// Result of one decode pass over the unconfirmed window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hypothesis {
    /// Newly finalized text; appended to the session transcript.
    pub committed_text: String,
    /// Samples from the window start covered by `committed_text`.
    pub committed_samples: usize,
    /// Best guess for the rest of the window. Replaces the previous guess wholesale.
    pub tentative_text: String,
}

/// A pluggable incremental speech recognizer.
pub trait SpeechDecoder: Send {
    fn name(&self) -> &str;

    fn decode(&mut self, window: &DecodeWindow<'_>) -> Result<Hypothesis, DecoderError>;
}

/// Model size/class selector passed through to decoder factories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    pub const ALL: [ModelSize; 5] = [
        ModelSize::Tiny,
        ModelSize::Base,
        ModelSize::Small,
        ModelSize::Medium,
        ModelSize::Large,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "Fastest, basic accuracy",
            ModelSize::Base => "Fast, good for testing",
            ModelSize::Small => "Balanced speed and accuracy",
            ModelSize::Medium => "Good accuracy, handles technical vocabulary",
            ModelSize::Large => "Best accuracy, slower processing",
        }
    }
}

/// Accepts plain sizes and the English-only `.en` suffix (`tiny.en`).
impl std::str::FromStr for ModelSize {
    type Err = DecoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let base = lowered.strip_suffix(".en").unwrap_or(&lowered);
        match base {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(DecoderError::UnknownModelSize(s.to_string())),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a decoder factory needs to build one session's decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderSpec {
    /// Registry name of the decoder implementation.
    pub kind: String,
    /// Language code, e.g. `en`.
    pub language: String,
    pub model_size: ModelSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("tiny".parse::<ModelSize>().unwrap(), ModelSize::Tiny);
        assert_eq!("Medium".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert_eq!("tiny.en".parse::<ModelSize>().unwrap(), ModelSize::Tiny);
        assert_eq!(
            "huge".parse::<ModelSize>().unwrap_err(),
            DecoderError::UnknownModelSize("huge".to_string())
        );
    }

    #[test]
    fn test_model_size_display_round_trips() {
        for size in ModelSize::ALL {
            assert_eq!(size.to_string().parse::<ModelSize>().unwrap(), size);
        }
    }

    #[test]
    fn test_model_size_serde() {
        let json = serde_json::to_string(&ModelSize::Small).unwrap();
        assert_eq!(json, "\"small\"");
    }
}
