//! # Decoder Registry
//!
//! Maps decoder names to factories so each session can build its own decoder
//! instance from a [`DecoderSpec`]. The registry itself is read-only once the
//! server starts and is shared by every session; decoders are never shared.
//!
//! ## Built-in Decoders:
//! - **activity**: energy-based voice activity tokens stabilized with local agreement

use crate::error::DecoderError;
use crate::transcription::activity::ActivityRecognizer;
use crate::transcription::agreement::LocalAgreementDecoder;
use crate::transcription::decoder::{DecoderSpec, SpeechDecoder};
use std::collections::BTreeMap;
use std::fmt;

/// Builds one decoder for one session.
pub type DecoderFactory = fn(&DecoderSpec) -> Box<dyn SpeechDecoder>;

pub struct DecoderRegistry {
    factories: BTreeMap<String, DecoderFactory>,
}

impl DecoderRegistry {
    /// Registry with the built-in decoders.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("activity", |_spec| {
            Box::new(LocalAgreementDecoder::new(ActivityRecognizer::default()))
        });
        registry
    }

    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Add or replace a decoder factory.
    pub fn register(&mut self, name: &str, factory: DecoderFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, spec: &DecoderSpec) -> Result<Box<dyn SpeechDecoder>, DecoderError> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| DecoderError::UnknownDecoder(spec.kind.clone()))?;

        tracing::debug!(
            kind = %spec.kind,
            language = %spec.language,
            model_size = %spec.model_size,
            "creating session decoder"
        );
        Ok(factory(spec))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered decoder names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("decoders", &self.list())
            .finish()
    }
}
