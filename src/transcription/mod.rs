//! # Transcription Module
//!
//! Everything between "a window of samples" and "text for the client".
//!
//! ## Key Components:
//! - **Decoder contract** (`decoder`): the black-box recognizer interface and its hypothesis type
//! - **Local agreement** (`agreement`): stabilizes a re-transcribing word recognizer
//! - **Activity recognizer** (`activity`): built-in model-free recognizer
//! - **Registry** (`registry`): decoder name → per-session factory
//! - **Engine** (`engine`): the incremental transcriber that owns a session's buffer and decoder
//!
//! Neural model backends plug in as another `WordRecognizer` or `SpeechDecoder`
//! registered under their own name; nothing else in the crate needs to change.

pub mod activity; // Energy-based voice activity recognizer
pub mod agreement; // LocalAgreement-2 stabilization
pub mod decoder; // SpeechDecoder trait and Hypothesis
pub mod engine; // IncrementalTranscriber
pub mod registry; // Decoder factories

pub use decoder::{DecoderSpec, Hypothesis, ModelSize, SpeechDecoder};
pub use engine::{IncrementalTranscriber, IterationOutput, Overrun, TranscriberState};
pub use registry::DecoderRegistry;
