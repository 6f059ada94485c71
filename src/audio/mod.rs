//! # Audio Processing Module
//!
//! The front half of the per-fragment pipeline, plus the session controller
//! that runs the whole pipeline for one connection.
//!
//! ## Key Components:
//! - **Frame validation** (`wav`): structural check of the 44-byte WAV header
//! - **Sample decoding** (`processor`): PCM payload → normalized `f32` samples
//! - **Rolling buffer** (`buffer`): unconfirmed audio since the last commit
//! - **Sessions** (`session`): per-connection controller, transport seam, session registry
//! - **Backlog** (`backlog`): bounded queue between a connection and its session loop
//!
//! ## Audio Format Requirements:
//! - **Container**: canonical 44-byte RIFF/WAVE header, then raw PCM
//! - **Bit Depth**: 16-bit (reference), 24-bit or 32-bit signed little-endian
//! - **Channels**: Mono only; stereo is rejected, never downmixed
//! - **Sample Rate**: any, but fixed for the lifetime of a session

pub mod backlog; // Bounded fragment queue
pub mod buffer; // Rolling unconfirmed-audio buffer
pub mod processor; // PCM decoding and signal energy
pub mod session; // SessionController and SessionManager
pub mod wav; // WAV header validation

pub use buffer::{DecodeWindow, RollingAudioBuffer};
pub use processor::SampleWindow;
pub use session::{AudioFragment, OutboundResult, SessionController, SessionManager};
