//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **Pipeline errors** (`ValidationError`, `BufferError`, `DecoderError`,
//!   `TranscriptionError`, `FragmentError`): typed results of the per-fragment
//!   validate → decode → buffer → transcribe pipeline. They are ordinary data,
//!   carried back to the client inside a result message, and never crash the process.
//! - **HTTP errors** (`AppError`): what REST handlers return. Converted into JSON
//!   responses through actix-web's `ResponseError` trait.
//!
//! ## Error Scope:
//! | Error | Scope | Session continues? |
//! |---|---|---|
//! | `ValidationError` | one fragment | yes |
//! | `TranscriptionError::DecodeFailure` | one processing pass | yes, buffer untouched |
//! | buffer overrun | reported as a result status, not an error | yes |
//! | `FragmentError::Backlogged` | one fragment, refused before the session sees it | yes |
//! | `FragmentError::SampleRateChanged`, `BufferError` | whole session | no |
//!
//! ## Rust Concepts:
//! - **thiserror**: `#[derive(Error)]` generates `Display` and `std::error::Error`
//!   from the `#[error("...")]` attributes
//! - **#[from]**: Generates a `From` impl so `?` converts the inner error automatically

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// A fragment failed structural validation or could not be decoded to samples.
///
/// Every variant is recoverable: the offending fragment is dropped and the
/// session keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Fewer bytes than a canonical 44-byte WAV header.
    #[error("fragment too short: {len} bytes, a WAV header needs {min}")]
    TooShort { len: usize, min: usize },

    /// One of the RIFF/WAVE/fmt/data chunk tags is wrong.
    #[error("bad {chunk} tag: expected {expected:?}, got {found:?}")]
    BadMagic {
        chunk: &'static str,
        expected: &'static str,
        found: String,
    },

    /// Not linear PCM, or not mono.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// The payload's sample width has no decoder.
    #[error("unsupported bit depth: {0} bits per sample")]
    UnsupportedBitDepth(u16),

    /// Payload length is not a whole number of samples.
    #[error("truncated payload: {len} bytes is not a multiple of the {sample_width}-byte sample width")]
    TruncatedPayload { len: usize, sample_width: usize },
}

impl ValidationError {
    /// Machine-readable error kind used in outbound result messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::TooShort { .. } => "too_short",
            ValidationError::BadMagic { .. } => "bad_magic",
            ValidationError::UnsupportedFormat(_) => "unsupported_format",
            ValidationError::UnsupportedBitDepth(_) => "unsupported_bit_depth",
            ValidationError::TruncatedPayload { .. } => "truncated_payload",
        }
    }
}

/// The rolling buffer and its writer disagree about what the buffer holds.
///
/// This always means the transcriber and buffer have desynchronized, so it is
/// fatal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("cannot commit {requested} samples, only {available} buffered")]
    Desync { requested: usize, available: usize },

    #[error("buffer holds {expected} Hz audio, refusing a {found} Hz window")]
    RateMismatch { expected: u32, found: u32 },
}

/// Failure reported by a speech decoder implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecoderError {
    #[error("decoder failed: {0}")]
    Failed(String),

    #[error("unknown decoder: {0}")]
    UnknownDecoder(String),

    #[error("unknown model size: {0}")]
    UnknownModelSize(String),
}

/// Errors raised by the incremental transcriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptionError {
    /// The decoder failed this pass; buffer and transcript were left as they were.
    #[error(transparent)]
    DecodeFailure(#[from] DecoderError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("transcriber is closed")]
    Closed,
}

impl TranscriptionError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TranscriptionError::DecodeFailure(_))
    }
}

/// Outcome classification for one inbound fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentError {
    /// The transport could not even extract a fragment (bad JSON, bad base64, binary frame).
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The session's sample rate is fixed once set.
    #[error("sample rate changed mid-session: expected {expected} Hz, got {found} Hz")]
    SampleRateChanged { expected: u32, found: u32 },

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    /// Decoding is behind; the session already has this much audio queued.
    #[error("backlog full: {queued_ms} ms of audio already queued, limit is {max_ms} ms")]
    Backlogged { queued_ms: u64, max_ms: u64 },
}

impl FragmentError {
    /// Session-fatal errors terminate the session and close the connection.
    pub fn is_fatal(&self) -> bool {
        match self {
            FragmentError::Malformed(_)
            | FragmentError::Invalid(_)
            | FragmentError::Backlogged { .. } => false,
            FragmentError::SampleRateChanged { .. } => true,
            FragmentError::Transcription(err) => err.is_fatal(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FragmentError::Malformed(_) => "malformed_message",
            FragmentError::Invalid(err) => err.kind(),
            FragmentError::SampleRateChanged { .. } => "sample_rate_changed",
            FragmentError::Transcription(TranscriptionError::DecodeFailure(_)) => "decode_failure",
            FragmentError::Transcription(TranscriptionError::Buffer(_)) => "buffer_desync",
            FragmentError::Transcription(TranscriptionError::Closed) => "session_closed",
            FragmentError::Backlogged { .. } => "backlog_full",
        }
    }
}

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **ServiceUnavailable**: Session capacity exhausted (503 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    ValidationError(String),
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl AppError {
    fn parts(&self) -> (actix_web::http::StatusCode, &'static str, &str) {
        use actix_web::http::StatusCode;

        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.as_str()),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg.as_str()),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Port must be greater than 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<DecoderError> for AppError {
    fn from(err: DecoderError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
