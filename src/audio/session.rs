//! # Audio Session Management
//!
//! One session per connection. A session owns its own transcriber (buffer and
//! decoder) and processes fragments strictly in arrival order; nothing inside a
//! session is shared with any other session.
//!
//! ## Per-Fragment Pipeline:
//! 1. **Validate** the WAV header
//! 2. **Check** the sample rate against the one fixed by the first accepted fragment
//! 3. **Decode** the PCM payload into samples
//! 4. **Insert** the samples into the transcriber (may report an overrun)
//! 5. **Process** one decode pass and build the outbound result
//!
//! ## Session Lifecycle:
//! - **Active**: fragments are processed; per-fragment errors are reported and skipped
//! - **Terminated**: a session-fatal error occurred or the transport closed;
//!   buffered audio is released and every later fragment is refused
//!
//! ## Rust Concepts:
//! - **async-trait**: `FragmentTransport` has an async pull method, so the trait
//!   is declared with `#[async_trait]` to make it usable as a generic bound
//! - **Ownership hand-off**: `run_session` moves the controller into a blocking
//!   task for each fragment and takes it back when the pass finishes, so the
//!   decode never runs on the async executor and never needs a lock

use crate::audio::processor::{decode_samples, rms_db, SampleWindow};
use crate::audio::wav;
use crate::error::{AppError, AppResult, FragmentError, TranscriptionError};
use crate::transcription::engine::{IncrementalTranscriber, IterationOutput, Overrun, TranscriberStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

/// One unit of audio as delivered by the transport.
#[derive(Debug, Clone)]
pub struct AudioFragment {
    /// Caller-assigned, echoed back in the result.
    pub id: String,
    pub bytes: Vec<u8>,
}

impl AudioFragment {
    pub fn new(id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            bytes,
        }
    }
}

/// Outcome of one fragment, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentStatus {
    /// Accepted and decoded.
    Ok,
    /// Accepted, but the oldest unconfirmed audio was dropped to make room.
    Overrun,
    /// Refused; the session continues.
    Rejected,
    /// Accepted into the buffer, but this decode pass failed; retried next time.
    DecodeFailed,
    /// The session is over.
    Fatal,
    /// Refused before processing because too much audio was already queued
    /// for this session; the session continues.
    Backlogged,
}

impl FragmentStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, FragmentStatus::Ok | FragmentStatus::Overrun)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultError {
    pub kind: String,
    pub message: String,
}

impl From<&FragmentError> for ResultError {
    fn from(err: &FragmentError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Everything the transport needs to answer one fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundResult {
    pub fragment_id: String,
    pub status: FragmentStatus,
    /// Text appended to the committed transcript by this fragment.
    pub committed_delta: String,
    /// Current tentative tail, replacing any earlier one.
    pub tentative_text: String,
    /// Full committed transcript so far.
    pub committed_text: String,
    pub error: Option<ResultError>,
    /// Unconfirmed audio still buffered, in seconds.
    pub buffered_seconds: f64,
    /// Advisory signal level of the fragment, when it got far enough to be decoded.
    pub energy_db: Option<f32>,
    pub dropped_samples: Option<usize>,
}

impl OutboundResult {
    pub fn is_fatal(&self) -> bool {
        self.status == FragmentStatus::Fatal
    }

    /// Answer for a fragment the transport refused to queue.
    ///
    /// The session never saw it, so the transcript fields repeat the last
    /// result the session produced, if any.
    pub fn backlogged(
        fragment_id: impl Into<String>,
        err: &FragmentError,
        previous: Option<&OutboundResult>,
    ) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            status: FragmentStatus::Backlogged,
            committed_delta: String::new(),
            tentative_text: previous.map(|p| p.tentative_text.clone()).unwrap_or_default(),
            committed_text: previous.map(|p| p.committed_text.clone()).unwrap_or_default(),
            error: Some(ResultError::from(err)),
            buffered_seconds: previous.map_or(0.0, |p| p.buffered_seconds),
            energy_db: None,
            dropped_samples: None,
        }
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub accepted: u64,
    pub rejected: u64,
    pub decode_failures: u64,
    pub overruns: u64,
}

/// Runs the fragment pipeline for one session.
pub struct SessionController {
    session_id: String,
    transcriber: IncrementalTranscriber,
    /// Fixed by configuration or by the first accepted fragment.
    sample_rate: Option<u32>,
    terminated: bool,
    counters: SessionCounters,
}

impl SessionController {
    pub fn new(session_id: impl Into<String>, transcriber: IncrementalTranscriber) -> Self {
        Self {
            session_id: session_id.into(),
            transcriber,
            sample_rate: None,
            terminated: false,
            counters: SessionCounters::default(),
        }
    }

    /// Require every fragment to use this rate, instead of adopting the first fragment's.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Process one fragment end to end.
    ///
    /// Never panics and never returns an error: every failure becomes a result
    /// carrying the fragment id and error kind.
    pub fn on_fragment(&mut self, fragment: AudioFragment) -> OutboundResult {
        let AudioFragment { id, bytes } = fragment;

        if self.terminated {
            return self.failure(id, TranscriptionError::Closed.into());
        }

        let (window, energy_db) = match self.admit(&bytes) {
            Ok(admitted) => admitted,
            Err(err) => return self.failure(id, err),
        };

        let overrun = match self.transcriber.insert_audio_chunk(window) {
            Ok(overrun) => overrun,
            Err(err) => return self.failure(id, err.into()),
        };
        self.counters.accepted += 1;
        if overrun.is_some() {
            self.counters.overruns += 1;
        }

        let mut result = match self.transcriber.process_iter() {
            Ok(output) => self.success(id, output, overrun),
            Err(err) => self.failure(id, err.into()),
        };
        result.energy_db = Some(energy_db);
        result.dropped_samples = overrun.map(|o| o.dropped_samples);
        result
    }

    /// Validate and decode; nothing in the session changes unless this succeeds.
    fn admit(&mut self, bytes: &[u8]) -> Result<(SampleWindow, f32), FragmentError> {
        let frame = wav::validate(bytes)?;
        let rate = frame.header.sample_rate;

        if let Some(expected) = self.sample_rate {
            if expected != rate {
                return Err(FragmentError::SampleRateChanged {
                    expected,
                    found: rate,
                });
            }
        }

        if !frame.declared_len_matches() {
            tracing::debug!(
                session_id = %self.session_id,
                declared = frame.header.data_len,
                actual = frame.payload.len(),
                "data chunk length differs from payload, using payload"
            );
        }

        let samples = decode_samples(frame.payload, frame.header.bit_depth)?;
        let energy_db = rms_db(&samples);
        tracing::debug!(
            session_id = %self.session_id,
            samples = samples.len(),
            sample_rate = rate,
            energy_db,
            "fragment decoded"
        );

        self.sample_rate = Some(rate);
        Ok((SampleWindow::new(samples, rate), energy_db))
    }

    fn success(
        &self,
        fragment_id: String,
        output: IterationOutput,
        overrun: Option<Overrun>,
    ) -> OutboundResult {
        OutboundResult {
            fragment_id,
            status: if overrun.is_some() {
                FragmentStatus::Overrun
            } else {
                FragmentStatus::Ok
            },
            committed_delta: output.committed_delta,
            tentative_text: output.tentative_text,
            committed_text: self.transcriber.committed_text().to_string(),
            error: None,
            buffered_seconds: self.transcriber.buffer().duration_seconds(),
            energy_db: None,
            dropped_samples: None,
        }
    }

    /// Report a fragment that could not be delivered as a fragment at all
    /// (bad JSON, bad base64, binary frame).
    pub fn reject(&mut self, fragment_id: impl Into<String>, err: FragmentError) -> OutboundResult {
        self.failure(fragment_id.into(), err)
    }

    fn failure(&mut self, fragment_id: String, err: FragmentError) -> OutboundResult {
        let status = if err.is_fatal() {
            tracing::error!(
                session_id = %self.session_id,
                fragment_id = %fragment_id,
                error = %err,
                "session-fatal error"
            );
            self.terminate();
            FragmentStatus::Fatal
        } else if matches!(
            err,
            FragmentError::Transcription(TranscriptionError::DecodeFailure(_))
        ) {
            self.counters.decode_failures += 1;
            FragmentStatus::DecodeFailed
        } else {
            tracing::warn!(
                session_id = %self.session_id,
                fragment_id = %fragment_id,
                kind = err.kind(),
                error = %err,
                "fragment rejected"
            );
            self.counters.rejected += 1;
            FragmentStatus::Rejected
        };

        OutboundResult {
            fragment_id,
            status,
            committed_delta: String::new(),
            tentative_text: self.transcriber.tentative_text().to_string(),
            committed_text: self.transcriber.committed_text().to_string(),
            error: Some(ResultError::from(&err)),
            buffered_seconds: self.transcriber.buffer().duration_seconds(),
            energy_db: None,
            dropped_samples: None,
        }
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.transcriber.close();
    }

    /// Release the session's buffer and decoder state. Tentative text is discarded.
    pub fn on_close(&mut self) {
        if !self.terminated {
            self.terminate();
        }
        tracing::info!(
            session_id = %self.session_id,
            accepted = self.counters.accepted,
            rejected = self.counters.rejected,
            decode_failures = self.counters.decode_failures,
            overruns = self.counters.overruns,
            decode_passes = self.transcriber.stats().passes,
            committed_chars = self.transcriber.committed_text().len(),
            "session closed"
        );
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn committed_text(&self) -> &str {
        self.transcriber.committed_text()
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    pub fn transcriber_stats(&self) -> TranscriberStats {
        self.transcriber.stats()
    }
}

/// What a transport hands to the session loop.
#[derive(Debug, Clone)]
pub enum Inbound {
    Fragment(AudioFragment),
    /// A message arrived that could not be turned into a fragment.
    Malformed {
        fragment_id: Option<String>,
        reason: String,
    },
}

impl Inbound {
    pub fn fragment_id(&self) -> Option<&str> {
        match self {
            Inbound::Fragment(fragment) => Some(&fragment.id),
            Inbound::Malformed { fragment_id, .. } => fragment_id.as_deref(),
        }
    }
}

/// The connection side of a session: pull fragments, push results.
#[async_trait]
pub trait FragmentTransport: Send {
    /// Next inbound message, or `None` once the connection is gone.
    async fn next_fragment(&mut self) -> Option<Inbound>;

    fn send_result(&mut self, result: OutboundResult);

    /// Tear the connection down after a session-fatal error.
    fn terminate(&mut self, reason: &str);
}

/// Drive a session until the transport closes or a fatal error ends it.
///
/// Each fragment is processed on tokio's blocking pool so a slow decode never
/// stalls other sessions. Dropping the returned future abandons the session;
/// a decode already running finishes in the background and its result is discarded.
pub async fn run_session<T: FragmentTransport>(
    mut controller: SessionController,
    transport: &mut T,
) -> SessionCounters {
    while let Some(inbound) = transport.next_fragment().await {
        let result = match inbound {
            Inbound::Malformed {
                fragment_id,
                reason,
            } => controller.reject(fragment_id.unwrap_or_default(), FragmentError::Malformed(reason)),
            Inbound::Fragment(fragment) => {
                let pass = tokio::task::spawn_blocking(move || {
                    let result = controller.on_fragment(fragment);
                    (controller, result)
                })
                .await;

                match pass {
                    Ok((returned, result)) => {
                        controller = returned;
                        result
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "fragment processing task failed");
                        transport.terminate("internal error");
                        return SessionCounters::default();
                    }
                }
            }
        };

        let fatal_reason = result
            .is_fatal()
            .then(|| result.error.as_ref().map(|e| e.message.clone()).unwrap_or_default());
        transport.send_result(result);

        if let Some(reason) = fatal_reason {
            transport.terminate(&reason);
            break;
        }
    }

    controller.on_close();
    controller.counters()
}

/// Public view of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub decoder: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

/// Tracks live sessions and enforces the concurrent session limit.
///
/// ## Thread Safety:
/// Registration happens on HTTP worker threads, removal from session actors.
/// A `RwLock` guards the map; a poisoned lock is recovered rather than
/// propagated, since the map holds no invariants a panic could break.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    max_concurrent_sessions: AtomicUsize,
}

impl SessionManager {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions: AtomicUsize::new(max_concurrent_sessions),
        }
    }

    /// Reserve a slot for a new session.
    ///
    /// ## Returns:
    /// - **Ok(session_id)**: a fresh UUID
    /// - **Err(ServiceUnavailable)**: the limit is reached
    pub fn register(&self, decoder: &str, language: &str) -> AppResult<String> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());

        let max = self.max_sessions();
        if sessions.len() >= max {
            return Err(AppError::ServiceUnavailable(format!(
                "Maximum concurrent sessions ({}) reached",
                max
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        sessions.insert(
            session_id.clone(),
            SessionInfo {
                session_id: session_id.clone(),
                decoder: decoder.to_string(),
                language: language.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(session_id)
    }

    pub fn remove(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<SessionInfo> = sessions.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    pub fn max_sessions(&self) -> usize {
        self.max_concurrent_sessions.load(Ordering::Relaxed)
    }

    /// Applies to new sessions only; live sessions above a lowered limit keep running.
    pub fn set_max_sessions(&self, max: usize) {
        self.max_concurrent_sessions.store(max, Ordering::Relaxed);
    }
}
