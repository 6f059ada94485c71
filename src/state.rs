//! # Application State Management
//!
//! State shared by every HTTP handler and every session actor.
//!
//! ## What is shared, and what is not:
//! - **Shared**: configuration, counters, the session registry and the decoder
//!   registry (read-only after startup)
//! - **Never shared**: a session's buffer, transcript and decoder instance;
//!   those live inside that session's own task
//!
//! ## Rust Concepts:
//! - **Arc<RwLock<T>>**: many readers or one writer, shared across actix workers
//! - **PoisonError::into_inner**: a panic while holding a lock must not take
//!   every later request down with it, so poisoned locks are recovered

use crate::audio::session::{FragmentStatus, OutboundResult, SessionManager};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::transcription::DecoderRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    pub sessions: Arc<SessionManager>,

    /// Decoder factories, shared read-only by all sessions
    pub decoders: Arc<DecoderRegistry>,

    pub start_time: Instant,
}

/// Counters collected across HTTP requests and transcription sessions.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of HTTP errors (4xx/5xx) since server start
    pub error_count: u64,

    pub transcription: TranscriptionMetrics,

    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-fragment outcomes summed over all sessions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TranscriptionMetrics {
    pub sessions_started: u64,
    pub fragments_received: u64,
    pub fragments_rejected: u64,
    pub decode_failures: u64,
    pub buffer_overruns: u64,
    pub fatal_sessions: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    /// State with the built-in decoders registered.
    pub fn new(config: AppConfig) -> Self {
        Self::with_registry(config, DecoderRegistry::new())
    }

    pub fn with_registry(config: AppConfig, decoders: DecoderRegistry) -> Self {
        let sessions = SessionManager::new(config.performance.max_concurrent_sessions);
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            sessions: Arc::new(sessions),
            decoders: Arc::new(decoders),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; the lock is released immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply a partial JSON update to the live configuration.
    ///
    /// Server host/port changes are stored but only take effect on restart;
    /// the session limit applies to the next connection.
    pub fn update_config(&self, json: &str) -> AppResult<AppConfig> {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);

        let mut updated = config.clone();
        updated
            .update_from_json(json)
            .map_err(|e| AppError::ValidationError(e.to_string()))?;

        if !self.decoders.contains(&updated.decoder.kind) {
            return Err(AppError::ValidationError(format!(
                "Unknown decoder: {}",
                updated.decoder.kind
            )));
        }

        self.sessions
            .set_max_sessions(updated.performance.max_concurrent_sessions);
        *config = updated.clone();
        Ok(updated)
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let endpoint_metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    pub fn record_session_started(&self) {
        self.with_metrics(|m| m.transcription.sessions_started += 1);
    }

    /// Count one answered fragment by its outcome.
    ///
    /// An overrun is counted from the dropped samples, not the status, since a
    /// fragment can overrun the buffer and then fail its decode pass.
    pub fn record_fragment(&self, result: &OutboundResult) {
        self.with_metrics(|m| {
            let t = &mut m.transcription;
            t.fragments_received += 1;
            if result.dropped_samples.is_some() || result.status == FragmentStatus::Backlogged {
                t.buffer_overruns += 1;
            }
            match result.status {
                FragmentStatus::Ok | FragmentStatus::Overrun | FragmentStatus::Backlogged => {}
                FragmentStatus::Rejected => t.fragments_rejected += 1,
                FragmentStatus::DecodeFailed => t.decode_failures += 1,
                FragmentStatus::Fatal => t.fatal_sessions += 1,
            }
        });
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn with_metrics(&self, update: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answered(status: FragmentStatus, dropped_samples: Option<usize>) -> OutboundResult {
        OutboundResult {
            fragment_id: "f".to_string(),
            status,
            committed_delta: String::new(),
            tentative_text: String::new(),
            committed_text: String::new(),
            error: None,
            buffered_seconds: 0.0,
            energy_db: None,
            dropped_samples,
        }
    }

    #[test]
    fn test_fragment_outcomes_are_counted() {
        let state = AppState::new(AppConfig::default());
        state.record_fragment(&answered(FragmentStatus::Ok, None));
        state.record_fragment(&answered(FragmentStatus::Overrun, Some(160)));
        state.record_fragment(&answered(FragmentStatus::Rejected, None));
        state.record_fragment(&answered(FragmentStatus::DecodeFailed, None));
        state.record_fragment(&answered(FragmentStatus::Fatal, None));
        state.record_fragment(&answered(FragmentStatus::Backlogged, None));

        let t = state.get_metrics_snapshot().transcription;
        assert_eq!(t.fragments_received, 6);
        assert_eq!(t.buffer_overruns, 2);
        assert_eq!(t.fragments_rejected, 1);
        assert_eq!(t.decode_failures, 1);
        assert_eq!(t.fatal_sessions, 1);
    }

    #[test]
    fn test_overrun_is_counted_when_decode_also_failed() {
        let state = AppState::new(AppConfig::default());
        state.record_fragment(&answered(FragmentStatus::DecodeFailed, Some(1600)));

        let t = state.get_metrics_snapshot().transcription;
        assert_eq!(t.buffer_overruns, 1);
        assert_eq!(t.decode_failures, 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_update_config_applies_session_limit() {
        let state = AppState::new(AppConfig::default());
        let updated = state
            .update_config(r#"{"performance": {"max_concurrent_sessions": 3}}"#)
            .unwrap();

        assert_eq!(updated.performance.max_concurrent_sessions, 3);
        assert_eq!(state.sessions.max_sessions(), 3);
        assert_eq!(state.get_config().performance.max_concurrent_sessions, 3);
    }

    #[test]
    fn test_update_config_rejects_unknown_decoder() {
        let state = AppState::new(AppConfig::default());
        let err = state
            .update_config(r#"{"decoder": {"kind": "whisper"}}"#)
            .unwrap_err();

        assert!(matches!(err, AppError::ValidationError(_)));
        assert_eq!(state.get_config().decoder.kind, "activity");
    }
}
