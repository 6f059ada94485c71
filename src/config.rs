//! # Configuration Management
//!
//! Loads application configuration from layered sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables, sections split by a double underscore:
//!    `APP_SERVER__PORT`, `APP_AUDIO__MAX_BUFFER_SECONDS`
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Rust Concepts:
//! - **Serde**: the same structs are read from TOML/env, returned as JSON by
//!   `GET /api/v1/config` and patched by `PUT /api/v1/config`
//! - **#[serde(default)]**: optional keys fall back to `None` when absent

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub decoder: DecoderConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Default decoder for new sessions; clients may override per connection
/// with the `decoder`, `language` and `model` query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Registry name, e.g. "activity".
    pub kind: String,
    /// ISO 639-1 code like "en", "es", "fr".
    pub language: String,
    /// "tiny", "base", "small", "medium" or "large".
    pub model_size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Required sample rate. Unset means each session adopts the rate of its
    /// first accepted fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// Upper bound on unconfirmed audio per session; the oldest audio is
    /// dropped (and reported) beyond it.
    pub max_buffer_seconds: f64,
}

/// ## Tuning guidelines:
/// - Every session decodes on its own blocking thread, so the session limit
///   is effectively a CPU budget
/// - The client timeout must be longer than the heartbeat interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            decoder: DecoderConfig {
                kind: "activity".to_string(),
                language: "en".to_string(),
                model_size: "tiny".to_string(),
            },
            audio: AudioConfig {
                sample_rate: None,
                max_buffer_seconds: 15.0, // Re-decode cost grows with the window
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 16,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_DECODER__LANGUAGE=de`: Override default session language
    /// - `APP_PERFORMANCE__MAX_CONCURRENT_SESSIONS=4`: Lower the session limit
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the values make sense together.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("Server port cannot be 0");
        }

        if self.decoder.kind.trim().is_empty() {
            bail!("Decoder kind cannot be empty");
        }

        if self.decoder.language.trim().is_empty() {
            bail!("Decoder language cannot be empty");
        }

        if let Err(err) = self.decoder.model_size.parse::<crate::transcription::ModelSize>() {
            bail!("Invalid decoder model size: {}", err);
        }

        if self.audio.sample_rate == Some(0) {
            bail!("Audio sample rate must be greater than 0");
        }

        let max_buffer = self.audio.max_buffer_seconds;
        if !max_buffer.is_finite() || max_buffer <= 0.0 {
            bail!("Max buffer seconds must be a finite number greater than 0");
        }

        if self.performance.max_concurrent_sessions == 0 {
            bail!("Max concurrent sessions must be greater than 0");
        }

        if self.performance.heartbeat_interval_secs == 0 {
            bail!("Heartbeat interval must be greater than 0");
        }

        if self.performance.client_timeout_secs <= self.performance.heartbeat_interval_secs {
            bail!("Client timeout must be longer than the heartbeat interval");
        }

        Ok(())
    }

    /// Apply a partial JSON update (used by `PUT /api/v1/config`).
    ///
    /// Only the keys present are changed, e.g. `{"audio": {"max_buffer_seconds": 5}}`.
    /// The update is all-or-nothing: if the result fails validation, `self` is
    /// left exactly as it was.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;
        let mut updated = self.clone();

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                updated.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                updated.server.port = u16::try_from(port).unwrap_or(0);
            }
        }

        if let Some(decoder) = partial.get("decoder") {
            if let Some(kind) = decoder.get("kind").and_then(|v| v.as_str()) {
                updated.decoder.kind = kind.to_string();
            }
            if let Some(language) = decoder.get("language").and_then(|v| v.as_str()) {
                updated.decoder.language = language.to_string();
            }
            if let Some(size) = decoder.get("model_size").and_then(|v| v.as_str()) {
                updated.decoder.model_size = size.to_string();
            }
        }

        if let Some(audio) = partial.get("audio") {
            match audio.get("sample_rate") {
                Some(serde_json::Value::Null) => updated.audio.sample_rate = None,
                Some(rate) => {
                    if let Some(rate) = rate.as_u64() {
                        updated.audio.sample_rate = Some(u32::try_from(rate).unwrap_or(0));
                    }
                }
                None => {}
            }
            if let Some(secs) = audio.get("max_buffer_seconds").and_then(|v| v.as_f64()) {
                updated.audio.max_buffer_seconds = secs;
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                updated.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(secs) = performance
                .get("heartbeat_interval_secs")
                .and_then(|v| v.as_u64())
            {
                updated.performance.heartbeat_interval_secs = secs;
            }
            if let Some(secs) = performance.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                updated.performance.client_timeout_secs = secs;
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.decoder.kind, "activity");
        assert_eq!(config.audio.sample_rate, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.max_buffer_seconds = 0.0;
        assert!(config.validate().is_err());

        for unbounded in [f64::INFINITY, f64::NAN] {
            let mut config = AppConfig::default();
            config.audio.max_buffer_seconds = unbounded;
            assert!(config.validate().is_err());
        }

        let mut config = AppConfig::default();
        config.audio.sample_rate = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.decoder.model_size = "enormous".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.client_timeout_secs = config.performance.heartbeat_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "audio": {"max_buffer_seconds": 5.5}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.audio.max_buffer_seconds, 5.5);
        // Untouched
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_update_sample_rate_can_be_set_and_cleared() {
        let mut config = AppConfig::default();
        config
            .update_from_json(r#"{"audio": {"sample_rate": 16000}}"#)
            .unwrap();
        assert_eq!(config.audio.sample_rate, Some(16000));

        config
            .update_from_json(r#"{"audio": {"sample_rate": null}}"#)
            .unwrap();
        assert_eq!(config.audio.sample_rate, None);
    }

    #[test]
    fn test_failed_update_changes_nothing() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "performance": {"max_concurrent_sessions": 0}}"#;

        assert!(config.update_from_json(json).is_err());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.performance.max_concurrent_sessions, 16);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json("{not json").is_err());
    }
}
