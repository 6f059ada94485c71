//! # Live Scribe Backend
//!
//! Streaming speech transcription over WebSocket. A client sends short WAV
//! fragments; for each one the server answers with the text that just became
//! final (committed, never retracted) and its current best guess for the rest
//! (tentative, replaced on every fragment).
//!
//! ## Application Architecture:
//! - **audio**: WAV validation, PCM decoding, rolling buffer, session controller
//! - **transcription**: decoder contract, local-agreement stabilization, incremental transcriber
//! - **websocket**: the actix actor that connects a socket to a session
//! - **config** / **state** / **error**: configuration layers, shared state, error types
//! - **health** / **handlers** / **middleware**: REST endpoints and request metrics

pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod state;
pub mod transcription;
pub mod websocket;

use actix_web::web;

/// Register every route. Shared by `main` and the tests.
///
/// ## Routes:
/// - `GET /health`, `GET /api/v1/health`
/// - `GET /api/v1/metrics`
/// - `GET|PUT /api/v1/config`
/// - `GET /api/v1/decoders`
/// - `GET /ws`, `GET /api/v1/ws` (WebSocket upgrade)
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(handlers::get_config))
            .route("/config", web::put().to(handlers::update_config))
            .route("/decoders", web::get().to(handlers::list_decoders))
            .route("/ws", web::get().to(websocket::audio_websocket)),
    )
    .route("/health", web::get().to(health::health_check))
    .route("/ws", web::get().to(websocket::audio_websocket));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use actix_web::test::{call_service, init_service, TestRequest};
    use actix_web::{http::StatusCode, App};

    #[actix_web::test]
    async fn test_routes_are_wired() {
        let state = AppState::new(AppConfig::default());
        let app = init_service(
            App::new()
                .app_data(web::Data::new(state))
                .wrap(middleware::MetricsMiddleware)
                .configure(configure_routes),
        )
        .await;

        for uri in [
            "/health",
            "/api/v1/health",
            "/api/v1/metrics",
            "/api/v1/config",
            "/api/v1/decoders",
        ] {
            let resp = call_service(&app, TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK, "GET {}", uri);
        }

        let resp =
            call_service(&app, TestRequest::get().uri("/nope").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
