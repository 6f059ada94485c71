use crate::config::AppConfig;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let active_sessions = state.sessions.active_count();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "active_sessions": active_sessions
        },
        "decoders": state.decoders.list(),
        "memory": get_memory_info(),
        "system": get_system_status(&config, active_sessions, state.sessions.max_sessions())
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let t = metrics.transcription;

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "requests_per_second": ratio(metrics.request_count, uptime_seconds)
        },
        "transcription": {
            "active_sessions": state.sessions.active_count(),
            "sessions_started": t.sessions_started,
            "fragments_received": t.fragments_received,
            "fragments_rejected": t.fragments_rejected,
            "decode_failures": t.decode_failures,
            "buffer_overruns": t.buffer_overruns,
            "fatal_sessions": t.fatal_sessions
        },
        "sessions": state.sessions.list(),
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let field_bytes = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map_or(0, |kb| kb * 1024)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available for pid {}", process::id())
    })
}

fn get_system_status(config: &AppConfig, active: usize, max: usize) -> serde_json::Value {
    let session_usage = if max > 0 {
        active as f64 / max as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": max,
        "current_sessions": active,
        "max_buffer_seconds": config.audio.max_buffer_seconds,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::OutboundResult;
    use crate::error::FragmentError;
    use actix_web::test::{call_and_read_body_json, init_service, TestRequest};
    use actix_web::App;

    #[actix_web::test]
    async fn test_health_check() {
        let state = AppState::new(AppConfig::default());
        let app = init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let body: serde_json::Value =
            call_and_read_body_json(&app, TestRequest::get().uri("/health").to_request())
                .await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["metrics"]["active_sessions"], 0);
        assert_eq!(body["decoders"][0], "activity");
        assert_eq!(body["system"]["status"], "normal");
    }

    #[actix_web::test]
    async fn test_metrics_include_transcription_counters() {
        let state = AppState::new(AppConfig::default());
        let err = FragmentError::Backlogged {
            queued_ms: 500,
            max_ms: 500,
        };
        state.record_fragment(&OutboundResult::backlogged("f-1", &err, None));
        state.sessions.register("activity", "en").unwrap();

        let app = init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let body: serde_json::Value =
            call_and_read_body_json(&app, TestRequest::get().uri("/metrics").to_request())
                .await;
        assert_eq!(body["transcription"]["buffer_overruns"], 1);
        assert_eq!(body["transcription"]["fragments_received"], 1);
        assert_eq!(body["transcription"]["active_sessions"], 1);
        assert_eq!(body["sessions"][0]["language"], "en");
    }

    #[test]
    fn test_system_status_load_levels() {
        let config = AppConfig::default();
        assert_eq!(get_system_status(&config, 1, 10)["status"], "normal");
        assert_eq!(get_system_status(&config, 8, 10)["status"], "moderate_load");
        assert_eq!(get_system_status(&config, 10, 10)["status"], "high_load");
    }
}
