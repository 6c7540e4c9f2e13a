//! Liveness and metrics endpoints.

use crate::playback::ControllerStatus;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Playback summary, or `null` fields when the controller task is gone.
fn playback_summary(status: Option<&ControllerStatus>) -> serde_json::Value {
    match status {
        Some(status) => json!({
            "available": true,
            "state": status.state,
            "has_audio": status.has_audio,
            "output": status.output,
            "error": status.error
        }),
        None => json!({
            "available": false,
            "state": serde_json::Value::Null
        }),
    }
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let playback = state.controller.status().await.ok();

    let status = if playback.is_some() { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate()
        },
        "memory": get_memory_info(),
        "synthesis": {
            "model": config.synthesis.model,
            "default_voice": config.synthesis.default_voice,
            "api_key_configured": !config.synthesis.api_key.is_empty()
        },
        "extraction": {
            "model": config.extraction.model,
            "max_upload_bytes": config.extraction.max_upload_bytes
        },
        "playback": playback_summary(playback.as_ref())
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let playback = state.controller.status().await.ok();

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
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            },
            "audio_downloads": metrics.audio_downloads
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "playback": playback.map(|status| status.stats)
    }))
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> serde_json::Value {
    let status = match std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
        Ok(status) => status,
        Err(_) => return unavailable_memory_info("Could not read /proc status"),
    };

    let read_kb = |prefix: &str| -> u64 {
        status
            .lines()
            .find(|line| line.starts_with(prefix))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .unwrap_or(0)
            * 1024
    };

    json!({
        "resident_memory_bytes": read_kb("VmRSS:"),
        "virtual_memory_bytes": read_kb("VmSize:"),
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> serde_json::Value {
    unavailable_memory_info("Memory info not available on this platform")
}

fn unavailable_memory_info(note: &str) -> serde_json::Value {
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": note
    })
}
