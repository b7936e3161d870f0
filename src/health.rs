//! # Health and Metrics Endpoints
//!
//! Operational reporting for the relay: a liveness report at `/health` and
//! detailed counters at `/api/v1/metrics`. Neither exposes the provider API
//! key or any upstream diagnostics.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let active = state.registry.read().unwrap().active_count();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "voice-relay-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "relay": {
            "active_sessions": active,
            "max_sessions": config.relay.max_sessions,
            "connections_total": metrics.connections_total,
            "provider_errors": metrics.provider_errors
        },
        "provider": {
            "model": config.provider.model,
            "language": config.provider.language,
            "configured": !config.provider.api_key.is_empty()
        },
        "memory": memory_info(),
        "system": load_status(active, config.relay.max_sessions)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms()
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "http": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "endpoints": endpoint_stats
        },
        "relay": {
            "active_sessions": metrics.active_relays,
            "max_sessions": config.relay.max_sessions,
            "connections_total": metrics.connections_total,
            "packets_relayed": metrics.packets_relayed,
            "packets_dropped": metrics.packets_dropped,
            "transcripts_relayed": metrics.transcripts_relayed,
            "provider_errors": metrics.provider_errors
        },
        "memory": memory_info()
    }))
}

/// Resident/virtual memory of this process, where the platform exposes it.
fn memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

/// Relay load banding based on session slot usage.
fn load_status(active_sessions: usize, max_sessions: usize) -> serde_json::Value {
    let usage = if max_sessions > 0 {
        active_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (usage * 100.0).round(),
        "current_sessions": active_sessions,
        "max_sessions": max_sessions
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_status_banding() {
        assert_eq!(load_status(0, 16)["status"], "normal");
        assert_eq!(load_status(12, 16)["status"], "moderate_load");
        assert_eq!(load_status(15, 16)["status"], "high_load");
        assert_eq!(load_status(3, 0)["status"], "normal");
    }
}
