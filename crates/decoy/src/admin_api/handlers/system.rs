//! System handlers: root, health, metrics, config.

use crate::admin_api::types::*;
use crate::imposter::ImposterManager;
use crate::metrics::collect_metrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;

/// GET / - Root endpoint (Mountebank-compatible format)
pub fn handle_root(base_url: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "_links": {
            "imposters": {"href": format!("{}/imposters", base_url)},
            "config": {"href": format!("{}/config", base_url)}
        }
    });
    json_response(StatusCode::OK, &body)
}

/// GET /health - Health check
pub fn handle_health() -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &serde_json::json!({"status": "ok"}))
}

/// GET /metrics - Prometheus metrics
pub fn handle_metrics() -> Response<Full<Bytes>> {
    build_response_with_headers(
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        collect_metrics(),
    )
}

/// GET /config - Effective server options
pub fn handle_config(manager: Arc<ImposterManager>) -> Response<Full<Bytes>> {
    let settings = manager.settings();
    let config = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "options": {
            "host": settings.host,
            "allowInjection": settings.allow_injection,
            "injectTimeoutMs": settings.limits.timeout.map(|t| t.as_millis() as u64),
            "scriptLoopLimit": settings.limits.loop_iterations
        },
        "process": {
            "architecture": std::env::consts::ARCH,
            "platform": std::env::consts::OS,
            "cwd": std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        }
    });
    json_response(StatusCode::OK, &config)
}
