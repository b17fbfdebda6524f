//! Imposter CRUD handlers.

use crate::admin_api::types::*;
use crate::imposter::{Imposter, ImposterConfig, ImposterManager};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// Batch envelope used by `PUT /imposters` and config files
#[derive(Debug, Deserialize)]
pub struct ImpostersEnvelope {
    #[serde(default)]
    pub imposters: Vec<ImposterConfig>,
}

/// Runtime view of an imposter
pub fn imposter_detail(imposter: &Imposter, base_url: &str) -> ImposterDetail {
    let port = imposter.port();
    let config = imposter.to_config();
    let stubs = config
        .stubs
        .into_iter()
        .enumerate()
        .map(|(index, stub)| StubWithLinks {
            stub,
            links: make_stub_links(base_url, port, index),
        })
        .collect();

    ImposterDetail {
        protocol: config.protocol,
        port,
        name: config.name,
        number_of_requests: imposter.get_request_count(),
        record_requests: config.record_requests,
        default_response: config.default_response,
        requests: imposter.get_recorded_requests(),
        stubs,
        links: make_imposter_links(base_url, port),
    }
}

/// POST /imposters - Create a new imposter
pub async fn handle_create(
    req: Request<Incoming>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    let config: ImposterConfig = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid imposter JSON: {e}"),
            )
        }
    };

    match manager.create_imposter(config).await {
        Ok(imposter) => {
            info!("Created imposter on port {}", imposter.port());
            let detail = imposter_detail(&imposter, base_url);
            let location = format!("{}/imposters/{}", base_url, imposter.port());
            let body = serde_json::to_string_pretty(&detail).unwrap_or_else(|_| "{}".to_string());
            build_response_with_headers(
                StatusCode::CREATED,
                [("Content-Type", "application/json"), ("Location", location.as_str())],
                body,
            )
        }
        Err(e) => {
            error!("Failed to create imposter: {}", e);
            imposter_error_response(&e)
        }
    }
}

/// GET /imposters - List all imposters
pub async fn handle_list(
    manager: Arc<ImposterManager>,
    query: Option<&str>,
    base_url: &str,
) -> Response<Full<Bytes>> {
    let params = ImposterQueryParams::parse(query);
    let imposters = manager.list_imposters();

    if params.replayable {
        let configs: Vec<ImposterConfig> = imposters.iter().map(|i| i.to_config()).collect();
        return json_response(StatusCode::OK, &serde_json::json!({ "imposters": configs }));
    }

    let summaries = imposters
        .iter()
        .map(|i| ImposterSummary {
            protocol: i.protocol().to_string(),
            port: i.port(),
            name: i.name().map(str::to_string),
            number_of_requests: i.get_request_count(),
            links: make_imposter_links(base_url, i.port()),
        })
        .collect();

    json_response(
        StatusCode::OK,
        &ListImpostersResponse {
            imposters: summaries,
        },
    )
}

/// PUT /imposters - Replace all imposters
pub async fn handle_replace_all(
    req: Request<Incoming>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    let batch: ImpostersEnvelope = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid batch JSON: {e}"))
        }
    };

    if let Err(e) = manager.replace_all(batch.imposters).await {
        error!("Failed to replace imposters: {}", e);
        return imposter_error_response(&e);
    }

    handle_list(manager, None, base_url).await
}

/// DELETE /imposters - Delete all imposters
pub async fn handle_delete_all(manager: Arc<ImposterManager>) -> Response<Full<Bytes>> {
    let configs = manager.delete_all().await;
    json_response(StatusCode::OK, &serde_json::json!({ "imposters": configs }))
}

/// GET /imposters/:port - Get a specific imposter
pub async fn handle_get(
    port: u16,
    query: Option<&str>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    let params = ImposterQueryParams::parse(query);
    match manager.get_imposter(port) {
        Ok(imposter) if params.replayable => json_response(StatusCode::OK, &imposter.to_config()),
        Ok(imposter) => json_response(StatusCode::OK, &imposter_detail(&imposter, base_url)),
        Err(e) => imposter_error_response(&e),
    }
}

/// DELETE /imposters/:port - Delete a specific imposter.
/// Deleting a missing imposter is not an error.
pub async fn handle_delete(port: u16, manager: Arc<ImposterManager>) -> Response<Full<Bytes>> {
    match manager.delete_imposter(port).await {
        Ok(config) => {
            info!("Deleted imposter on port {}", port);
            json_response(StatusCode::OK, &config)
        }
        Err(_) => json_response(StatusCode::OK, &serde_json::json!({})),
    }
}

/// DELETE /imposters/:port/savedRequests - Clear recorded requests
pub async fn handle_clear_requests(
    port: u16,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    match manager.get_imposter(port) {
        Ok(imposter) => {
            imposter.clear_recorded_requests();
            json_response(StatusCode::OK, &imposter_detail(&imposter, base_url))
        }
        Err(e) => imposter_error_response(&e),
    }
}
