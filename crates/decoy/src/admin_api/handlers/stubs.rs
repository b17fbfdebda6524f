//! Stub management handlers.

use crate::admin_api::handlers::imposters::imposter_detail;
use crate::admin_api::types::{
    collect_body, error_response, imposter_error_response, json_response, make_stub_links,
    AddStubRequest, ReplaceStubsRequest, StubWithLinks,
};
use crate::imposter::{ImposterManager, StubDefinition};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

async fn parse_body<T: DeserializeOwned>(
    req: Request<Incoming>,
    what: &str,
) -> Result<T, Response<Full<Bytes>>> {
    let body = collect_body(req)
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &e))?;
    serde_json::from_slice(&body).map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, &format!("Invalid {what} JSON: {e}"))
    })
}

fn imposter_view(port: u16, base_url: &str, manager: &ImposterManager) -> Response<Full<Bytes>> {
    match manager.get_imposter(port) {
        Ok(imposter) => json_response(StatusCode::OK, &imposter_detail(&imposter, base_url)),
        Err(e) => imposter_error_response(&e),
    }
}

/// POST /imposters/:port/stubs - Add a stub
pub async fn handle_add(
    port: u16,
    req: Request<Incoming>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    let add_req: AddStubRequest = match parse_body(req, "stub").await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match manager.add_stub(port, add_req.stub, add_req.index) {
        Ok(()) => {
            info!(port, index = ?add_req.index, "Added stub");
            imposter_view(port, base_url, &manager)
        }
        Err(e) => imposter_error_response(&e),
    }
}

/// PUT /imposters/:port/stubs - Replace all stubs
pub async fn handle_replace_all(
    port: u16,
    req: Request<Incoming>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    let replace_req: ReplaceStubsRequest = match parse_body(req, "stubs").await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match manager.replace_stubs(port, replace_req.stubs) {
        Ok(()) => imposter_view(port, base_url, &manager),
        Err(e) => imposter_error_response(&e),
    }
}

/// GET /imposters/:port/stubs - List stubs
pub async fn handle_get_all(
    port: u16,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    match manager.get_imposter(port) {
        Ok(imposter) => {
            let stubs: Vec<StubWithLinks> = imposter
                .get_stubs()
                .into_iter()
                .enumerate()
                .map(|(index, stub)| StubWithLinks {
                    stub,
                    links: make_stub_links(base_url, port, index),
                })
                .collect();
            json_response(StatusCode::OK, &serde_json::json!({ "stubs": stubs }))
        }
        Err(e) => imposter_error_response(&e),
    }
}

/// GET /imposters/:port/stubs/:index - Get one stub
pub async fn handle_get(
    port: u16,
    index: usize,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    match manager.get_stub(port, index) {
        Ok(stub) => json_response(
            StatusCode::OK,
            &StubWithLinks {
                stub,
                links: make_stub_links(base_url, port, index),
            },
        ),
        Err(e) => imposter_error_response(&e),
    }
}

/// PUT /imposters/:port/stubs/:index - Replace one stub
pub async fn handle_replace(
    port: u16,
    index: usize,
    req: Request<Incoming>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    let stub: StubDefinition = match parse_body(req, "stub").await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match manager.replace_stub(port, index, stub) {
        Ok(()) => imposter_view(port, base_url, &manager),
        Err(e) => imposter_error_response(&e),
    }
}

/// DELETE /imposters/:port/stubs/:index - Delete one stub
pub async fn handle_delete(
    port: u16,
    index: usize,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    match manager.delete_stub(port, index) {
        Ok(_) => {
            info!(port, index, "Deleted stub");
            imposter_view(port, base_url, &manager)
        }
        Err(e) => imposter_error_response(&e),
    }
}
