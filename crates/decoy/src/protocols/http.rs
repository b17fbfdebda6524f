//! HTTP(S) adapter.

use crate::admin_api::types::{build_response, build_response_with_headers};
use crate::imposter::ImposterManager;
use crate::model::{parse_query_string, BodyMode, Protocol, Request, Response};
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Serve one HTTP/1.1 connection until the client closes it or the imposter
/// shuts down.
pub async fn serve<I>(
    io: I,
    client: SocketAddr,
    port: u16,
    protocol: Protocol,
    manager: Arc<ImposterManager>,
    mut shutdown: broadcast::Receiver<()>,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let manager = Arc::clone(&manager);
        async move { handle(req, client, port, protocol, manager).await }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!("Connection error on port {}: {}", port, e);
            }
        }
        _ = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!("Connection error during shutdown on port {}: {}", port, e);
            }
        }
    }
}

async fn handle(
    req: hyper::Request<Incoming>,
    client: SocketAddr,
    port: u16,
    protocol: Protocol,
    manager: Arc<ImposterManager>,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let request = match to_canonical(req, protocol, client).await {
        Ok(request) => request,
        Err(e) => {
            debug!("Failed to read request body on port {}: {}", port, e);
            return Ok(build_response(StatusCode::BAD_REQUEST, "Invalid request body"));
        }
    };

    match manager.dispatch(port, request).await {
        Ok(response) => Ok(to_http_response(&response)),
        Err(e) => {
            debug!("Dispatch failed on port {}: {}", port, e);
            Ok(build_response_with_headers(
                StatusCode::SERVICE_UNAVAILABLE,
                [("connection", "close")],
                e.to_string(),
            ))
        }
    }
}

/// Decode a hyper request into the canonical model.
pub async fn to_canonical(
    req: hyper::Request<Incoming>,
    protocol: Protocol,
    client: SocketAddr,
) -> Result<Request, hyper::Error> {
    let (parts, body) = req.into_parts();
    let query = parts
        .uri
        .query()
        .map(parse_query_string)
        .unwrap_or_default();

    let mut request = Request::http(protocol, parts.method.as_str(), parts.uri.path(), client)
        .with_query(query);
    for (name, value) in &parts.headers {
        request = request.with_header(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
    }

    let bytes = body.collect().await?.to_bytes();
    let body = if bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&bytes).into_owned())
    };
    Ok(request.with_body(body))
}

/// Encode a canonical response. Binary-mode bodies are base64 on the model side.
pub fn to_http_response(response: &Response) -> hyper::Response<Full<Bytes>> {
    let status = StatusCode::from_u16(response.status_code).unwrap_or_else(|_| {
        warn!(status = response.status_code, "Invalid status code, sending 500");
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let body = match response.mode {
        BodyMode::Text => Bytes::from(response.body.clone()),
        BodyMode::Binary => match base64::engine::general_purpose::STANDARD.decode(&response.body) {
            Ok(decoded) => Bytes::from(decoded),
            Err(e) => {
                warn!("Binary body is not valid base64 ({}), sending as text", e);
                Bytes::from(response.body.clone())
            }
        },
    };

    let headers = response
        .headers
        .iter()
        .filter(|(name, _)| {
            let valid = hyper::header::HeaderName::from_bytes(name.as_bytes()).is_ok();
            if !valid {
                warn!(header = %name, "Dropping invalid response header");
            }
            valid
        })
        .filter(|(name, _)| !name.eq_ignore_ascii_case("content-length"));

    build_response_with_headers(status, headers, body)
}
