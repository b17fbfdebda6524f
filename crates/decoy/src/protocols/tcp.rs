//! Raw TCP adapter. Every read from the socket is one request; a non-empty
//! response payload is written back on the same connection.

use crate::imposter::ImposterManager;
use crate::model::{BodyMode, Request};
use base64::Engine;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const READ_BUFFER: usize = 64 * 1024;

pub async fn serve(
    mut stream: TcpStream,
    client: SocketAddr,
    port: u16,
    mode: BodyMode,
    manager: Arc<ImposterManager>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let read = tokio::select! {
            read = stream.read(&mut buf) => read,
            _ = shutdown.recv() => break,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("TCP read error on port {}: {}", port, e);
                break;
            }
        };

        let request = Request::tcp(encode_payload(&buf[..n], mode), client);
        let response = match manager.dispatch(port, request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Dispatch failed on port {}: {}", port, e);
                break;
            }
        };

        let payload = decode_payload(&response.body, response.mode);
        if payload.is_empty() {
            continue;
        }
        if let Err(e) = stream.write_all(&payload).await {
            debug!("TCP write error on port {}: {}", port, e);
            break;
        }
    }
}

/// Bytes from the wire to the string carried in `request.data`.
pub fn encode_payload(bytes: &[u8], mode: BodyMode) -> String {
    match mode {
        BodyMode::Text => String::from_utf8_lossy(bytes).into_owned(),
        BodyMode::Binary => base64::engine::general_purpose::STANDARD.encode(bytes),
    }
}

/// Response `data` back to wire bytes.
pub fn decode_payload(data: &str, mode: BodyMode) -> Vec<u8> {
    match mode {
        BodyMode::Text => data.as_bytes().to_vec(),
        BodyMode::Binary => base64::engine::general_purpose::STANDARD
            .decode(data)
            .unwrap_or_else(|e| {
                warn!("Binary response is not valid base64 ({}), sending as text", e);
                data.as_bytes().to_vec()
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_payload() {
        assert_eq!(encode_payload(b"ping", BodyMode::Text), "ping");
        assert_eq!(decode_payload("pong", BodyMode::Text), b"pong".to_vec());
    }

    #[test]
    fn test_binary_payload() {
        assert_eq!(encode_payload(&[0, 1, 2], BodyMode::Binary), "AAEC");
        assert_eq!(decode_payload("AAEC", BodyMode::Binary), vec![0, 1, 2]);
        assert_eq!(decode_payload("%%%", BodyMode::Binary), b"%%%".to_vec());
    }
}
