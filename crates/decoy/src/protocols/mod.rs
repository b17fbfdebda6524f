//! Wire adapters. Each decodes inbound traffic into a canonical
//! [`Request`](crate::model::Request), dispatches it through the
//! [`ImposterManager`] and encodes the answer.
//!
//! - `http` - HTTP/1.1 over plain TCP or TLS
//! - `tls` - rustls acceptor construction for https imposters
//! - `tcp` - raw TCP, one request per read

pub mod http;
pub mod tcp;
pub mod tls;

use crate::imposter::ImposterManager;
use crate::model::{BodyMode, Protocol};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// Everything a listener needs to serve one imposter.
#[derive(Clone)]
pub struct ListenerSpec {
    pub port: u16,
    pub protocol: Protocol,
    pub mode: BodyMode,
    pub tls: Option<TlsAcceptor>,
}

/// Start the accept loop for an imposter. The loop, and with it the bound
/// port, ends when `shutdown` fires; open connections are asked to finish
/// their current request and close.
pub fn spawn_listener(
    listener: TcpListener,
    spec: ListenerSpec,
    manager: Arc<ImposterManager>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let port = spec.port;
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let spec = spec.clone();
                            let manager = Arc::clone(&manager);
                            let conn_shutdown = shutdown.resubscribe();
                            tokio::spawn(async move {
                                serve_connection(stream, addr, spec, manager, conn_shutdown).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error on port {}: {}", port, e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Imposter on port {} shutting down", port);
                    break;
                }
            }
        }
    })
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    spec: ListenerSpec,
    manager: Arc<ImposterManager>,
    shutdown: broadcast::Receiver<()>,
) {
    match (spec.protocol, spec.tls) {
        (Protocol::Tcp, _) => {
            tcp::serve(stream, addr, spec.port, spec.mode, manager, shutdown).await;
        }
        (Protocol::Https, Some(acceptor)) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                http::serve(
                    TokioIo::new(tls_stream),
                    addr,
                    spec.port,
                    Protocol::Https,
                    manager,
                    shutdown,
                )
                .await;
            }
            Err(e) => debug!("TLS handshake failed on port {}: {}", spec.port, e),
        },
        (Protocol::Https, None) => {
            error!("https imposter on port {} has no TLS acceptor", spec.port);
        }
        (Protocol::Http, _) => {
            http::serve(
                TokioIo::new(stream),
                addr,
                spec.port,
                Protocol::Http,
                manager,
                shutdown,
            )
            .await;
        }
    }
}
