//! WebSocket server lifecycle.
//!
//! Binds the listener, checks the handshake path, hands each connection to
//! its own task and closes the gateway on shutdown. In-flight connections are
//! not drained.

use crate::connection::serve_connection;
use crate::ServerError;
use sg_gateway::DatabaseGateway;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::ORIGIN, StatusCode};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_PORT: u16 = 1338;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub addr: SocketAddr,
    /// Request path WebSocket clients must connect to.
    pub base_path: String,
    /// Abort a connection's running queries when it closes.
    pub cancel_on_disconnect: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            base_path: "/".to_string(),
            cancel_on_disconnect: true,
        }
    }
}

/// The bridge's WebSocket server.
pub struct BridgeServer {
    listener: TcpListener,
    config: ServerConfig,
    gateway: Arc<DatabaseGateway>,
}

impl BridgeServer {
    /// Binds the listening socket.
    pub async fn bind(
        gateway: Arc<DatabaseGateway>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.addr,
                source,
            })?;
        info!("Server is listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config,
            gateway,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the shared gateway.
    pub fn gateway(&self) -> Arc<DatabaseGateway> {
        self.gateway.clone()
    }

    /// Accepts connections until `shutdown` resolves, then closes the gateway.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let base_path: Arc<str> = normalize_path(&self.config.base_path).into();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Gracefully shutting down...");
                    self.gateway.close().await;
                    return Ok(());
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let gateway = self.gateway.clone();
                        let base_path = base_path.clone();
                        let cancel = self.config.cancel_on_disconnect;
                        let span = info_span!("connection", id = %Uuid::new_v4(), peer = %addr);

                        tokio::spawn(
                            async move {
                                if let Err(e) =
                                    accept_connection(stream, addr, &base_path, gateway, cancel).await
                                {
                                    warn!("Connection error from {}: {}", addr, e);
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
        }
    }
}

/// Completes the handshake and serves the connection.
async fn accept_connection(
    stream: TcpStream,
    peer: SocketAddr,
    base_path: &str,
    gateway: Arc<DatabaseGateway>,
    cancel_on_disconnect: bool,
) -> Result<(), ServerError> {
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        check_handshake(request, response, base_path, peer)
    })
    .await?;
    info!("Connection accepted from {}", peer);

    serve_connection(ws, peer, gateway, cancel_on_disconnect).await
}

/// Only upgrades requests for the configured path; the query string is
/// ignored. Origins are logged but not restricted.
fn check_handshake(
    request: &Request,
    response: Response,
    base_path: &str,
    peer: SocketAddr,
) -> Result<Response, ErrorResponse> {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");
    info!("Connection requested from {} at origin '{}'", peer, origin);

    let path = request.uri().path();
    if path != base_path {
        warn!("Rejecting {}: no WebSocket endpoint at {}", peer, path);
        let mut rejection = ErrorResponse::new(Some(format!("no WebSocket endpoint at {}", path)));
        *rejection.status_mut() = StatusCode::NOT_FOUND;
        return Err(rejection);
    }

    Ok(response)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
