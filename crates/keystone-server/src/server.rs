//! The hyper-backed HTTP server.
//!
//! Accepts HTTP/1.1 connections, reads each body under a size limit,
//! and dispatches into a [`RouteAdapter`]. Shutdown stops the accept loop,
//! then waits up to the configured timeout for open connections.
//!
//! ```rust,ignore
//! use keystone_server::{RouteAdapter, Server, ServerConfig};
//! use std::sync::Arc;
//!
//! let adapter = Arc::new(RouteAdapter::new());
//! // ... register routes through a RouterProxy ...
//! Server::new(ServerConfig::default(), adapter).run().await?;
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use keystone_core::{KeystoneError, Request, Response};
use tokio::net::{TcpListener, TcpStream};

use crate::adapter::{render_error, RouteAdapter};
use crate::config::ServerConfig;
use crate::error::{PipelineError, ServerError};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Response type written to the connection.
pub type HttpResponse = http::Response<Full<Bytes>>;

/// The Keystone HTTP server.
pub struct Server {
    config: ServerConfig,
    adapter: Arc<RouteAdapter>,
}

impl Server {
    /// Creates a server dispatching into `adapter`.
    #[must_use]
    pub fn new(config: ServerConfig, adapter: Arc<RouteAdapter>) -> Self {
        Self { config, adapter }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the configured address and serves until SIGTERM or SIGINT.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals()).await
    }

    /// Binds the configured address and serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr = self.config.socket_addr().map_err(|e| {
            ServerError::BindError(format!("Invalid address '{}': {e}", self.config.http_addr()))
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {addr}: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from an already-bound listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "Server listening");

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let server = Arc::clone(&server);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            let served = server.handle_connection(stream, remote, shutdown).await;
                            if let Err(e) = served {
                                tracing::debug!(remote = %remote, error = %e, "Connection error");
                            }
                            drop(token);
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to accept connection"),
                },
                () = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        let timeout = server.config.shutdown_timeout();
        tracing::info!(
            timeout_secs = timeout.as_secs(),
            connections = tracker.active_connections(),
            "Waiting for open connections"
        );
        tokio::select! {
            () = tracker.wait_for_idle() => tracing::info!("All connections closed"),
            () = tokio::time::sleep(timeout) => tracing::warn!(
                connections = tracker.active_connections(),
                "Shutdown timeout reached"
            ),
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<(), hyper::Error> {
        let server = Arc::clone(self);
        let service = service_fn(move |req: http::Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle_request(req).await) }
        });

        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);
        tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                tracing::debug!(remote = %remote, "Closing connection for shutdown");
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        }
    }

    async fn handle_request(&self, req: http::Request<Incoming>) -> HttpResponse {
        let timeout = self.config.request_timeout();
        let (parts, body) = req.into_parts();

        let collected = tokio::time::timeout(
            timeout,
            Limited::new(body, self.config.max_body_bytes()).collect(),
        )
        .await;
        let body = match collected {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) => {
                let error = if e.is::<http_body_util::LengthLimitError>() {
                    KeystoneError::bad_request("Request body too large")
                        .with_status(StatusCode::PAYLOAD_TOO_LARGE)
                } else {
                    KeystoneError::bad_request(format!("Failed to read request body: {e}"))
                };
                return reject(error);
            }
            Err(_) => {
                return reject(
                    KeystoneError::timeout("Request body collection timed out")
                        .with_status(StatusCode::REQUEST_TIMEOUT),
                )
            }
        };

        let request = Request::from_http(http::Request::from_parts(parts, body));
        let method = request.method().clone();
        let path = request.path().to_string();
        match tokio::time::timeout(timeout, self.adapter.dispatch(request)).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!(http.method = %method, http.path = %path, "Request timed out");
                reject(KeystoneError::timeout("Request timed out"))
            }
        }
    }
}

fn reject(error: KeystoneError) -> HttpResponse {
    render_error(PipelineError::failed(error), &Response::new()).to_http()
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("adapter", &self.adapter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_renders_envelope() {
        let response = reject(
            KeystoneError::bad_request("Request body too large")
                .with_status(StatusCode::PAYLOAD_TOO_LARGE),
        );
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_invalid_address_is_bind_error() {
        let server = Server::new(
            ServerConfig::builder().http_addr("nowhere").build(),
            Arc::new(RouteAdapter::new()),
        );
        let result = tokio_test::block_on(server.run_with_shutdown(ShutdownSignal::new()));
        assert!(matches!(result, Err(ServerError::BindError(_))));
    }
}
