//! # Keystone Server
//!
//! Router orchestrator and HTTP transport for the Keystone framework.
//!
//! This crate turns the pipeline stages of `keystone-pipeline` into a
//! running server:
//!
//! - [`RouterProxy`] - Maps controllers onto an adapter and runs every
//!   request through guards, interceptors, middleware, the handler and
//!   exception filters
//! - [`ResponseNormalizer`] - Turns handler replies into responses
//! - [`HttpAdapter`] / [`RouteAdapter`] - The transport boundary and its
//!   in-memory route table
//! - [`Server`] - HTTP/1.1 via Hyper with graceful shutdown
//!
//! ## Example
//!
//! ```rust,ignore
//! use keystone_server::{ControllerDef, RouteAdapter, RouterConfig, RouterProxy, Server, ServerConfig};
//! use std::sync::Arc;
//!
//! let adapter = Arc::new(RouteAdapter::new());
//! let router = RouterProxy::new(adapter.clone(), container, metadata, middleware, RouterConfig::default());
//! router.apply_routes(&[ControllerDef::new::<UsersController>("/users").get("/", "list")])?;
//! router.install_not_found();
//!
//! Server::new(ServerConfig::default(), adapter).run().await?;
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod adapter;
mod config;
mod error;
mod normalize;
mod route;
mod router;
mod server;
mod shutdown;

pub use adapter::{
    render_error, HttpAdapter, RouteAdapter, RouteHandler, RouteInfo, NOT_FOUND_MESSAGE,
    REQUEST_ID_HEADER,
};
pub use config::{
    RouterConfig, RouterConfigBuilder, ServerConfig, ServerConfigBuilder, DEFAULT_HTTP_ADDR,
    DEFAULT_MAX_BODY_BYTES, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
    DEFAULT_SOURCE_CONTEXT_LINES,
};
pub use error::{PipelineError, ServerError, INVALID_REQUEST_MESSAGE};
pub use normalize::ResponseNormalizer;
pub use route::{RouteMatch, RouteTable};
pub use router::{Callback, ControllerDef, RouteDef, RouteTarget, RouterProxy};
pub use server::{HttpResponse, Server};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
