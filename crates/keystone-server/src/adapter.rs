//! The transport adapter boundary.
//!
//! The router never talks to a socket. It registers one [`RouteHandler`]
//! per method and path on an [`HttpAdapter`], and hands the adapter every
//! outcome the pipeline could not turn into a reply. [`RouteAdapter`] is
//! the adapter shipped with Keystone: an in-memory route table that the
//! hyper [`Server`](crate::Server) and the test client both dispatch into.

use crate::error::PipelineError;
use crate::normalize::write_envelope;
use crate::route::RouteTable;
use bytes::Bytes;
use http::Method;
use http_body_util::Full;
use keystone_core::{BoxFuture, KeystoneError, Request, Response};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Message sent for requests no route matched.
pub const NOT_FOUND_MESSAGE: &str =
    "Sorry, but the page you are looking for has not been found or temporarily unavailable.";

/// Header carrying the request id on every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Serves one route.
///
/// `Err` means the pipeline ended without a reply; the adapter renders it
/// with [`HttpAdapter::fallback`].
pub type RouteHandler = Arc<
    dyn Fn(Request, Response) -> BoxFuture<'static, Result<Response, PipelineError>> + Send + Sync,
>;

/// Describes a registered route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    /// Full path pattern, prefix included.
    pub path: String,
    /// HTTP method.
    pub method: String,
    /// Action or callback name.
    pub action: String,
    /// Controller token, for controller routes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    /// Owning module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// A transport the router registers routes on.
pub trait HttpAdapter: Send + Sync + 'static {
    /// Returns the adapter name, recorded in every execution context.
    fn name(&self) -> &str;

    /// Registers `handler` for `method` and `path`.
    fn register(
        &self,
        method: Method,
        path: &str,
        handler: RouteHandler,
        info: RouteInfo,
    ) -> Result<(), KeystoneError>;

    /// Installs the handler for requests no route matched.
    fn set_not_found(&self, handler: RouteHandler);

    /// Renders an outcome the pipeline did not answer.
    fn fallback(&self, error: PipelineError, response: &Response) -> Response {
        render_error(error, response)
    }
}

/// Writes the error envelope for `error` into `response`.
///
/// The structured trace is attached when the outcome carries one.
pub fn render_error(error: PipelineError, response: &Response) -> Response {
    let trace = error.trace().cloned();
    let error = error.into_error();
    let request_id = response.header_value(REQUEST_ID_HEADER);
    let mut envelope = error.to_envelope(request_id.as_deref());
    if let Some(trace) = trace {
        envelope = envelope.with_trace(trace);
    }
    write_envelope(response, &error, envelope);
    response.clone()
}

struct RouteEntry {
    handler: RouteHandler,
    info: RouteInfo,
}

/// In-memory adapter backed by a [`RouteTable`].
#[derive(Default)]
pub struct RouteAdapter {
    routes: RwLock<RouteTable<RouteEntry>>,
    not_found: RwLock<Option<RouteHandler>>,
}

impl RouteAdapter {
    /// Creates an adapter with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registered routes in order.
    #[must_use]
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.routes
            .read()
            .entries()
            .map(|(_, _, entry)| entry.info.clone())
            .collect()
    }

    /// Routes `request` and renders the result.
    pub async fn dispatch(&self, request: Request) -> http::Response<Full<Bytes>> {
        let matched = {
            let routes = self.routes.read();
            routes
                .match_route(request.method(), request.path())
                .map(|found| (Arc::clone(&found.value.handler), found.params))
        };

        let (handler, request) = match matched {
            Some((handler, params)) => (Some(handler), request.with_params(params)),
            None => (self.not_found.read().clone(), request),
        };

        let response = Response::new();
        let outcome = match handler {
            Some(handler) => handler(request, response.clone()).await,
            None => {
                tracing::debug!(
                    http.method = %request.method(),
                    http.path = request.path(),
                    "No route matched"
                );
                Err(PipelineError::failed(KeystoneError::not_found(NOT_FOUND_MESSAGE)))
            }
        };

        match outcome {
            Ok(response) => response.to_http(),
            Err(error) => self.fallback(error, &response).to_http(),
        }
    }
}

impl HttpAdapter for RouteAdapter {
    fn name(&self) -> &str {
        "keystone"
    }

    fn register(
        &self,
        method: Method,
        path: &str,
        handler: RouteHandler,
        info: RouteInfo,
    ) -> Result<(), KeystoneError> {
        let mut routes = self.routes.write();
        let duplicate = routes
            .entries()
            .any(|(existing, pattern, _)| *existing == method && pattern == path);
        if duplicate {
            return Err(KeystoneError::configuration(format!(
                "Route {method} {path} is already registered"
            )));
        }
        tracing::debug!(
            http.method = %method,
            http.path = path,
            action = %info.action,
            "Route registered"
        );
        routes.add(method, path, RouteEntry { handler, info });
        Ok(())
    }

    fn set_not_found(&self, handler: RouteHandler) {
        *self.not_found.write() = Some(handler);
    }
}

impl std::fmt::Debug for RouteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteAdapter")
            .field("routes", &self.routes.read().len())
            .field("not_found", &self.not_found.read().is_some())
            .finish()
    }
}
