//! Execution context types.
//!
//! The [`ExecutionContext`] is an immutable snapshot of one in-flight handler
//! call. It is created once per request by the router and read by every
//! pipeline stage: guards, interceptors, middleware and exception filters.

use crate::di::Token;
use crate::request::Request;
use crate::response::Response;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it ideal for request tracking
/// and log correlation.
///
/// # Example
///
/// ```
/// use keystone_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[derive(Debug)]
struct ContextInner {
    adapter: Arc<str>,
    module: Option<Arc<str>>,
    class: Option<Token>,
    handler: Arc<str>,
    route: Option<Arc<str>>,
    request: Arc<Request>,
    response: Response,
    request_id: RequestId,
    started_at: Instant,
}

/// Snapshot of {adapter, module, controller, handler, request, response} for
/// one in-flight call.
///
/// Cloning is cheap: every clone shares the same snapshot.
///
/// # Example
///
/// ```
/// use keystone_core::{ExecutionContext, Request, Token};
///
/// struct UsersController;
///
/// let ctx = ExecutionContext::builder(Request::builder().uri("/users").build())
///     .adapter("memory")
///     .module("users")
///     .class(Token::of::<UsersController>())
///     .handler("list")
///     .build();
///
/// assert_eq!(ctx.handler(), "list");
/// assert_eq!(ctx.switch_to_http().request().path(), "/users");
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    /// Creates a builder for a context serving `request`.
    #[must_use]
    pub fn builder(request: Request) -> ExecutionContextBuilder {
        ExecutionContextBuilder {
            adapter: Arc::from("unknown"),
            module: None,
            class: None,
            handler: Arc::from("anonymous"),
            route: None,
            request,
            response: None,
            request_id: None,
        }
    }

    /// Returns the name of the transport adapter serving this request.
    #[must_use]
    pub fn adapter(&self) -> &str {
        &self.inner.adapter
    }

    /// Returns the owning module, if any.
    #[must_use]
    pub fn module(&self) -> Option<&str> {
        self.inner.module.as_deref()
    }

    /// Returns the controller token, if the handler is a controller action.
    #[must_use]
    pub fn class(&self) -> Option<&Token> {
        self.inner.class.as_ref()
    }

    /// Returns the handler (action) name.
    #[must_use]
    pub fn handler(&self) -> &str {
        &self.inner.handler
    }

    /// Returns the matched route pattern.
    #[must_use]
    pub fn route(&self) -> Option<&str> {
        self.inner.route.as_deref()
    }

    /// Returns the request.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Returns a shared handle to the request.
    #[must_use]
    pub fn request_arc(&self) -> Arc<Request> {
        Arc::clone(&self.inner.request)
    }

    /// Returns the response.
    #[must_use]
    pub fn response(&self) -> &Response {
        &self.inner.response
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.inner.request_id
    }

    /// Returns the time elapsed since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Returns the HTTP view of this context.
    #[must_use]
    pub fn switch_to_http(&self) -> HttpArguments<'_> {
        HttpArguments { context: self }
    }
}

/// HTTP view over an [`ExecutionContext`].
#[derive(Debug, Clone, Copy)]
pub struct HttpArguments<'a> {
    context: &'a ExecutionContext,
}

impl<'a> HttpArguments<'a> {
    /// Returns the request.
    #[must_use]
    pub fn request(&self) -> &'a Request {
        self.context.request()
    }

    /// Returns the response.
    #[must_use]
    pub fn response(&self) -> &'a Response {
        self.context.response()
    }
}

/// Builder for [`ExecutionContext`].
#[derive(Debug)]
pub struct ExecutionContextBuilder {
    adapter: Arc<str>,
    module: Option<Arc<str>>,
    class: Option<Token>,
    handler: Arc<str>,
    route: Option<Arc<str>>,
    request: Request,
    response: Option<Response>,
    request_id: Option<RequestId>,
}

impl ExecutionContextBuilder {
    /// Sets the adapter name.
    #[must_use]
    pub fn adapter(mut self, adapter: impl Into<Arc<str>>) -> Self {
        self.adapter = adapter.into();
        self
    }

    /// Sets the owning module.
    #[must_use]
    pub fn module(mut self, module: impl Into<Arc<str>>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Sets the owning module, if any.
    #[must_use]
    pub fn maybe_module(mut self, module: Option<Arc<str>>) -> Self {
        self.module = module;
        self
    }

    /// Sets the controller token.
    #[must_use]
    pub fn class(mut self, class: Token) -> Self {
        self.class = Some(class);
        self
    }

    /// Sets the controller token, if any.
    #[must_use]
    pub fn maybe_class(mut self, class: Option<Token>) -> Self {
        self.class = class;
        self
    }

    /// Sets the handler name.
    #[must_use]
    pub fn handler(mut self, handler: impl Into<Arc<str>>) -> Self {
        self.handler = handler.into();
        self
    }

    /// Sets the matched route pattern.
    #[must_use]
    pub fn route(mut self, route: impl Into<Arc<str>>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Uses an existing response handle.
    #[must_use]
    pub fn response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    /// Sets the request ID.
    #[must_use]
    pub const fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            inner: Arc::new(ContextInner {
                adapter: self.adapter,
                module: self.module,
                class: self.class,
                handler: self.handler,
                route: self.route,
                request: Arc::new(self.request),
                response: self.response.unwrap_or_default(),
                request_id: self.request_id.unwrap_or_default(),
                started_at: Instant::now(),
            }),
        }
    }
}
