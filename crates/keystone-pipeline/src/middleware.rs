//! Core middleware trait and types.
//!
//! Middleware wraps the handler invocation for the routes it is registered
//! on (see [`MiddlewareRegistry`](crate::MiddlewareRegistry)). Each
//! middleware receives the request, the shared response writer and a
//! [`Next`] continuation.
//!
//! # Example
//!
//! ```
//! use keystone_core::{BoxFuture, KeystoneError, Reply, Request, Response};
//! use keystone_pipeline::{Middleware, Next};
//!
//! struct PoweredBy;
//!
//! impl Middleware for PoweredBy {
//!     fn handle<'a>(
//!         &'a self,
//!         _request: &'a Request,
//!         response: &'a Response,
//!         next: Next,
//!     ) -> BoxFuture<'a, Result<Reply, KeystoneError>> {
//!         Box::pin(async move {
//!             response.header("x-powered-by", "keystone");
//!             next.run().await
//!         })
//!     }
//! }
//! ```

use crate::enhancer::Enhancer;
use crate::Continuation;
use keystone_core::di::short_type_name;
use keystone_core::{BoxFuture, Instance, KeystoneError, Reply, Request, Response, Token};
use std::any::TypeId;
use std::future::Future;
use std::sync::Arc;

/// The middleware trait.
///
/// # Invariants
///
/// - Middleware SHOULD call `next.run()` at most once
/// - Returning without calling `next` short-circuits the route
/// - Errors from downstream are visible to the middleware before they
///   reach the exception filters
pub trait Middleware: Send + Sync + 'static {
    /// Returns the middleware name, for logging.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Processes the request.
    fn handle<'a>(
        &'a self,
        request: &'a Request,
        response: &'a Response,
        next: Next,
    ) -> BoxFuture<'a, Result<Reply, KeystoneError>>;
}

/// Continuation to the next middleware in the chain.
///
/// The chain is an ordered slice plus a position; the last position runs
/// the terminal continuation.
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    request: Arc<Request>,
    response: Response,
    terminal: Continuation,
}

impl Next {
    /// Creates the continuation for the start of `chain`.
    pub(crate) fn new(
        chain: Arc<[Arc<dyn Middleware>]>,
        request: Arc<Request>,
        response: Response,
        terminal: Continuation,
    ) -> Self {
        Self {
            chain,
            index: 0,
            request,
            response,
            terminal,
        }
    }

    /// Invokes the next middleware, or the terminal continuation after the
    /// last one.
    ///
    /// This consumes `self` so it can only be called once.
    pub async fn run(self) -> Result<Reply, KeystoneError> {
        let Some(middleware) = self.chain.get(self.index).cloned() else {
            return (self.terminal)().await;
        };
        let request = Arc::clone(&self.request);
        let response = self.response.clone();
        let next = Self {
            index: self.index + 1,
            ..self
        };
        tracing::trace!(middleware = middleware.name(), "Running middleware");
        middleware.handle(&request, &response, next).await
    }

    /// Stops the chain with `error`.
    ///
    /// Every middleware still waiting on its continuation observes the
    /// error before it reaches error handling.
    pub fn error(self, error: KeystoneError) -> Result<Reply, KeystoneError> {
        tracing::debug!(
            position = self.index,
            error = %error,
            "Middleware chain stopped with error"
        );
        Err(error)
    }

    /// Returns the position of the next middleware.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

/// A middleware built from an async function.
///
/// # Example
///
/// ```
/// use keystone_core::{Request, Response};
/// use keystone_pipeline::{FnMiddleware, Middleware, Next};
/// use std::sync::Arc;
///
/// let middleware = FnMiddleware::new("timing", |_: Arc<Request>, _: Response, next: Next| async move {
///     let started = std::time::Instant::now();
///     let reply = next.run().await;
///     tracing::debug!(elapsed = ?started.elapsed(), "request took");
///     reply
/// });
/// assert_eq!(middleware.name(), "timing");
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F> {
    /// Creates a new function-based middleware.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Arc<Request>, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, KeystoneError>> + Send + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn handle<'a>(
        &'a self,
        _request: &'a Request,
        response: &'a Response,
        next: Next,
    ) -> BoxFuture<'a, Result<Reply, KeystoneError>> {
        let request = Arc::clone(&next.request);
        Box::pin((self.func)(request, response.clone(), next))
    }
}

/// A reference to a middleware.
pub type MiddlewareRef = Enhancer<dyn Middleware>;

impl Enhancer<dyn Middleware> {
    /// Wraps a middleware instance.
    ///
    /// Middleware is identified by its type, so two separately built
    /// instances of `M` on the same route run once.
    #[must_use]
    pub fn middleware<M: Middleware>(middleware: M) -> Self {
        Self::Implementation {
            instance: Arc::new(middleware),
            type_id: TypeId::of::<M>(),
            label: std::any::type_name::<M>(),
        }
    }

    /// Wraps an async function.
    ///
    /// The function type and `name` identify the middleware, so passing the
    /// same function under the same name twice runs it once.
    #[must_use]
    pub fn from_fn<F, Fut>(name: &'static str, func: F) -> Self
    where
        F: Fn(Arc<Request>, Response, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, KeystoneError>> + Send + 'static,
    {
        Self::Implementation {
            instance: Arc::new(FnMiddleware::new(name, func)),
            type_id: TypeId::of::<F>(),
            label: name,
        }
    }

    /// References middleware `M`, resolved through the container.
    #[must_use]
    pub fn provider<M: Middleware>() -> Self {
        Self::from_token::<M>(Token::of::<M>())
    }

    /// References middleware `M` registered under `token`.
    #[must_use]
    pub fn from_token<M: Middleware>(token: Token) -> Self {
        Self::Provider {
            token,
            cast: |instance: Instance| {
                instance
                    .downcast::<M>()
                    .ok()
                    .map(|middleware| middleware as Arc<dyn Middleware>)
            },
            kind: "middleware",
        }
    }
}
