//! Middleware execution for one request.

use crate::enhancer::{dedup, resolve_all};
use crate::middleware::Next;
use crate::registry::MiddlewareRegistry;
use crate::Continuation;
use keystone_core::{Container, KeystoneError, Reply, Request, Response};
use std::sync::Arc;

/// Runs the middleware matching one request around a terminal
/// continuation.
///
/// Matching entries are de-duplicated by identity, so middleware registered
/// twice for the same route runs once. With no match the terminal runs
/// directly.
pub struct MiddlewareExecutor<'a> {
    registry: &'a MiddlewareRegistry,
    container: &'a Container,
    request: Arc<Request>,
    response: Response,
    terminal: Continuation,
}

impl<'a> MiddlewareExecutor<'a> {
    /// Creates an executor for `request`.
    #[must_use]
    pub fn new(
        registry: &'a MiddlewareRegistry,
        container: &'a Container,
        request: Arc<Request>,
        response: Response,
        terminal: Continuation,
    ) -> Self {
        Self {
            registry,
            container,
            request,
            response,
            terminal,
        }
    }

    /// Runs the chain.
    ///
    /// A middleware reference that cannot be resolved is a configuration
    /// error.
    pub async fn execute(self) -> Result<Reply, KeystoneError> {
        let matched = self
            .registry
            .matching(self.request.method(), self.request.path())?;
        if matched.is_empty() {
            return (self.terminal)().await;
        }

        let matched = dedup(matched);
        let chain = resolve_all(&matched, self.container).await?;
        tracing::trace!(
            path = self.request.path(),
            middleware = chain.len(),
            "Executing middleware"
        );
        Next::new(chain.into(), self.request, self.response, self.terminal)
            .run()
            .await
    }
}
