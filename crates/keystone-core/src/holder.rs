//! Request-scoped context holder.
//!
//! Every in-flight request owns exactly one [`RequestContextHolder`]. The
//! holder is installed as a Tokio task-local for the duration of the request
//! future, so concurrent requests never observe each other's context.
//!
//! Teardown runs from a drop guard: it happens when the request future
//! completes, fails, panics, or is dropped by the transport.

use crate::context::ExecutionContext;
use crate::di::{Instance, Token};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

tokio::task_local! {
    static CURRENT: RequestContextHolder;
}

#[derive(Debug, Default)]
struct HolderInner {
    context: RwLock<Option<ExecutionContext>>,
    cache: RwLock<HashMap<Token, Instance>>,
    destroyed: AtomicBool,
}

/// Per-request storage for the current [`ExecutionContext`] and the
/// request-scoped provider cache.
///
/// # Example
///
/// ```
/// use keystone_core::{ExecutionContext, Request, RequestContextHolder};
///
/// # tokio_test::block_on(async {
/// let holder = RequestContextHolder::new();
/// holder.set_context(ExecutionContext::builder(Request::builder().uri("/a").build()).build());
///
/// let path = holder
///     .clone()
///     .scope(async {
///         let current = RequestContextHolder::current().unwrap();
///         current.context().unwrap().request().path().to_string()
///     })
///     .await;
///
/// assert_eq!(path, "/a");
/// assert!(holder.is_destroyed());
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContextHolder {
    inner: Arc<HolderInner>,
}

impl RequestContextHolder {
    /// Creates an empty holder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a holder for the given context.
    #[must_use]
    pub fn with_context(context: ExecutionContext) -> Self {
        let holder = Self::new();
        holder.set_context(context);
        holder
    }

    /// Returns the holder installed for the current task, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Runs `future` with this holder installed as the current holder.
    ///
    /// The holder is destroyed when the future completes or is dropped.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        let _teardown = Teardown(self.clone());
        CURRENT.scope(self, future).await
    }

    /// Sets the execution context.
    pub fn set_context(&self, context: ExecutionContext) {
        *self.inner.context.write() = Some(context);
    }

    /// Returns the execution context.
    #[must_use]
    pub fn context(&self) -> Option<ExecutionContext> {
        self.inner.context.read().clone()
    }

    /// Returns a cached request-scoped instance.
    #[must_use]
    pub fn cached(&self, token: &Token) -> Option<Instance> {
        self.inner.cache.read().get(token).cloned()
    }

    /// Caches a request-scoped instance.
    ///
    /// If another instance was cached for `token` first, that one is kept
    /// and returned.
    pub fn store(&self, token: &Token, instance: Instance) -> Instance {
        Arc::clone(
            self.inner
                .cache
                .write()
                .entry(token.clone())
                .or_insert(instance),
        )
    }

    /// Clears the context and the request cache.
    pub fn destroy(&self) {
        self.inner.context.write().take();
        self.inner.cache.write().clear();
        self.inner.destroyed.store(true, Ordering::Release);
    }

    /// Returns `true` once [`destroy`](Self::destroy) ran.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }
}

struct Teardown(RequestContextHolder);

impl Drop for Teardown {
    fn drop(&mut self) {
        self.0.destroy();
    }
}
