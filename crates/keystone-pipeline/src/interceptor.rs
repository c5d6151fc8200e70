//! Interceptors.
//!
//! Interceptors wrap the rest of the pipeline. Each one receives a
//! [`CallHandler`] for "everything after me" and decides whether, when and
//! how many times to run it. The chain is index-based: interceptor `i`'s
//! handler runs interceptor `i + 1`, and the last handler runs the terminal
//! continuation.

use crate::enhancer::Enhancer;
use crate::Continuation;
use keystone_core::di::short_type_name;
use keystone_core::{BoxFuture, ExecutionContext, Instance, KeystoneError, Reply, Token};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Wraps the remainder of the pipeline.
///
/// # Example
///
/// ```
/// use keystone_core::{BoxFuture, ExecutionContext, KeystoneError, Reply};
/// use keystone_pipeline::{CallHandler, Interceptor};
///
/// struct Timing;
///
/// impl Interceptor for Timing {
///     fn intercept<'a>(
///         &'a self,
///         ctx: &'a ExecutionContext,
///         next: CallHandler,
///     ) -> BoxFuture<'a, Result<Reply, KeystoneError>> {
///         Box::pin(async move {
///             let reply = next.handle().await;
///             tracing::debug!(elapsed = ?ctx.elapsed(), "handled");
///             reply
///         })
///     }
/// }
/// ```
pub trait Interceptor: Send + Sync + 'static {
    /// Returns the interceptor name, for logging.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Intercepts the call.
    ///
    /// Not calling `next.handle()` skips every later interceptor and the
    /// handler.
    fn intercept<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        next: CallHandler,
    ) -> BoxFuture<'a, Result<Reply, KeystoneError>>;
}

/// An interceptor built from an async function.
pub struct FnInterceptor<F> {
    name: &'static str,
    func: F,
}

impl<F> FnInterceptor<F> {
    /// Creates a new function-based interceptor.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F, Fut> Interceptor for FnInterceptor<F>
where
    F: Fn(ExecutionContext, CallHandler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, KeystoneError>> + Send + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn intercept<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        next: CallHandler,
    ) -> BoxFuture<'a, Result<Reply, KeystoneError>> {
        Box::pin((self.func)(ctx.clone(), next))
    }
}

/// A reference to an interceptor.
pub type InterceptorRef = Enhancer<dyn Interceptor>;

impl Enhancer<dyn Interceptor> {
    /// Wraps an interceptor instance.
    #[must_use]
    pub fn interceptor<I: Interceptor>(interceptor: I) -> Self {
        Self::Instance(Arc::new(interceptor))
    }

    /// Wraps an async function.
    #[must_use]
    pub fn from_fn<F, Fut>(name: &'static str, func: F) -> Self
    where
        F: Fn(ExecutionContext, CallHandler) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, KeystoneError>> + Send + 'static,
    {
        Self::interceptor(FnInterceptor::new(name, func))
    }

    /// References interceptor `I`, resolved through the container.
    #[must_use]
    pub fn provider<I: Interceptor>() -> Self {
        Self::from_token::<I>(Token::of::<I>())
    }

    /// References interceptor `I` registered under `token`.
    #[must_use]
    pub fn from_token<I: Interceptor>(token: Token) -> Self {
        Self::Provider {
            token,
            cast: |instance: Instance| {
                instance
                    .downcast::<I>()
                    .ok()
                    .map(|interceptor| interceptor as Arc<dyn Interceptor>)
            },
            kind: "interceptor",
        }
    }
}

/// Runs the rest of the interceptor chain.
///
/// Cloning is cheap, and [`handle`](Self::handle) may be called any number
/// of times.
#[derive(Clone)]
pub struct CallHandler {
    chain: Arc<[Arc<dyn Interceptor>]>,
    index: usize,
    ctx: ExecutionContext,
    terminal: Continuation,
    reached: Arc<AtomicBool>,
}

impl CallHandler {
    /// Runs the next interceptor, or the terminal continuation after the
    /// last one.
    pub fn handle(&self) -> BoxFuture<'static, Result<Reply, KeystoneError>> {
        match self.chain.get(self.index) {
            Some(interceptor) => {
                let interceptor = Arc::clone(interceptor);
                let ctx = self.ctx.clone();
                let next = Self {
                    index: self.index + 1,
                    ..self.clone()
                };
                Box::pin(async move { interceptor.intercept(&ctx, next).await })
            }
            None => {
                self.reached.store(true, Ordering::Release);
                (self.terminal)()
            }
        }
    }

    /// Returns the position of the next interceptor.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

/// The outcome of the interceptor stage.
#[derive(Debug)]
pub struct Intercepted {
    /// Whatever the outermost interceptor returned.
    pub reply: Reply,
    /// Whether the terminal continuation ran at least once.
    pub reached_terminal: bool,
}

/// An ordered list of resolved interceptors.
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InterceptorChain {
    /// Creates a chain.
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    /// Returns the number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns `true` if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs the chain around `terminal`.
    pub async fn intercept(
        &self,
        ctx: &ExecutionContext,
        terminal: Continuation,
    ) -> Result<Intercepted, KeystoneError> {
        let reached = Arc::new(AtomicBool::new(false));
        let handler = CallHandler {
            chain: Arc::clone(&self.interceptors),
            index: 0,
            ctx: ctx.clone(),
            terminal,
            reached: Arc::clone(&reached),
        };
        let reply = handler.handle().await?;
        let reached_terminal = reached.load(Ordering::Acquire);
        if !reached_terminal {
            tracing::debug!(
                handler = ctx.handler(),
                interceptors = self.interceptors.len(),
                "Interceptor chain did not reach the handler"
            );
        }
        Ok(Intercepted {
            reply,
            reached_terminal,
        })
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|i| i.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::Request;
    use parking_lot::Mutex;

    fn ctx() -> ExecutionContext {
        ExecutionContext::builder(Request::builder().build()).build()
    }

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn Interceptor> {
        let log = Arc::clone(log);
        Arc::new(FnInterceptor::new(name, move |_: ExecutionContext, next: CallHandler| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{name}:before"));
                let reply = next.handle().await;
                log.lock().push(format!("{name}:after"));
                reply
            }
        }))
    }

    fn terminal(log: &Arc<Mutex<Vec<String>>>) -> Continuation {
        let log = Arc::clone(log);
        Arc::new(move || -> BoxFuture<'static, Result<Reply, KeystoneError>> {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push("handler".to_string());
                Ok(Reply::text("done"))
            })
        })
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![recording(&log, "a"), recording(&log, "b")]);
        let result = chain.intercept(&ctx(), terminal(&log)).await.unwrap();
        assert!(result.reached_terminal);
        assert_eq!(
            *log.lock(),
            ["a:before", "b:before", "handler", "b:after", "a:after"]
        );
    }

    #[tokio::test]
    async fn test_skipping_next_stops_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let blocker: Arc<dyn Interceptor> = Arc::new(FnInterceptor::new(
            "blocker",
            |_: ExecutionContext, _next: CallHandler| async {
                Ok::<_, KeystoneError>(Reply::text("cached"))
            },
        ));
        let chain =
            InterceptorChain::new(vec![recording(&log, "a"), blocker, recording(&log, "c")]);
        let result = chain.intercept(&ctx(), terminal(&log)).await.unwrap();
        assert!(!result.reached_terminal);
        assert!(matches!(result.reply, Reply::Text(ref t) if t == "cached"));
        assert_eq!(*log.lock(), ["a:before", "a:after"]);
    }

    #[tokio::test]
    async fn test_retry_runs_terminal_twice() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let retry: Arc<dyn Interceptor> = Arc::new(FnInterceptor::new(
            "retry",
            |_: ExecutionContext, next: CallHandler| async move {
                let _ = next.handle().await?;
                next.handle().await
            },
        ));
        let chain = InterceptorChain::new(vec![retry]);
        let result = chain.intercept(&ctx(), terminal(&log)).await.unwrap();
        assert!(result.reached_terminal);
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_chain_runs_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = InterceptorChain::default()
            .intercept(&ctx(), terminal(&log))
            .await
            .unwrap();
        assert!(result.reached_terminal);
        assert_eq!(*log.lock(), ["handler"]);
    }

    #[tokio::test]
    async fn test_terminal_error_propagates_through_interceptors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: Continuation = Arc::new(|| {
            let future: BoxFuture<'static, Result<Reply, KeystoneError>> =
                Box::pin(async { Err(KeystoneError::internal("handler failed")) });
            future
        });
        let chain = InterceptorChain::new(vec![recording(&log, "a")]);
        let error = chain.intercept(&ctx(), failing).await.unwrap_err();
        assert_eq!(error.message(), "handler failed");
        assert_eq!(*log.lock(), ["a:before", "a:after"]);
    }
}
