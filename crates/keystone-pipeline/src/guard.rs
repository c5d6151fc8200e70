//! Activation guards.
//!
//! Guards run before anything else in the pipeline. The first guard that
//! returns `false` stops evaluation and its name is reported, so the router
//! can answer with an authorization error.

use crate::enhancer::Enhancer;
use crate::metadata::MetadataSource;
use keystone_core::di::short_type_name;
use keystone_core::{BoxFuture, Container, ExecutionContext, Instance, KeystoneError, Token};
use std::future::Future;
use std::sync::Arc;

/// Decides whether a request may reach its handler.
///
/// # Example
///
/// ```
/// use keystone_core::{BoxFuture, ExecutionContext, KeystoneError};
/// use keystone_pipeline::Guard;
///
/// struct AuthGuard;
///
/// impl Guard for AuthGuard {
///     fn can_activate<'a>(
///         &'a self,
///         ctx: &'a ExecutionContext,
///     ) -> BoxFuture<'a, Result<bool, KeystoneError>> {
///         Box::pin(async move { Ok(ctx.request().header("authorization").is_some()) })
///     }
/// }
///
/// assert_eq!(AuthGuard.name(), "AuthGuard");
/// ```
pub trait Guard: Send + Sync + 'static {
    /// Returns the name reported when this guard rejects.
    ///
    /// Defaults to the short type name.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Returns `true` to let the request through.
    fn can_activate<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<bool, KeystoneError>>;
}

/// A guard built from an async function.
pub struct FnGuard<F> {
    name: &'static str,
    func: F,
}

impl<F> FnGuard<F> {
    /// Creates a new function-based guard.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F, Fut> Guard for FnGuard<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, KeystoneError>> + Send + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn can_activate<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<bool, KeystoneError>> {
        Box::pin((self.func)(ctx.clone()))
    }
}

/// A reference to a guard.
pub type GuardRef = Enhancer<dyn Guard>;

impl Enhancer<dyn Guard> {
    /// Wraps a guard instance.
    #[must_use]
    pub fn guard<G: Guard>(guard: G) -> Self {
        Self::Instance(Arc::new(guard))
    }

    /// Wraps an async function.
    #[must_use]
    pub fn from_fn<F, Fut>(name: &'static str, func: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, KeystoneError>> + Send + 'static,
    {
        Self::guard(FnGuard::new(name, func))
    }

    /// References guard `G`, resolved through the container.
    #[must_use]
    pub fn provider<G: Guard>() -> Self {
        Self::from_token::<G>(Token::of::<G>())
    }

    /// References guard `G` registered under `token`.
    #[must_use]
    pub fn from_token<G: Guard>(token: Token) -> Self {
        Self::Provider {
            token,
            cast: |instance: Instance| {
                instance
                    .downcast::<G>()
                    .ok()
                    .map(|guard| guard as Arc<dyn Guard>)
            },
            kind: "guard",
        }
    }
}

/// The outcome of the guard stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardDecision {
    /// Whether every guard allowed the request.
    pub allowed: bool,
    /// The name of the rejecting guard.
    pub guard: Option<String>,
}

impl GuardDecision {
    /// Every guard allowed the request.
    #[must_use]
    pub const fn allowed() -> Self {
        Self {
            allowed: true,
            guard: None,
        }
    }

    /// `guard` rejected the request.
    #[must_use]
    pub fn rejected(guard: impl Into<String>) -> Self {
        Self {
            allowed: false,
            guard: Some(guard.into()),
        }
    }
}

/// Evaluates the guards that apply to an execution context.
pub struct GuardProcessor<'a> {
    container: &'a Container,
    metadata: &'a dyn MetadataSource,
}

impl<'a> GuardProcessor<'a> {
    /// Creates a processor.
    #[must_use]
    pub fn new(container: &'a Container, metadata: &'a dyn MetadataSource) -> Self {
        Self {
            container,
            metadata,
        }
    }

    /// Runs the guards for `ctx` in handler, class, module, global order.
    ///
    /// Stops at the first rejection. A guard that fails with an error fails
    /// the stage.
    pub async fn process(&self, ctx: &ExecutionContext) -> Result<GuardDecision, KeystoneError> {
        for reference in self.metadata.guards(ctx) {
            let guard = reference.resolve(self.container).await?;
            if !guard.can_activate(ctx).await? {
                tracing::debug!(
                    guard = guard.name(),
                    handler = ctx.handler(),
                    "Guard rejected request"
                );
                return Ok(GuardDecision::rejected(guard.name()));
            }
        }
        Ok(GuardDecision::allowed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EnhancerRegistry, Target};
    use keystone_core::{Dependencies, Injectable, Provider, Request, ResolveError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AuthGuard;

    impl Guard for AuthGuard {
        fn can_activate<'a>(
            &'a self,
            ctx: &'a ExecutionContext,
        ) -> BoxFuture<'a, Result<bool, KeystoneError>> {
            Box::pin(async move { Ok(ctx.request().header("authorization").is_some()) })
        }
    }

    impl Injectable for AuthGuard {
        fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
            Ok(Self)
        }
    }

    fn ctx(request: Request) -> ExecutionContext {
        ExecutionContext::builder(request).handler("list").build()
    }

    #[test]
    fn test_default_name_is_type_name() {
        assert_eq!(AuthGuard.name(), "AuthGuard");
        let custom = FnGuard::new("custom", |_: ExecutionContext| async {
            Ok::<_, KeystoneError>(true)
        });
        assert_eq!(custom.name(), "custom");
    }

    #[tokio::test]
    async fn test_all_allow() {
        let container = Container::new();
        let registry = EnhancerRegistry::new()
            .guard(Target::Global, GuardRef::from_fn("a", |_| async { Ok(true) }))
            .guard(Target::Global, GuardRef::from_fn("b", |_| async { Ok(true) }));
        let decision = GuardProcessor::new(&container, &registry)
            .process(&ctx(Request::builder().build()))
            .await
            .unwrap();
        assert_eq!(decision, GuardDecision::allowed());
    }

    #[tokio::test]
    async fn test_first_rejection_short_circuits() {
        static LATER: AtomicUsize = AtomicUsize::new(0);
        let container = Container::new();
        container.register(Provider::class::<AuthGuard>());
        let registry = EnhancerRegistry::new()
            .guard(Target::Global, GuardRef::provider::<AuthGuard>())
            .guard(
                Target::Global,
                GuardRef::from_fn("Later", |_| async {
                    LATER.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }),
            );

        let decision = GuardProcessor::new(&container, &registry)
            .process(&ctx(Request::builder().build()))
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.guard.as_deref(), Some("AuthGuard"));
        assert_eq!(LATER.load(Ordering::SeqCst), 0);

        let decision = GuardProcessor::new(&container, &registry)
            .process(&ctx(Request::builder().header("authorization", "Bearer t").build()))
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(LATER.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_guard_error_propagates() {
        let container = Container::new();
        let registry = EnhancerRegistry::new().guard(
            Target::Global,
            GuardRef::from_fn("Broken", |_| async { Err(KeystoneError::internal("down")) }),
        );
        let error = GuardProcessor::new(&container, &registry)
            .process(&ctx(Request::builder().build()))
            .await
            .unwrap_err();
        assert_eq!(error.message(), "down");
    }

    #[tokio::test]
    async fn test_unregistered_guard_provider_fails() {
        let container = Container::new();
        let registry =
            EnhancerRegistry::new().guard(Target::Global, GuardRef::provider::<AuthGuard>());
        let error = GuardProcessor::new(&container, &registry)
            .process(&ctx(Request::builder().build()))
            .await
            .unwrap_err();
        assert!(error.message().contains("AuthGuard"));
    }
}
