//! The router orchestrator.
//!
//! [`RouterProxy`] maps controller actions and callbacks onto an
//! [`HttpAdapter`] and runs every request through the pipeline:
//!
//! ```text
//! holder scope ─┬─ guards ── rejected ─────────────────────────→ Unauthorized
//!               ├─ interceptors ─→ middleware ─→ handler ─→ normalize ─→ Ok
//!               │        └── handler never reached ───────────→ InvalidRequest
//!               └─ any error or panic ─→ exception filters ─┬─→ normalize ─→ Ok
//!                                                           └─→ Failed (adapter fallback)
//! ```
//!
//! The request context holder is torn down on every exit path, including
//! cancellation of the request future.

use crate::adapter::{HttpAdapter, RouteHandler, RouteInfo, NOT_FOUND_MESSAGE, REQUEST_ID_HEADER};
use crate::config::RouterConfig;
use crate::error::PipelineError;
use crate::normalize::ResponseNormalizer;
use futures_util::FutureExt;
use http::Method;
use keystone_core::{
    BoxFuture, Container, ErrorTrace, ExecutionContext, Frame, KeystoneError, Reply, Request,
    RequestContextHolder, Response, Token, TraceOptions,
};
use keystone_pipeline::{
    dedup, resolve_all, Continuation, FilterProcessor, GuardProcessor, InterceptorChain,
    MetadataSource, MiddlewareExecutor, MiddlewareRegistry,
};
use keystone_telemetry::metrics::{
    record_guard_rejection, record_request, record_unhandled_error, InFlightGuard,
};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// A custom route callback.
pub type Callback =
    Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<Reply, KeystoneError>> + Send + Sync>;

/// What a route invokes once the pipeline reaches it.
#[derive(Clone)]
pub enum RouteTarget {
    /// An action of a controller registered in the container.
    Action {
        /// The controller token.
        controller: Token,
        /// The action name.
        action: Arc<str>,
    },
    /// A bare callback.
    Callback {
        /// Name used for logging and enhancer lookup.
        name: Arc<str>,
        /// The callback.
        callback: Callback,
    },
}

impl RouteTarget {
    /// Targets `action` on controller `C`.
    #[must_use]
    pub fn action<C: 'static>(action: &str) -> Self {
        Self::Action {
            controller: Token::of::<C>(),
            action: Arc::from(action),
        }
    }

    /// Targets an async callback.
    pub fn callback<F, Fut>(name: &str, callback: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, KeystoneError>> + Send + 'static,
    {
        Self::Callback {
            name: Arc::from(name),
            callback: Arc::new(move |ctx| -> BoxFuture<'static, Result<Reply, KeystoneError>> {
                Box::pin(callback(ctx))
            }),
        }
    }

    /// The handler name recorded in the execution context.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Action { action, .. } => action,
            Self::Callback { name, .. } => name,
        }
    }

    /// The controller token, for action targets.
    #[must_use]
    pub fn controller(&self) -> Option<&Token> {
        match self {
            Self::Action { controller, .. } => Some(controller),
            Self::Callback { .. } => None,
        }
    }

    async fn invoke(
        &self,
        container: &Container,
        ctx: ExecutionContext,
    ) -> Result<Reply, KeystoneError> {
        match self {
            Self::Action { controller, action } => container.call(controller, action).await,
            Self::Callback { callback, .. } => callback(ctx).await,
        }
    }
}

impl std::fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action { controller, action } => f
                .debug_struct("Action")
                .field("controller", controller)
                .field("action", action)
                .finish(),
            Self::Callback { name, .. } => f.debug_struct("Callback").field("name", name).finish(),
        }
    }
}

/// One route of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDef {
    /// Path relative to the controller prefix.
    pub path: String,
    /// Methods the route answers.
    pub methods: Vec<Method>,
    /// Action invoked on the controller.
    pub action: String,
}

/// A controller and its routes.
///
/// # Example
///
/// ```
/// use keystone_server::ControllerDef;
/// use http::Method;
///
/// struct UsersController;
///
/// let users = ControllerDef::new::<UsersController>("/users")
///     .get("/", "list")
///     .get("/:id", "show")
///     .route([Method::PUT, Method::PATCH], "/:id", "update");
///
/// assert_eq!(users.routes().len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct ControllerDef {
    token: Token,
    prefix: String,
    module: Option<Arc<str>>,
    routes: Vec<RouteDef>,
}

impl ControllerDef {
    /// Describes controller `C`, mounted at `prefix`.
    #[must_use]
    pub fn new<C: 'static>(prefix: &str) -> Self {
        Self::with_token(Token::of::<C>(), prefix)
    }

    /// Describes the controller registered under `token`.
    #[must_use]
    pub fn with_token(token: Token, prefix: &str) -> Self {
        Self {
            token,
            prefix: prefix.to_string(),
            module: None,
            routes: Vec::new(),
        }
    }

    /// Sets the owning module. Defaults to the module the container
    /// registered the controller under.
    #[must_use]
    pub fn module(mut self, module: &str) -> Self {
        self.module = Some(Arc::from(module));
        self
    }

    /// Adds a route answering `methods`.
    #[must_use]
    pub fn route(
        mut self,
        methods: impl IntoIterator<Item = Method>,
        path: &str,
        action: &str,
    ) -> Self {
        self.routes.push(RouteDef {
            path: path.to_string(),
            methods: methods.into_iter().collect(),
            action: action.to_string(),
        });
        self
    }

    /// Adds a `GET` route.
    #[must_use]
    pub fn get(self, path: &str, action: &str) -> Self {
        self.route([Method::GET], path, action)
    }

    /// Adds a `POST` route.
    #[must_use]
    pub fn post(self, path: &str, action: &str) -> Self {
        self.route([Method::POST], path, action)
    }

    /// Adds a `PUT` route.
    #[must_use]
    pub fn put(self, path: &str, action: &str) -> Self {
        self.route([Method::PUT], path, action)
    }

    /// Adds a `DELETE` route.
    #[must_use]
    pub fn delete(self, path: &str, action: &str) -> Self {
        self.route([Method::DELETE], path, action)
    }

    /// The controller token.
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// The routes declared so far.
    #[must_use]
    pub fn routes(&self) -> &[RouteDef] {
        &self.routes
    }
}

struct HandlerPlan {
    route: Arc<str>,
    module: Option<Arc<str>>,
    target: RouteTarget,
}

struct RouterInner {
    adapter: Arc<dyn HttpAdapter>,
    container: Arc<Container>,
    metadata: Arc<dyn MetadataSource>,
    middleware: Arc<MiddlewareRegistry>,
    config: RouterConfig,
    normalizer: ResponseNormalizer,
    trace_options: TraceOptions,
}

/// Registers routes on an adapter and runs the request pipeline.
#[derive(Clone)]
pub struct RouterProxy {
    inner: Arc<RouterInner>,
}

impl RouterProxy {
    /// Creates a router.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn HttpAdapter>,
        container: Arc<Container>,
        metadata: Arc<dyn MetadataSource>,
        middleware: Arc<MiddlewareRegistry>,
        config: RouterConfig,
    ) -> Self {
        let defaults = TraceOptions::default();
        let trace_options = TraceOptions {
            root: config.source_root().cloned().unwrap_or(defaults.root),
            context_lines: config.source_context_lines(),
            include_source: true,
        };
        Self {
            inner: Arc::new(RouterInner {
                adapter,
                container,
                metadata,
                middleware,
                normalizer: ResponseNormalizer::new(config.default_empty_status()),
                config,
                trace_options,
            }),
        }
    }

    /// The adapter routes are registered on.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn HttpAdapter> {
        &self.inner.adapter
    }

    /// The container controllers are resolved from.
    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.inner.container
    }

    /// The router configuration.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Registers every route of every controller.
    ///
    /// Middleware patterns are compiled first so that a bad pattern fails
    /// here rather than on the first request.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown controller or action, a
    /// malformed middleware pattern, or a route the adapter refuses.
    pub fn apply_routes(
        &self,
        controllers: &[ControllerDef],
    ) -> Result<Vec<RouteInfo>, KeystoneError> {
        self.inner.middleware.compile()?;

        let mut mapped = Vec::new();
        for controller in controllers {
            let provider = self.inner.container.provider(&controller.token).ok_or_else(|| {
                KeystoneError::configuration(format!(
                    "Controller {} is not registered",
                    controller.token
                ))
            })?;
            let module = controller
                .module
                .clone()
                .or_else(|| self.inner.container.module_of(&controller.token));

            for route in &controller.routes {
                if !provider.has_action(&route.action) {
                    return Err(KeystoneError::configuration(format!(
                        "Controller {} has no action {}",
                        controller.token, route.action
                    )));
                }
                let path = self
                    .inner
                    .config
                    .join_path(&format!(
                        "{}/{}",
                        controller.prefix.trim_matches('/'),
                        route.path.trim_matches('/')
                    ));
                let target = RouteTarget::Action {
                    controller: controller.token.clone(),
                    action: Arc::from(route.action.as_str()),
                };
                for method in &route.methods {
                    let info = RouteInfo {
                        path: path.clone(),
                        method: method.to_string(),
                        action: route.action.clone(),
                        controller: Some(controller.token.to_string()),
                        module: module.as_deref().map(ToString::to_string),
                    };
                    let handler =
                        self.create_request_handler(&path, module.clone(), target.clone());
                    self.inner.adapter.register(method.clone(), &path, handler, info.clone())?;
                    tracing::debug!(
                        http.method = %method,
                        http.path = %path,
                        controller = %controller.token,
                        action = %route.action,
                        "Mapped route"
                    );
                    mapped.push(info);
                }
            }
        }

        tracing::info!(routes = mapped.len(), adapter = self.inner.adapter.name(), "Routes mapped");
        Ok(mapped)
    }

    /// Registers a callback route.
    ///
    /// The callback runs behind the module and global enhancers.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter refuses the route.
    pub fn route_callback<F, Fut>(
        &self,
        method: Method,
        path: &str,
        name: &str,
        callback: F,
    ) -> Result<RouteInfo, KeystoneError>
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, KeystoneError>> + Send + 'static,
    {
        let path = self.inner.config.join_path(path);
        let info = RouteInfo {
            path: path.clone(),
            method: method.to_string(),
            action: name.to_string(),
            controller: None,
            module: None,
        };
        let handler =
            self.create_request_handler(&path, None, RouteTarget::callback(name, callback));
        self.inner.adapter.register(method, &path, handler, info.clone())?;
        Ok(info)
    }

    /// Routes unmatched requests through the pipeline.
    ///
    /// The handler fails with a not-found error, so global guards,
    /// interceptors and exception filters see unmatched requests too.
    pub fn install_not_found(&self) {
        self.inner.adapter.set_not_found(self.not_found_handler());
    }

    /// Builds the handler for unmatched requests.
    #[must_use]
    pub fn not_found_handler(&self) -> RouteHandler {
        let target = RouteTarget::callback("not_found", |_| async {
            Err(KeystoneError::not_found(NOT_FOUND_MESSAGE))
        });
        self.create_request_handler("*", None, target)
    }

    /// Builds the adapter handler for `target`.
    #[must_use]
    pub fn create_request_handler(
        &self,
        route: &str,
        module: Option<Arc<str>>,
        target: RouteTarget,
    ) -> RouteHandler {
        let plan = Arc::new(HandlerPlan {
            route: Arc::from(route),
            module,
            target,
        });
        let router = self.clone();
        Arc::new(move |request, response| -> BoxFuture<'static, Result<Response, PipelineError>> {
            let router = router.clone();
            let plan = Arc::clone(&plan);
            Box::pin(async move { router.handle(plan, request, response).await })
        })
    }

    async fn handle(
        &self,
        plan: Arc<HandlerPlan>,
        request: Request,
        response: Response,
    ) -> Result<Response, PipelineError> {
        let ctx = ExecutionContext::builder(request)
            .adapter(self.inner.adapter.name())
            .maybe_module(plan.module.clone())
            .maybe_class(plan.target.controller().cloned())
            .handler(plan.target.name())
            .route(Arc::clone(&plan.route))
            .response(response.clone())
            .build();
        response.header(REQUEST_ID_HEADER, &ctx.request_id().to_string());

        RequestContextHolder::with_context(ctx.clone())
            .scope(self.process(plan, ctx))
            .await
    }

    async fn process(
        &self,
        plan: Arc<HandlerPlan>,
        ctx: ExecutionContext,
    ) -> Result<Response, PipelineError> {
        let _in_flight = InFlightGuard::new();
        tracing::debug!(
            request_id = %ctx.request_id(),
            http.method = %ctx.request().method(),
            http.path = ctx.request().path(),
            handler = ctx.handler(),
            "Request started"
        );

        let outcome = AssertUnwindSafe(self.run(&plan, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(PipelineError::failed(promote_panic(panic.as_ref()))));

        let outcome = match outcome {
            Err(PipelineError::Failed { error, .. }) => AssertUnwindSafe(self.recover(error, &ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PipelineError::failed(promote_panic(panic.as_ref())))),
            other => other,
        };

        let status = match &outcome {
            Ok(response) => response.status(),
            Err(error) => error.status_code(),
        };
        let elapsed = ctx.elapsed();
        record_request(&plan.route, ctx.request().method().as_str(), status.as_u16(), elapsed);

        if status.is_server_error() {
            tracing::error!(
                request_id = %ctx.request_id(),
                http.status_code = status.as_u16(),
                duration_ms = duration_millis(elapsed),
                "Request failed"
            );
        } else if status.is_client_error() {
            tracing::warn!(
                request_id = %ctx.request_id(),
                http.status_code = status.as_u16(),
                duration_ms = duration_millis(elapsed),
                "Request completed"
            );
        } else {
            tracing::info!(
                request_id = %ctx.request_id(),
                http.status_code = status.as_u16(),
                duration_ms = duration_millis(elapsed),
                "Request completed"
            );
        }
        outcome
    }

    async fn run(
        &self,
        plan: &Arc<HandlerPlan>,
        ctx: &ExecutionContext,
    ) -> Result<Response, PipelineError> {
        let inner = &self.inner;

        let decision = GuardProcessor::new(&inner.container, inner.metadata.as_ref())
            .process(ctx)
            .await
            .map_err(|e| e.with_frame(Frame::caller("guards")))?;
        if !decision.allowed {
            let guard = decision.guard.unwrap_or_default();
            record_guard_rejection(&guard);
            tracing::warn!(guard = %guard, handler = ctx.handler(), "Request rejected by guard");
            return Err(PipelineError::Unauthorized { guard });
        }

        let references = dedup(inner.metadata.interceptors(ctx));
        let interceptors = resolve_all(&references, &inner.container)
            .await
            .map_err(|e| e.with_frame(Frame::caller("interceptors")))?;
        let intercepted = InterceptorChain::new(interceptors)
            .intercept(ctx, self.terminal(plan, ctx))
            .await
            .map_err(|e| e.with_frame(Frame::caller("interceptors")))?;
        if !intercepted.reached_terminal {
            tracing::warn!(handler = ctx.handler(), "Interceptor did not call the handler");
            return Err(PipelineError::InvalidRequest);
        }

        Ok(inner.normalizer.normalize(intercepted.reply, ctx.response()))
    }

    /// The continuation interceptors wrap: middleware around the handler.
    fn terminal(&self, plan: &Arc<HandlerPlan>, ctx: &ExecutionContext) -> Continuation {
        let router = self.clone();
        let plan = Arc::clone(plan);
        let ctx = ctx.clone();
        Arc::new(move || -> BoxFuture<'static, Result<Reply, KeystoneError>> {
            let router = router.clone();
            let plan = Arc::clone(&plan);
            let ctx = ctx.clone();
            Box::pin(async move {
                let inner = &router.inner;
                let handler = handler_continuation(Arc::clone(&inner.container), plan, ctx.clone());
                MiddlewareExecutor::new(
                    &inner.middleware,
                    &inner.container,
                    ctx.request_arc(),
                    ctx.response().clone(),
                    handler,
                )
                .execute()
                .await
                .map_err(|e| e.with_frame(Frame::caller("middleware")))
            })
        })
    }

    async fn recover(
        &self,
        error: KeystoneError,
        ctx: &ExecutionContext,
    ) -> Result<Response, PipelineError> {
        let inner = &self.inner;
        let trace = ErrorTrace::capture(&error, Some(ctx.request()), &inner.trace_options).await;

        let caught = FilterProcessor::new(&inner.container, inner.metadata.as_ref())
            .catch(&error, &trace, ctx)
            .await;
        match caught {
            Ok(Some(reply)) => Ok(inner.normalizer.normalize(reply, ctx.response())),
            Ok(None) => {
                record_unhandled_error(error.kind());
                if error.is_server_error() {
                    tracing::error!(
                        request_id = %ctx.request_id(),
                        error = %error,
                        kind = error.kind(),
                        "Unhandled error"
                    );
                }
                Err(self.failed(error, trace))
            }
            Err(filter_error) => {
                tracing::error!(
                    request_id = %ctx.request_id(),
                    error = %filter_error,
                    original = %error,
                    "Exception filter failed"
                );
                record_unhandled_error(filter_error.kind());
                let trace =
                    ErrorTrace::capture(&filter_error, Some(ctx.request()), &inner.trace_options)
                        .await;
                Err(self.failed(filter_error, trace))
            }
        }
    }

    fn failed(&self, error: KeystoneError, trace: ErrorTrace) -> PipelineError {
        PipelineError::Failed {
            error,
            trace: self.inner.config.expose_error_trace().then(|| Box::new(trace)),
        }
    }
}

impl std::fmt::Debug for RouterProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterProxy")
            .field("adapter", &self.inner.adapter.name())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn handler_continuation(
    container: Arc<Container>,
    plan: Arc<HandlerPlan>,
    ctx: ExecutionContext,
) -> Continuation {
    Arc::new(move || -> BoxFuture<'static, Result<Reply, KeystoneError>> {
        let container = Arc::clone(&container);
        let plan = Arc::clone(&plan);
        let ctx = ctx.clone();
        Box::pin(async move {
            plan.target
                .invoke(&container, ctx)
                .await
                .map_err(|e| e.with_frame(Frame::caller("handler")))
        })
    })
}

fn duration_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn promote_panic(payload: &(dyn Any + Send)) -> KeystoneError {
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %message, "Request pipeline panicked");
    KeystoneError::internal(message).with_kind("panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RouteAdapter;
    use keystone_core::{Dependencies, Injectable, Provider, ResolveError};
    use keystone_pipeline::EnhancerRegistry;

    struct Users;

    impl Injectable for Users {
        fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
            Ok(Self)
        }
    }

    fn router(config: RouterConfig) -> (Arc<RouteAdapter>, RouterProxy) {
        let container = Container::new();
        container.register(
            Provider::class::<Users>()
                .action_sync("list", vec![], |_: &Users, _| Ok(Reply::text("users"))),
        );
        let adapter = Arc::new(RouteAdapter::new());
        let router = RouterProxy::new(
            Arc::clone(&adapter) as Arc<dyn HttpAdapter>,
            Arc::new(container),
            Arc::new(EnhancerRegistry::new()),
            Arc::new(MiddlewareRegistry::new()),
            config,
        );
        (adapter, router)
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_apply_routes_joins_prefix() {
        let (adapter, router) = router(RouterConfig::builder().global_prefix("api").build());
        let routes = router
            .apply_routes(&[ControllerDef::new::<Users>("/users/").get("/", "list")])
            .unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].path, "/api/users");
        assert_eq!(routes[0].method, "GET");
        assert_eq!(routes[0].controller.as_deref(), Some("Users"));
        assert_eq!(adapter.routes(), routes);
    }

    #[test]
    fn test_unknown_action_is_configuration_error() {
        let (_, router) = router(RouterConfig::default());
        let err = router
            .apply_routes(&[ControllerDef::new::<Users>("/users").get("/", "missing")])
            .unwrap_err();
        assert_eq!(err.category(), keystone_core::ErrorCategory::Configuration);
        assert!(err.message().contains("missing"));
    }

    #[test]
    fn test_unregistered_controller_is_configuration_error() {
        struct Ghost;
        let (_, router) = router(RouterConfig::default());
        let err = router
            .apply_routes(&[ControllerDef::new::<Ghost>("/ghosts").get("/", "list")])
            .unwrap_err();
        assert!(err.message().contains("not registered"));
    }

    #[test]
    fn test_promote_panic_messages() {
        let err = promote_panic(&"boom");
        assert_eq!(err.message(), "boom");
        assert_eq!(err.kind(), "panic");

        let err = promote_panic(&String::from("owned"));
        assert_eq!(err.message(), "owned");

        let err = promote_panic(&42_u8);
        assert_eq!(err.message(), "unknown panic");
    }

    #[test]
    fn test_route_target_names() {
        let action = RouteTarget::action::<Users>("list");
        assert_eq!(action.name(), "list");
        assert_eq!(action.controller(), Some(&Token::of::<Users>()));

        let callback = RouteTarget::callback("health", |_| async { Ok(Reply::text("ok")) });
        assert_eq!(callback.name(), "health");
        assert!(callback.controller().is_none());
    }
}
