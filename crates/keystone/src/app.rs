//! Application bootstrap.

use crate::ApplicationError;
use http::Method;
use keystone_config::KeystoneConfig;
use keystone_core::{
    BoxFuture, Container, ExecutionContext, KeystoneError, ModuleDef, Provider, Reply,
};
use keystone_pipeline::{
    EnhancerRegistry, FilterRef, GuardRef, InterceptorRef, MiddlewareRegistry, Target,
};
use keystone_server::{
    ControllerDef, HttpAdapter, RouteAdapter, RouteInfo, RouterProxy, Server, ShutdownSignal,
};
use std::future::Future;
use std::sync::Arc;

type CallbackFn =
    Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<Reply, KeystoneError>> + Send + Sync>;

struct CallbackRoute {
    method: Method,
    path: String,
    name: String,
    callback: CallbackFn,
}

/// Collects providers, modules, controllers and enhancers for an
/// [`Application`].
///
/// Registration is order-preserving: guards, interceptors, filters and
/// middleware run in the order they are added within their scope.
#[must_use]
pub struct ApplicationBuilder {
    config: KeystoneConfig,
    container: Container,
    controllers: Vec<ControllerDef>,
    callbacks: Vec<CallbackRoute>,
    enhancers: EnhancerRegistry,
    middleware: MiddlewareRegistry,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self {
            config: KeystoneConfig::default(),
            container: Container::new(),
            controllers: Vec::new(),
            callbacks: Vec::new(),
            enhancers: EnhancerRegistry::new(),
            middleware: MiddlewareRegistry::new(),
        }
    }
}

impl ApplicationBuilder {
    /// Replaces the configuration.
    pub fn config(mut self, config: KeystoneConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a provider.
    pub fn provider(self, provider: Provider) -> Self {
        self.container.register(provider);
        self
    }

    /// Registers a module.
    pub fn module(self, module: ModuleDef) -> Self {
        self.container.add_module(module);
        self
    }

    /// Mounts a controller's routes.
    pub fn controller(mut self, controller: ControllerDef) -> Self {
        self.controllers.push(controller);
        self
    }

    /// Mounts a callback route. It runs behind the global enhancers.
    pub fn route<F, Fut>(mut self, method: Method, path: &str, name: &str, callback: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, KeystoneError>> + Send + 'static,
    {
        self.callbacks.push(CallbackRoute {
            method,
            path: path.to_string(),
            name: name.to_string(),
            callback: Arc::new(move |ctx| Box::pin(callback(ctx))),
        });
        self
    }

    /// Attaches a guard.
    pub fn guard(mut self, target: Target, guard: GuardRef) -> Self {
        self.enhancers = self.enhancers.guard(target, guard);
        self
    }

    /// Attaches an interceptor.
    pub fn interceptor(mut self, target: Target, interceptor: InterceptorRef) -> Self {
        self.enhancers = self.enhancers.interceptor(target, interceptor);
        self
    }

    /// Attaches an exception filter.
    pub fn filter(mut self, target: Target, filter: FilterRef) -> Self {
        self.enhancers = self.enhancers.filter(target, filter);
        self
    }

    /// Configures middleware.
    ///
    /// ```ignore
    /// Application::builder().middleware(|registry| {
    ///     registry.apply([logger]).exclude(["/health"]);
    ///     registry.apply_for_module("admin", [audit]);
    /// })
    /// ```
    pub fn middleware<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&mut MiddlewareRegistry),
    {
        configure(&mut self.middleware);
        self
    }

    /// Validates everything and registers the routes.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, an inconsistent provider graph, a
    /// malformed middleware pattern or a duplicate route.
    pub fn build(self) -> Result<Application, ApplicationError> {
        self.config.validate()?;
        self.container.validate()?;

        let adapter = Arc::new(RouteAdapter::new());
        let router = RouterProxy::new(
            Arc::clone(&adapter) as Arc<dyn HttpAdapter>,
            Arc::new(self.container),
            Arc::new(self.enhancers),
            Arc::new(self.middleware),
            self.config.router_config(),
        );

        let mut routes = router.apply_routes(&self.controllers)?;
        for route in self.callbacks {
            let callback = route.callback;
            routes.push(router.route_callback(route.method, &route.path, &route.name, move |ctx| {
                callback(ctx)
            })?);
        }
        router.install_not_found();

        tracing::info!(
            service = %self.config.telemetry.service_name,
            routes = routes.len(),
            "Application initialized"
        );

        Ok(Application {
            config: self.config,
            router,
            adapter,
            routes,
        })
    }
}

/// A fully wired application.
///
/// # Example
///
/// ```ignore
/// use keystone::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<(), ApplicationError> {
///     let config = ConfigLoader::new().with_optional_file("keystone.toml")?.load()?;
///
///     Application::builder()
///         .config(config)
///         .provider(Provider::class::<Users>().action("list", vec![], Users::list))
///         .controller(ControllerDef::new::<Users>("/users").get("/", "list"))
///         .build()?
///         .run()
///         .await
/// }
/// ```
pub struct Application {
    config: KeystoneConfig,
    router: RouterProxy,
    adapter: Arc<RouteAdapter>,
    routes: Vec<RouteInfo>,
}

impl Application {
    /// Starts building an application.
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::default()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &KeystoneConfig {
        &self.config
    }

    /// Returns the container.
    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        self.router.container()
    }

    /// Returns the router orchestrator.
    #[must_use]
    pub fn router(&self) -> &RouterProxy {
        &self.router
    }

    /// Returns the in-memory adapter requests are dispatched through.
    #[must_use]
    pub fn adapter(&self) -> Arc<RouteAdapter> {
        Arc::clone(&self.adapter)
    }

    /// Returns every registered route.
    #[must_use]
    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    /// Installs logging and metrics, then serves until SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Fails if telemetry cannot be installed or the listener cannot bind.
    pub async fn run(self) -> Result<(), ApplicationError> {
        keystone_telemetry::init_telemetry(&self.config.telemetry_config())?;
        self.serve(ShutdownSignal::with_os_signals()).await
    }

    /// Serves until `shutdown` triggers, without touching telemetry.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot bind.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), ApplicationError> {
        Server::new(self.config.server_config(), self.adapter)
            .run_with_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("routes", &self.routes.len())
            .field("adapter", &self.adapter)
            .finish_non_exhaustive()
    }
}
