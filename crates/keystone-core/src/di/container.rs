//! The dependency injection container.
//!
//! The [`Container`] is an explicit value created once at startup and shared
//! as `Arc<Container>`. Resolution is asynchronous: every dependency lookup is
//! a suspension point, and factories and actions may await.
//!
//! # Resolution
//!
//! 1. A singleton whose instance is already cached is returned immediately.
//! 2. Lazy descriptors (value, alias, substitute class, factory) are resolved
//!    against the requester's search scope, and the cached entry is replaced
//!    with the concrete instance.
//! 3. Classes have their declared dependencies resolved first: service
//!    dependencies recursively through the container, context dependencies
//!    through the context resolver and the current request holder.
//! 4. Every resolution carries the path of tokens currently being built. A
//!    token already on the path fails with [`ResolveError::Circular`].
//! 5. Singletons are cached before being returned; request-scoped instances
//!    are cached on the current [`RequestContextHolder`].
//!
//! Actions are invoked with [`Container::call`], which resolves the owning
//! instance, then the action's own arguments, then awaits the action.
//!
//! # Concurrency
//!
//! Registrations live behind a read-write lock and the singleton cache in a
//! concurrent map. No lock is held while a dependency is being constructed.
//! Two tasks racing on the first resolution of the same singleton may both
//! construct it, but the cache keeps whichever instance was stored first and
//! both callers receive that one.

use super::dependency::{ContextKey, DependencyKind};
use super::provider::Recipe;
use super::{Dependencies, Dependency, Instance, ModuleDef, Provider, ResolveError, Scope, Token};
use crate::error::KeystoneError;
use crate::holder::RequestContextHolder;
use crate::reply::Reply;
use crate::BoxFuture;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Callback resolving context dependencies against the current request.
///
/// Returning `None` injects an absent value.
pub type ContextResolver =
    Arc<dyn Fn(&Dependency, &RequestContextHolder) -> Option<Instance> + Send + Sync>;

/// A singleton cache entry.
#[derive(Clone)]
enum SingletonEntry {
    /// A lazy descriptor that has not been resolved yet.
    Lazy,
    /// The concrete instance.
    Resolved(Instance),
}

/// The dependency injection container.
///
/// # Example
///
/// ```
/// use keystone_core::di::{Container, Dependencies, Dependency, Injectable, Provider, ResolveError};
/// use std::sync::Arc;
///
/// struct Database;
///
/// impl Injectable for Database {
///     fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
///         Ok(Self)
///     }
/// }
///
/// struct UserService {
///     db: Arc<Database>,
/// }
///
/// impl Injectable for UserService {
///     fn dependencies() -> Vec<Dependency> {
///         vec![Dependency::service::<Database>("db")]
///     }
///
///     fn construct(deps: &Dependencies) -> Result<Self, ResolveError> {
///         Ok(Self { db: deps.service("db")? })
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let container = Container::new();
/// container.register(Provider::class::<Database>());
/// container.register(Provider::class::<UserService>());
///
/// let first = container.resolve::<UserService>().await.unwrap();
/// let second = container.resolve::<UserService>().await.unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
/// # });
/// ```
pub struct Container {
    providers: RwLock<HashMap<Token, Arc<Provider>>>,
    singletons: DashMap<Token, SingletonEntry>,
    modules: RwLock<IndexMap<Arc<str>, ModuleDef>>,
    owners: RwLock<HashMap<Token, Arc<str>>>,
    context_resolver: RwLock<ContextResolver>,
}

impl Default for Container {
    fn default() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            singletons: DashMap::new(),
            modules: RwLock::new(IndexMap::new()),
            owners: RwLock::new(HashMap::new()),
            context_resolver: RwLock::new(Arc::new(default_context_resolver)),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("providers", &self.providers.read().len())
            .field("singletons", &self.singletons.len())
            .field("modules", &self.modules.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider, replacing any previous registration of its
    /// token and evicting its cached instance.
    pub fn register(&self, provider: Provider) {
        let token = provider.token.clone();
        let lazy_singleton = provider.is_lazy() && provider.scope == Scope::Singleton;
        tracing::debug!(
            token = %token,
            scope = ?provider.scope,
            lazy = provider.is_lazy(),
            "Registering provider"
        );
        let replaced = self
            .providers
            .write()
            .insert(token.clone(), Arc::new(provider))
            .is_some();
        self.singletons.remove(&token);
        if lazy_singleton {
            self.singletons.insert(token.clone(), SingletonEntry::Lazy);
        }
        if replaced {
            tracing::debug!(token = %token, "Replaced existing provider");
        }
    }

    /// Adds a module. Its providers become scoped to it.
    pub fn add_module(&self, module: ModuleDef) {
        let name = module.name_arc();
        {
            let mut owners = self.owners.write();
            for token in module.providers() {
                owners.insert(token.clone(), Arc::clone(&name));
            }
        }
        tracing::debug!(
            module = %name,
            providers = module.providers().len(),
            imports = module.imports().len(),
            global = module.is_global(),
            "Registering module"
        );
        self.modules.write().insert(name, module);
    }

    /// Replaces the context dependency resolver.
    pub fn set_context_resolver<F>(&self, resolver: F)
    where
        F: Fn(&Dependency, &RequestContextHolder) -> Option<Instance> + Send + Sync + 'static,
    {
        *self.context_resolver.write() = Arc::new(resolver);
    }

    /// Returns `true` if `token` is registered.
    #[must_use]
    pub fn contains(&self, token: &Token) -> bool {
        self.providers.read().contains_key(token)
    }

    /// Returns every registered token.
    #[must_use]
    pub fn tokens(&self) -> Vec<Token> {
        self.providers.read().keys().cloned().collect()
    }

    /// Returns a registered module.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<ModuleDef> {
        self.modules.read().get(name).cloned()
    }

    /// Returns every registered module, in registration order.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleDef> {
        self.modules.read().values().cloned().collect()
    }

    /// Returns the module owning `token`.
    #[must_use]
    pub fn module_of(&self, token: &Token) -> Option<Arc<str>> {
        self.owners.read().get(token).cloned()
    }

    /// Returns `true` once the singleton for `token` holds a concrete
    /// instance.
    #[must_use]
    pub fn is_resolved(&self, token: &Token) -> bool {
        self.singletons
            .get(token)
            .is_some_and(|entry| matches!(entry.value(), SingletonEntry::Resolved(_)))
    }

    /// Returns the registration for `token`.
    #[must_use]
    pub fn provider(&self, token: &Token) -> Option<Arc<Provider>> {
        self.providers.read().get(token).cloned()
    }

    /// Resolves the instance registered for `token`.
    pub fn get<'a>(&'a self, token: &'a Token) -> BoxFuture<'a, Result<Instance, ResolveError>> {
        self.resolve_in(token, None, Vec::new())
    }

    /// Resolves the instance registered for type `T`.
    pub async fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ResolveError> {
        self.resolve_token(&Token::of::<T>()).await
    }

    /// Resolves the instance registered for `token` as a `T`.
    pub async fn resolve_token<T: Any + Send + Sync>(
        &self,
        token: &Token,
    ) -> Result<Arc<T>, ResolveError> {
        self.get(token)
            .await?
            .downcast::<T>()
            .map_err(|_| ResolveError::type_mismatch::<T>(token.name()))
    }

    /// Invokes the action `method` on the provider registered for `token`.
    ///
    /// The owning instance is fetched (or constructed) first, then the
    /// action's own dependencies are resolved in the provider's scope.
    pub async fn call(&self, token: &Token, method: &str) -> Result<Reply, KeystoneError> {
        let provider = self.provider(token).ok_or_else(|| ResolveError::NotFound {
            token: token.to_string(),
        })?;
        let action = provider
            .action_named(method)
            .cloned()
            .ok_or_else(|| ResolveError::MethodNotFound {
                token: token.to_string(),
                method: method.to_string(),
            })?;
        let instance = self.get(token).await?;
        let path = vec![token.clone()];
        let deps = self
            .resolve_dependencies(action.dependencies(), token, &path)
            .await?;
        tracing::trace!(token = %token, method, "Invoking action");
        action.invoke(instance, deps).await
    }

    fn resolve_in<'a>(
        &'a self,
        token: &'a Token,
        requester: Option<&'a Token>,
        mut path: Vec<Token>,
    ) -> BoxFuture<'a, Result<Instance, ResolveError>> {
        Box::pin(async move {
            if path.contains(token) {
                let mut chain: Vec<String> = path.iter().map(ToString::to_string).collect();
                chain.push(token.to_string());
                tracing::warn!(chain = %chain.join(" -> "), "Circular dependency detected");
                return Err(ResolveError::Circular { chain });
            }

            let provider = self.provider(token).ok_or_else(|| ResolveError::NotFound {
                token: token.to_string(),
            })?;
            if let Some(requester) = requester {
                self.check_scope(requester, token)?;
            }

            let holder = match provider.scope {
                Scope::Singleton => {
                    if let Some(instance) = self.cached_singleton(token) {
                        return Ok(instance);
                    }
                    None
                }
                Scope::Request => {
                    let holder = RequestContextHolder::current().ok_or_else(|| {
                        ResolveError::NoRequestContext {
                            token: token.to_string(),
                        }
                    })?;
                    if let Some(instance) = holder.cached(token) {
                        return Ok(instance);
                    }
                    Some(holder)
                }
                Scope::Transient => None,
            };

            path.push(token.clone());
            let instance = self.build(&provider, &path).await?;

            Ok(match (provider.scope, holder) {
                (Scope::Singleton, _) => self.store_singleton(token, instance),
                (Scope::Request, Some(holder)) => holder.store(token, instance),
                _ => instance,
            })
        })
    }

    async fn build(&self, provider: &Provider, path: &[Token]) -> Result<Instance, ResolveError> {
        let token = &provider.token;
        match &provider.recipe {
            Recipe::Class(class) | Recipe::UseClass(class) => {
                let deps = self.resolve_dependencies(&class.deps, token, path).await?;
                (class.construct)(&deps)
            }
            Recipe::Value(value) => Ok(Arc::clone(value)),
            Recipe::Existing(target) => self.resolve_in(target, Some(token), path.to_vec()).await,
            Recipe::Factory { inject, call } => {
                let deps = self.resolve_dependencies(inject, token, path).await?;
                call(deps).await
            }
        }
    }

    async fn resolve_dependencies(
        &self,
        declared: &[Dependency],
        requester: &Token,
        path: &[Token],
    ) -> Result<Dependencies, ResolveError> {
        let mut deps = Dependencies::new();
        for dependency in declared {
            let value = match &dependency.kind {
                DependencyKind::Service(service) => Some(
                    self.resolve_in(service, Some(requester), path.to_vec())
                        .await?,
                ),
                DependencyKind::Context(_) => self.resolve_context(dependency),
            };
            deps.insert(Arc::clone(&dependency.name), value);
        }
        Ok(deps)
    }

    fn resolve_context(&self, dependency: &Dependency) -> Option<Instance> {
        let holder = RequestContextHolder::current()?;
        let resolver = self.context_resolver.read().clone();
        resolver(dependency, &holder)
    }

    fn cached_singleton(&self, token: &Token) -> Option<Instance> {
        self.singletons
            .get(token)
            .and_then(|entry| match entry.value() {
                SingletonEntry::Resolved(instance) => Some(Arc::clone(instance)),
                SingletonEntry::Lazy => None,
            })
    }

    fn store_singleton(&self, token: &Token, instance: Instance) -> Instance {
        match self.singletons.entry(token.clone()) {
            Entry::Occupied(mut entry) => {
                if let SingletonEntry::Resolved(existing) = entry.get() {
                    return Arc::clone(existing);
                }
                entry.insert(SingletonEntry::Resolved(Arc::clone(&instance)));
                instance
            }
            Entry::Vacant(entry) => {
                entry.insert(SingletonEntry::Resolved(Arc::clone(&instance)));
                instance
            }
        }
    }

    /// Returns the tokens visible to `token`, or `None` when `token` belongs
    /// to no module and may therefore see every provider.
    #[must_use]
    pub fn search_scope(&self, token: &Token) -> Option<HashSet<Token>> {
        let owner = self.module_of(token)?;
        let modules = self.modules.read();
        let module = modules.get(&owner)?;

        let mut scope: HashSet<Token> = module.providers().iter().cloned().collect();
        for import in module.imports() {
            if let Some(imported) = modules.get(import) {
                scope.extend(imported.visible_to_importers().iter().cloned());
            }
        }
        for shared in modules.values().filter(|m| m.is_global() || m.is_root()) {
            scope.extend(shared.providers().iter().cloned());
        }
        Some(scope)
    }

    fn check_scope(&self, requester: &Token, service: &Token) -> Result<(), ResolveError> {
        match self.search_scope(requester) {
            Some(scope) if !scope.contains(service) => Err(ResolveError::OutOfScope {
                service: service.to_string(),
                requester: requester.to_string(),
                module: self
                    .module_of(requester)
                    .map_or_else(String::new, |m| m.to_string()),
            }),
            _ => Ok(()),
        }
    }

    /// Checks the whole provider graph without constructing anything.
    ///
    /// Reports the first unknown dependency, out-of-scope dependency, or
    /// cycle found.
    pub fn validate(&self) -> Result<(), ResolveError> {
        let providers = self.providers.read().clone();
        let mut done = HashSet::new();
        let mut tokens: Vec<&Token> = providers.keys().collect();
        tokens.sort_by_key(|token| token.to_string());
        for token in tokens {
            let mut stack = Vec::new();
            self.visit(token, &providers, &mut stack, &mut done)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        token: &Token,
        providers: &HashMap<Token, Arc<Provider>>,
        stack: &mut Vec<Token>,
        done: &mut HashSet<Token>,
    ) -> Result<(), ResolveError> {
        if done.contains(token) {
            return Ok(());
        }
        if stack.contains(token) {
            let mut chain: Vec<String> = stack.iter().map(ToString::to_string).collect();
            chain.push(token.to_string());
            return Err(ResolveError::Circular { chain });
        }
        let provider = providers.get(token).ok_or_else(|| ResolveError::NotFound {
            token: token.to_string(),
        })?;
        stack.push(token.clone());
        for edge in provider.edges() {
            if !providers.contains_key(edge) {
                return Err(ResolveError::NotFound {
                    token: edge.to_string(),
                });
            }
            self.check_scope(token, edge)?;
            self.visit(edge, providers, stack, done)?;
        }
        stack.pop();
        done.insert(token.clone());
        Ok(())
    }
}

/// The built-in context resolver.
///
/// Reads the request, response and execution context from the holder, and
/// looks keyed values up by the dependency name.
pub fn default_context_resolver(
    dependency: &Dependency,
    holder: &RequestContextHolder,
) -> Option<Instance> {
    let DependencyKind::Context(key) = &dependency.kind else {
        return None;
    };
    let ctx = holder.context()?;
    let request = ctx.request();
    let name = dependency.name.as_ref();
    let string = |value: Option<&str>| value.map(|v| Arc::new(v.to_string()) as Instance);

    match key {
        ContextKey::Request => Some(ctx.request_arc() as Instance),
        ContextKey::Response => Some(Arc::new(ctx.response().clone()) as Instance),
        ContextKey::Context => Some(Arc::new(ctx.clone()) as Instance),
        ContextKey::Body => Some(Arc::new(request.body().clone()) as Instance),
        ContextKey::Header => string(request.header(name)),
        ContextKey::Headers => {
            let headers: HashMap<String, String> = request
                .headers()
                .iter()
                .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
                .collect();
            Some(Arc::new(headers) as Instance)
        }
        ContextKey::Cookie => string(request.cookie(name)),
        ContextKey::Cookies => Some(Arc::new(request.cookies().clone()) as Instance),
        ContextKey::Session => request
            .session()
            .get(name)
            .map(|value| Arc::new(value) as Instance),
        ContextKey::Sessions => Some(Arc::new(request.session().clone()) as Instance),
        ContextKey::Param => string(request.param(name)),
        ContextKey::Params => Some(Arc::new(request.params().clone()) as Instance),
        ContextKey::Query => string(request.query(name)),
        ContextKey::Queries => Some(Arc::new(request.queries().clone()) as Instance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::Injectable;
    use crate::context::ExecutionContext;
    use crate::request::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BUILDS: AtomicUsize = AtomicUsize::new(0);

    struct Database;

    impl Injectable for Database {
        fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
            Ok(Self)
        }
    }

    struct UserService {
        db: Arc<Database>,
    }

    impl Injectable for UserService {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::service::<Database>("db")]
        }

        fn construct(deps: &Dependencies) -> Result<Self, ResolveError> {
            Ok(Self {
                db: deps.service("db")?,
            })
        }
    }

    struct Counted(usize);

    impl Injectable for Counted {
        fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
            Ok(Self(BUILDS.fetch_add(1, Ordering::SeqCst)))
        }
    }

    struct Left;
    struct Right;

    impl Injectable for Left {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::service::<Right>("right")]
        }

        fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
            Ok(Self)
        }
    }

    impl Injectable for Right {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::service::<Left>("left")]
        }

        fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
            Ok(Self)
        }
    }

    struct Failing;

    impl Injectable for Failing {
        fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
            Err(ResolveError::construction("Failing", "boom"))
        }
    }

    struct Greeting {
        user: Option<String>,
    }

    impl Injectable for Greeting {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::header("x-user")]
        }

        fn construct(deps: &Dependencies) -> Result<Self, ResolveError> {
            Ok(Self {
                user: deps.string("x-user")?,
            })
        }
    }

    fn container() -> Container {
        let container = Container::new();
        container.register(Provider::class::<Database>());
        container.register(Provider::class::<UserService>());
        container
    }

    fn holder_for(request: Request) -> RequestContextHolder {
        RequestContextHolder::with_context(ExecutionContext::builder(request).build())
    }

    #[tokio::test]
    async fn test_singleton_returns_same_instance() {
        let container = container();
        let first = container.resolve::<UserService>().await.unwrap();
        let second = container.resolve::<UserService>().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let db = container.resolve::<Database>().await.unwrap();
        assert!(Arc::ptr_eq(&first.db, &db));
        assert!(container.is_resolved(&Token::of::<UserService>()));
    }

    #[tokio::test]
    async fn test_transient_returns_fresh_instances() {
        let container = Container::new();
        container.register(Provider::class::<Counted>().transient());
        let first = container.resolve::<Counted>().await.unwrap();
        let second = container.resolve::<Counted>().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.0, second.0);
        assert!(!container.is_resolved(&Token::of::<Counted>()));
    }

    #[tokio::test]
    async fn test_circular_dependency_fails() {
        let container = Container::new();
        container.register(Provider::class::<Left>());
        container.register(Provider::class::<Right>());

        let error = container.resolve::<Left>().await.err().unwrap();
        let ResolveError::Circular { chain } = &error else {
            panic!("expected a circular error, got {error:?}");
        };
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.first(), chain.last());
        assert!(error.to_string().starts_with("Circular dependency detected"));

        assert!(matches!(container.validate(), Err(ResolveError::Circular { .. })));
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let container = Container::new();
        container.register(Provider::class::<UserService>());
        let error = container.resolve::<UserService>().await.err().unwrap();
        assert!(matches!(error, ResolveError::NotFound { .. }));
        assert!(matches!(container.validate(), Err(ResolveError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_failure_leaves_container_usable() {
        let container = container();
        container.register(Provider::class::<Failing>());
        assert!(container.resolve::<Failing>().await.is_err());
        assert!(!container.is_resolved(&Token::of::<Failing>()));
        assert!(container.resolve::<UserService>().await.is_ok());

        container.register(Provider::value(Token::of::<Failing>(), 7_u8));
        let token = Token::of::<Failing>();
        assert_eq!(*container.resolve_token::<u8>(&token).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_lazy_value_replaced_in_place() {
        let container = Container::new();
        let token = Token::named("greeting");
        container.register(Provider::value(token.clone(), String::from("hello")));
        assert!(!container.is_resolved(&token));

        let first = container.resolve_token::<String>(&token).await.unwrap();
        assert_eq!(first.as_str(), "hello");
        assert!(container.is_resolved(&token));
        let second = container.resolve_token::<String>(&token).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_alias_and_use_class() {
        let container = container();
        let alias = Token::named("db");
        container.register(Provider::existing(alias.clone(), Token::of::<Database>()));
        container.register(Provider::use_class::<UserService>(Token::named("users")));

        let db = container.resolve::<Database>().await.unwrap();
        let aliased = container.resolve_token::<Database>(&alias).await.unwrap();
        assert!(Arc::ptr_eq(&db, &aliased));

        let users = container
            .resolve_token::<UserService>(&Token::named("users"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&users.db, &db));
    }

    #[tokio::test]
    async fn test_factory_receives_dependencies() {
        let container = container();
        let token = Token::named("db-present");
        container.register(Provider::factory(
            token.clone(),
            vec![Dependency::service::<Database>("db")],
            |deps: Dependencies| async move { Ok(deps.service::<Database>("db").is_ok()) },
        ));
        assert!(*container.resolve_token::<bool>(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let container = container();
        let error = container
            .resolve_token::<String>(&Token::of::<Database>())
            .await
            .err()
            .unwrap();
        assert!(matches!(error, ResolveError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_out_of_scope_names_service() {
        let container = container();
        container.add_module(ModuleDef::new("storage").provider(Token::of::<Database>()));
        container.add_module(ModuleDef::new("users").provider(Token::of::<UserService>()));

        let error = container.resolve::<UserService>().await.err().unwrap();
        let ResolveError::OutOfScope { service, module, .. } = &error else {
            panic!("expected a scope error, got {error:?}");
        };
        assert!(service.contains("Database"));
        assert_eq!(module, "users");
        assert!(container.validate().is_err());
    }

    #[tokio::test]
    async fn test_import_makes_exports_visible() {
        let container = container();
        container.add_module(
            ModuleDef::new("storage")
                .provider(Token::of::<Database>())
                .export(Token::of::<Database>()),
        );
        container.add_module(
            ModuleDef::new("users")
                .provider(Token::of::<UserService>())
                .import("storage"),
        );
        assert!(container.resolve::<UserService>().await.is_ok());
        assert!(container.validate().is_ok());
    }

    #[tokio::test]
    async fn test_global_module_visible_everywhere() {
        let container = container();
        container.add_module(ModuleDef::new("storage").provider(Token::of::<Database>()).global());
        container.add_module(ModuleDef::new("users").provider(Token::of::<UserService>()));
        assert!(container.resolve::<UserService>().await.is_ok());
        let scope = container.search_scope(&Token::of::<UserService>()).unwrap();
        assert!(scope.contains(&Token::of::<Database>()));
        assert!(container.search_scope(&Token::named("loose")).is_none());
    }

    #[tokio::test]
    async fn test_request_scope_requires_holder() {
        let container = Container::new();
        container.register(Provider::class::<Counted>().request_scoped());
        let error = container.resolve::<Counted>().await.err().unwrap();
        assert!(matches!(error, ResolveError::NoRequestContext { .. }));
    }

    #[tokio::test]
    async fn test_request_scope_shared_within_request() {
        let container = Arc::new(Container::new());
        container.register(Provider::class::<Counted>().request_scoped());

        let resolve_twice = |container: Arc<Container>| async move {
            let first = container.resolve::<Counted>().await.unwrap();
            let second = container.resolve::<Counted>().await.unwrap();
            assert!(Arc::ptr_eq(&first, &second));
            first
        };

        let one = holder_for(Request::builder().build())
            .scope(resolve_twice(Arc::clone(&container)))
            .await;
        let two = holder_for(Request::builder().build())
            .scope(resolve_twice(Arc::clone(&container)))
            .await;
        assert_ne!(one.0, two.0);
    }

    #[tokio::test]
    async fn test_context_dependencies() {
        let container = Container::new();
        container.register(Provider::class::<Greeting>().transient());

        let outside = container.resolve::<Greeting>().await.unwrap();
        assert!(outside.user.is_none());

        let request = Request::builder().header("x-user", "ada").build();
        let greeting = holder_for(request)
            .scope(async { container.resolve::<Greeting>().await.unwrap() })
            .await;
        assert_eq!(greeting.user.as_deref(), Some("ada"));
    }

    #[tokio::test]
    async fn test_custom_context_resolver() {
        let container = Container::new();
        container.register(Provider::class::<Greeting>().transient());
        container.set_context_resolver(|_, _| Some(Arc::new(String::from("fixed")) as Instance));

        let greeting = holder_for(Request::builder().build())
            .scope(async { container.resolve::<Greeting>().await.unwrap() })
            .await;
        assert_eq!(greeting.user.as_deref(), Some("fixed"));
    }

    #[tokio::test]
    async fn test_call_actions() {
        let container = container();
        container.register(
            Provider::class::<UserService>()
                .action_sync("sync", vec![], |_: &UserService, _| Ok(Reply::text("sync")))
                .action(
                    "async",
                    vec![Dependency::service::<Database>("db")],
                    |service: Arc<UserService>, deps: Dependencies| async move {
                        let db = deps.service::<Database>("db")?;
                        Ok(Reply::json(serde_json::json!({
                            "same": Arc::ptr_eq(&service.db, &db)
                        })))
                    },
                ),
        );
        let token = Token::of::<UserService>();

        let reply = container.call(&token, "sync").await.unwrap();
        assert!(matches!(reply, Reply::Text(ref text) if text == "sync"));

        let reply = container.call(&token, "async").await.unwrap();
        assert!(matches!(reply, Reply::Value(ref v) if v["same"] == true));

        let error = container.call(&token, "missing").await.unwrap_err();
        assert!(error.message().contains("missing"));
    }

    #[tokio::test]
    async fn test_concurrent_first_resolution_yields_one_instance() {
        let container = Arc::new(container());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let container = Arc::clone(&container);
            tasks.push(tokio::spawn(async move {
                container.resolve::<UserService>().await.unwrap()
            }));
        }
        let mut instances = Vec::new();
        for task in tasks {
            instances.push(task.await.unwrap());
        }
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_register_replaces_and_evicts() {
        let container = container();
        tokio_test::block_on(container.resolve::<Database>()).unwrap();
        assert!(container.is_resolved(&Token::of::<Database>()));
        container.register(Provider::class::<Database>());
        assert!(!container.is_resolved(&Token::of::<Database>()));
        assert_eq!(container.tokens().len(), 2);
    }
}
