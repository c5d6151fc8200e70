//! Provider registrations.
//!
//! A [`Provider`] maps a [`Token`] to a recipe for building its instance and a
//! [`Scope`] deciding how long that instance lives. Controller providers also
//! carry named actions that the router invokes through
//! [`Container::call`](super::Container::call).

use super::{Dependencies, Dependency, Injectable, Instance, ResolveError, Token};
use crate::error::KeystoneError;
use crate::reply::Reply;
use crate::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    /// One instance for the lifetime of the container.
    #[default]
    Singleton,
    /// A fresh instance on every resolution.
    Transient,
    /// One instance per in-flight request.
    Request,
}

pub(crate) type ConstructFn =
    Arc<dyn Fn(&Dependencies) -> Result<Instance, ResolveError> + Send + Sync>;
pub(crate) type FactoryFn =
    Arc<dyn Fn(Dependencies) -> BoxFuture<'static, Result<Instance, ResolveError>> + Send + Sync>;
type ActionFuture = BoxFuture<'static, Result<Reply, KeystoneError>>;
type ActionFn = Arc<dyn Fn(Instance, Dependencies) -> ActionFuture + Send + Sync>;

/// How a class is constructed.
#[derive(Clone)]
pub(crate) struct ClassRecipe {
    pub(crate) type_name: &'static str,
    pub(crate) deps: Vec<Dependency>,
    pub(crate) construct: ConstructFn,
}

impl ClassRecipe {
    fn of<T: Injectable>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            deps: T::dependencies(),
            construct: Arc::new(|deps: &Dependencies| {
                T::construct(deps).map(|value| Arc::new(value) as Instance)
            }),
        }
    }
}

/// How a provider's instance is obtained.
#[derive(Clone)]
pub(crate) enum Recipe {
    /// Construct the implementation class.
    Class(ClassRecipe),
    /// A literal value.
    Value(Instance),
    /// An alias to another token.
    Existing(Token),
    /// A substitute class registered under a different token.
    UseClass(ClassRecipe),
    /// A factory invoked with its own injected arguments.
    Factory {
        inject: Vec<Dependency>,
        call: FactoryFn,
    },
}

impl Recipe {
    /// Service tokens this recipe depends on.
    pub(crate) fn edges(&self) -> Vec<&Token> {
        match self {
            Self::Class(class) | Self::UseClass(class) => {
                class.deps.iter().filter_map(Dependency::service_token).collect()
            }
            Self::Factory { inject, .. } => {
                inject.iter().filter_map(Dependency::service_token).collect()
            }
            Self::Existing(target) => vec![target],
            Self::Value(_) => Vec::new(),
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Class(_) => "class",
            Self::Value(_) => "value",
            Self::Existing(_) => "existing",
            Self::UseClass(_) => "use_class",
            Self::Factory { .. } => "factory",
        }
    }
}

/// A named controller action.
#[derive(Clone)]
pub struct Action {
    name: Arc<str>,
    deps: Vec<Dependency>,
    call: ActionFn,
}

impl Action {
    /// Returns the action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the dependencies injected into the action.
    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.deps
    }

    pub(crate) fn invoke(
        &self,
        instance: Instance,
        deps: Dependencies,
    ) -> BoxFuture<'static, Result<Reply, KeystoneError>> {
        (self.call)(instance, deps)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

/// A provider registration.
///
/// # Example
///
/// ```
/// use keystone_core::di::{Dependencies, Injectable, Provider, ResolveError, Token};
/// use keystone_core::Reply;
///
/// struct HealthController;
///
/// impl Injectable for HealthController {
///     fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
///         Ok(Self)
///     }
/// }
///
/// let provider = Provider::class::<HealthController>()
///     .action_sync("check", vec![], |_: &HealthController, _| Ok(Reply::text("ok")));
///
/// let config = Provider::value(Token::named("greeting"), String::from("hello"));
/// assert!(provider.has_action("check"));
/// assert!(config.is_lazy());
/// ```
#[derive(Clone)]
pub struct Provider {
    pub(crate) token: Token,
    pub(crate) recipe: Recipe,
    pub(crate) scope: Scope,
    pub(crate) actions: HashMap<Arc<str>, Action>,
}

impl Provider {
    /// Registers `T` as an implementation class under its own type token.
    #[must_use]
    pub fn class<T: Injectable>() -> Self {
        Self {
            token: Token::of::<T>(),
            recipe: Recipe::Class(ClassRecipe::of::<T>()),
            scope: Scope::Singleton,
            actions: HashMap::new(),
        }
    }

    /// A lazy provider resolving to a literal value.
    #[must_use]
    pub fn value<V: Any + Send + Sync>(token: Token, value: V) -> Self {
        Self::lazy(token, Recipe::Value(Arc::new(value)))
    }

    /// A lazy provider resolving to an already-shared instance.
    #[must_use]
    pub fn instance(token: Token, instance: Instance) -> Self {
        Self::lazy(token, Recipe::Value(instance))
    }

    /// A lazy alias: resolving `token` resolves `target`.
    #[must_use]
    pub fn existing(token: Token, target: Token) -> Self {
        Self::lazy(token, Recipe::Existing(target))
    }

    /// A lazy provider constructing `T` on behalf of `token`.
    #[must_use]
    pub fn use_class<T: Injectable>(token: Token) -> Self {
        Self::lazy(token, Recipe::UseClass(ClassRecipe::of::<T>()))
    }

    /// A lazy provider built by an async factory from its injected arguments.
    #[must_use]
    pub fn factory<F, Fut, V>(token: Token, inject: Vec<Dependency>, factory: F) -> Self
    where
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ResolveError>> + Send + 'static,
        V: Any + Send + Sync,
    {
        let factory = Arc::new(factory);
        let call: FactoryFn = Arc::new(
            move |deps: Dependencies| -> BoxFuture<'static, Result<Instance, ResolveError>> {
                let fut = factory(deps);
                Box::pin(async move { fut.await.map(|value| Arc::new(value) as Instance) })
            },
        );
        Self::lazy(token, Recipe::Factory { inject, call })
    }

    fn lazy(token: Token, recipe: Recipe) -> Self {
        Self {
            token,
            recipe,
            scope: Scope::Singleton,
            actions: HashMap::new(),
        }
    }

    /// Registers this provider under a different token.
    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    /// Sets the scope.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Shorthand for `scope(Scope::Singleton)`.
    #[must_use]
    pub fn singleton(self) -> Self {
        self.scope(Scope::Singleton)
    }

    /// Shorthand for `scope(Scope::Transient)`.
    #[must_use]
    pub fn transient(self) -> Self {
        self.scope(Scope::Transient)
    }

    /// Shorthand for `scope(Scope::Request)`.
    #[must_use]
    pub fn request_scoped(self) -> Self {
        self.scope(Scope::Request)
    }

    /// Adds an asynchronous action.
    ///
    /// The action receives the provider instance and its own resolved
    /// dependencies. It is awaited when invoked.
    #[must_use]
    pub fn action<T, F, Fut>(mut self, name: &str, deps: Vec<Dependency>, action: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>, Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, KeystoneError>> + Send + 'static,
    {
        let token = self.token.clone();
        let action = Arc::new(action);
        let call: ActionFn = Arc::new(
            move |instance: Instance, deps: Dependencies| -> ActionFuture {
                match instance.downcast::<T>() {
                    Ok(target) => Box::pin(action(target, deps)),
                    Err(_) => {
                        let error: KeystoneError =
                            ResolveError::type_mismatch::<T>(token.name()).into();
                        Box::pin(std::future::ready(Err::<Reply, _>(error)))
                    }
                }
            },
        );
        self.insert_action(name, deps, call);
        self
    }

    /// Adds a synchronous action. It is called directly when invoked.
    #[must_use]
    pub fn action_sync<T, F>(mut self, name: &str, deps: Vec<Dependency>, action: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &Dependencies) -> Result<Reply, KeystoneError> + Send + Sync + 'static,
    {
        let token = self.token.clone();
        let call: ActionFn = Arc::new(
            move |instance: Instance, deps: Dependencies| -> ActionFuture {
                let result: Result<Reply, KeystoneError> = match instance.downcast_ref::<T>() {
                    Some(target) => action(target, &deps),
                    None => Err(ResolveError::type_mismatch::<T>(token.name()).into()),
                };
                Box::pin(std::future::ready(result))
            },
        );
        self.insert_action(name, deps, call);
        self
    }

    fn insert_action(&mut self, name: &str, deps: Vec<Dependency>, call: ActionFn) {
        let name: Arc<str> = Arc::from(name);
        self.actions
            .insert(Arc::clone(&name), Action { name, deps, call });
    }

    /// Returns the token.
    #[must_use]
    pub const fn token(&self) -> &Token {
        &self.token
    }

    /// Returns the scope.
    #[must_use]
    pub const fn provider_scope(&self) -> Scope {
        self.scope
    }

    /// Returns the named action.
    #[must_use]
    pub fn action_named(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Returns `true` if this provider has an action named `name`.
    #[must_use]
    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Returns `true` for lazy descriptors (value, alias, substitute class,
    /// factory).
    #[must_use]
    pub const fn is_lazy(&self) -> bool {
        !matches!(self.recipe, Recipe::Class(_))
    }

    /// Service tokens this provider and its actions depend on.
    pub(crate) fn edges(&self) -> Vec<&Token> {
        let mut edges = self.recipe.edges();
        for action in self.actions.values() {
            edges.extend(action.deps.iter().filter_map(Dependency::service_token));
        }
        edges
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let implementation = match &self.recipe {
            Recipe::Class(class) | Recipe::UseClass(class) => class.type_name,
            _ => "",
        };
        f.debug_struct("Provider")
            .field("token", &self.token)
            .field("recipe", &self.recipe.label())
            .field("implementation", &implementation)
            .field("scope", &self.scope)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}
