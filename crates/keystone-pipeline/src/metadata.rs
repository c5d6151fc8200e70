//! Enhancer metadata.
//!
//! The pipeline does not discover guards, interceptors or filters itself. A
//! [`MetadataSource`] hands it the already-declared lists for the handler,
//! class, module and global levels, and the stages concatenate them in
//! [`EnhancerScope::ORDER`].

use crate::filter::FilterRef;
use crate::guard::GuardRef;
use crate::interceptor::InterceptorRef;
use keystone_core::{ExecutionContext, Token};
use std::collections::HashMap;
use std::sync::Arc;

/// The level an enhancer was declared at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnhancerScope {
    /// A single handler.
    Handler,
    /// Every handler of a controller class.
    Class,
    /// Every controller of a module.
    Module,
    /// Every route.
    Global,
}

impl EnhancerScope {
    /// Concatenation order: handler-specific entries run first.
    pub const ORDER: [Self; 4] = [Self::Handler, Self::Class, Self::Module, Self::Global];
}

/// The enhancers declared at one level.
#[derive(Debug, Clone, Default)]
pub struct EnhancerSet {
    /// Guards.
    pub guards: Vec<GuardRef>,
    /// Interceptors.
    pub interceptors: Vec<InterceptorRef>,
    /// Exception filters.
    pub filters: Vec<FilterRef>,
}

/// Supplies the enhancers that apply to an execution context.
pub trait MetadataSource: Send + Sync + 'static {
    /// Returns the enhancers declared at `scope` for the handler in `ctx`.
    fn enhancers(&self, ctx: &ExecutionContext, scope: EnhancerScope) -> EnhancerSet;

    /// All guards for `ctx`, in [`EnhancerScope::ORDER`].
    fn guards(&self, ctx: &ExecutionContext) -> Vec<GuardRef> {
        EnhancerScope::ORDER
            .iter()
            .flat_map(|scope| self.enhancers(ctx, *scope).guards)
            .collect()
    }

    /// All interceptors for `ctx`, in [`EnhancerScope::ORDER`].
    fn interceptors(&self, ctx: &ExecutionContext) -> Vec<InterceptorRef> {
        EnhancerScope::ORDER
            .iter()
            .flat_map(|scope| self.enhancers(ctx, *scope).interceptors)
            .collect()
    }

    /// All exception filters for `ctx`, in [`EnhancerScope::ORDER`].
    fn filters(&self, ctx: &ExecutionContext) -> Vec<FilterRef> {
        EnhancerScope::ORDER
            .iter()
            .flat_map(|scope| self.enhancers(ctx, *scope).filters)
            .collect()
    }
}

/// Where an enhancer is attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// One action of a controller.
    Handler {
        /// The controller token, `None` for callback routes.
        class: Option<Token>,
        /// The action or callback name.
        action: Arc<str>,
    },
    /// A controller.
    Class(Token),
    /// A module.
    Module(Arc<str>),
    /// Every route.
    Global,
}

impl Target {
    /// Targets action `action` of controller `C`.
    #[must_use]
    pub fn handler<C: 'static>(action: &str) -> Self {
        Self::Handler {
            class: Some(Token::of::<C>()),
            action: Arc::from(action),
        }
    }

    /// Targets controller `C`.
    #[must_use]
    pub fn class<C: 'static>() -> Self {
        Self::Class(Token::of::<C>())
    }

    /// Targets a module.
    #[must_use]
    pub fn module(name: &str) -> Self {
        Self::Module(Arc::from(name))
    }

    fn for_context(ctx: &ExecutionContext, scope: EnhancerScope) -> Option<Self> {
        match scope {
            EnhancerScope::Handler => Some(Self::Handler {
                class: ctx.class().cloned(),
                action: Arc::from(ctx.handler()),
            }),
            EnhancerScope::Class => ctx.class().cloned().map(Self::Class),
            EnhancerScope::Module => ctx.module().map(|m| Self::Module(Arc::from(m))),
            EnhancerScope::Global => Some(Self::Global),
        }
    }
}

/// In-memory [`MetadataSource`].
///
/// # Example
///
/// ```
/// use keystone_pipeline::{EnhancerRegistry, GuardRef, Target};
///
/// struct UsersController;
///
/// let registry = EnhancerRegistry::new()
///     .guard(Target::Global, GuardRef::from_fn("AuthGuard", |_| async { Ok(true) }))
///     .guard(Target::handler::<UsersController>("delete"), GuardRef::from_fn("AdminGuard", |_| async { Ok(false) }));
///
/// assert_eq!(registry.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnhancerRegistry {
    sets: HashMap<Target, EnhancerSet>,
}

impl EnhancerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a guard.
    #[must_use]
    pub fn guard(mut self, target: Target, guard: GuardRef) -> Self {
        self.sets.entry(target).or_default().guards.push(guard);
        self
    }

    /// Attaches an interceptor.
    #[must_use]
    pub fn interceptor(mut self, target: Target, interceptor: InterceptorRef) -> Self {
        self.sets
            .entry(target)
            .or_default()
            .interceptors
            .push(interceptor);
        self
    }

    /// Attaches an exception filter.
    #[must_use]
    pub fn filter(mut self, target: Target, filter: FilterRef) -> Self {
        self.sets.entry(target).or_default().filters.push(filter);
        self
    }

    /// Returns the enhancers attached to `target`.
    #[must_use]
    pub fn get(&self, target: &Target) -> Option<&EnhancerSet> {
        self.sets.get(target)
    }

    /// Returns the number of attached enhancers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets
            .values()
            .map(|set| set.guards.len() + set.interceptors.len() + set.filters.len())
            .sum()
    }

    /// Returns `true` if nothing is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataSource for EnhancerRegistry {
    fn enhancers(&self, ctx: &ExecutionContext, scope: EnhancerScope) -> EnhancerSet {
        Target::for_context(ctx, scope)
            .and_then(|target| self.sets.get(&target).cloned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::Guard;
    use keystone_core::Request;

    struct UsersController;

    fn named(name: &'static str) -> GuardRef {
        GuardRef::from_fn(name, |_| async { Ok(true) })
    }

    #[test]
    fn test_scope_order() {
        assert_eq!(EnhancerScope::ORDER[0], EnhancerScope::Handler);
        assert_eq!(EnhancerScope::ORDER[3], EnhancerScope::Global);
    }

    #[tokio::test]
    async fn test_guards_concatenated_handler_first() {
        let registry = EnhancerRegistry::new()
            .guard(Target::Global, named("global"))
            .guard(Target::module("users"), named("module"))
            .guard(Target::class::<UsersController>(), named("class"))
            .guard(Target::handler::<UsersController>("list"), named("handler"))
            .guard(Target::handler::<UsersController>("other"), named("unrelated"));

        let ctx = ExecutionContext::builder(Request::builder().build())
            .module("users")
            .class(Token::of::<UsersController>())
            .handler("list")
            .build();

        let container = keystone_core::Container::new();
        let mut names = Vec::new();
        for guard in registry.guards(&ctx) {
            names.push(guard.resolve(&container).await.unwrap().name().to_string());
        }
        assert_eq!(names, ["handler", "class", "module", "global"]);
    }

    #[test]
    fn test_callback_route_gets_handler_and_global() {
        let registry = EnhancerRegistry::new()
            .guard(Target::Global, named("global"))
            .guard(
                Target::Handler {
                    class: None,
                    action: Arc::from("health"),
                },
                named("health"),
            );
        let ctx = ExecutionContext::builder(Request::builder().build())
            .handler("health")
            .build();
        assert_eq!(registry.guards(&ctx).len(), 2);
        assert!(registry.interceptors(&ctx).is_empty());
    }
}
