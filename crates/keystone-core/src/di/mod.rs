//! Dependency injection.
//!
//! Providers are registered against [`Token`]s, grouped into modules for
//! visibility, and resolved asynchronously through the [`Container`].
//!
//! - [`Provider::class`] constructs an [`Injectable`] type.
//! - [`Provider::value`], [`Provider::existing`], [`Provider::use_class`] and
//!   [`Provider::factory`] register lazy descriptors, resolved on first use.
//! - [`Scope`] decides whether an instance is shared, fresh on every
//!   resolution, or shared within one request.

mod container;
mod dependency;
mod error;
mod module;
mod provider;
mod token;

pub use container::{default_context_resolver, Container, ContextResolver};
pub use dependency::{ContextKey, Dependencies, Dependency, DependencyKind, Injectable};
pub use error::ResolveError;
pub use module::ModuleDef;
pub use provider::{Action, Provider, Scope};
pub use token::{short_type_name, Instance, Token};
