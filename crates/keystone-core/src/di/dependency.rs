//! Declared dependencies and the resolved argument bag.

use super::{Instance, ResolveError, Token};
use crate::error::KeystoneError;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::sync::Arc;

/// Request-derived values that can be injected without a provider.
///
/// Keyed variants (`Header`, `Cookie`, `Session`, `Param`, `Query`) look up
/// the dependency's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    /// The [`Request`](crate::Request).
    Request,
    /// The [`Response`](crate::Response).
    Response,
    /// The [`ExecutionContext`](crate::ExecutionContext).
    Context,
    /// The raw body as [`Bytes`].
    Body,
    /// One header value as `String`.
    Header,
    /// All headers as `HashMap<String, String>`.
    Headers,
    /// One cookie value as `String`.
    Cookie,
    /// All cookies as `HashMap<String, String>`.
    Cookies,
    /// One session value as `serde_json::Value`.
    Session,
    /// The whole [`Session`](crate::Session).
    Sessions,
    /// One route parameter as `String`.
    Param,
    /// All route parameters as `HashMap<String, String>`.
    Params,
    /// One query parameter as `String`.
    Query,
    /// All query parameters as `HashMap<String, String>`.
    Queries,
}

/// What a dependency resolves against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyKind {
    /// Another provider.
    Service(Token),
    /// A value derived from the current request.
    Context(ContextKey),
}

/// A named dependency declared by a provider, action or factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// The argument name.
    pub name: Arc<str>,
    /// What the argument resolves against.
    pub kind: DependencyKind,
}

impl Dependency {
    /// Declares a dependency on the provider registered for type `T`.
    #[must_use]
    pub fn service<T: ?Sized + 'static>(name: impl Into<Arc<str>>) -> Self {
        Self::token(name, Token::of::<T>())
    }

    /// Declares a dependency on an arbitrary token.
    #[must_use]
    pub fn token(name: impl Into<Arc<str>>, token: Token) -> Self {
        Self {
            name: name.into(),
            kind: DependencyKind::Service(token),
        }
    }

    /// Declares a context dependency.
    #[must_use]
    pub fn context(name: impl Into<Arc<str>>, key: ContextKey) -> Self {
        Self {
            name: name.into(),
            kind: DependencyKind::Context(key),
        }
    }

    /// Declares a dependency on one request header.
    #[must_use]
    pub fn header(name: impl Into<Arc<str>>) -> Self {
        Self::context(name, ContextKey::Header)
    }

    /// Declares a dependency on one cookie.
    #[must_use]
    pub fn cookie(name: impl Into<Arc<str>>) -> Self {
        Self::context(name, ContextKey::Cookie)
    }

    /// Declares a dependency on one route parameter.
    #[must_use]
    pub fn param(name: impl Into<Arc<str>>) -> Self {
        Self::context(name, ContextKey::Param)
    }

    /// Declares a dependency on one query parameter.
    #[must_use]
    pub fn query(name: impl Into<Arc<str>>) -> Self {
        Self::context(name, ContextKey::Query)
    }

    /// Declares a dependency on the request body.
    #[must_use]
    pub fn body(name: impl Into<Arc<str>>) -> Self {
        Self::context(name, ContextKey::Body)
    }

    /// Returns the service token, for service dependencies.
    #[must_use]
    pub const fn service_token(&self) -> Option<&Token> {
        match &self.kind {
            DependencyKind::Service(token) => Some(token),
            DependencyKind::Context(_) => None,
        }
    }
}

/// Resolved dependencies, keyed by argument name.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    values: IndexMap<Arc<str>, Option<Instance>>,
}

impl Dependencies {
    /// Creates an empty argument bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a resolved value. `None` marks a context value that was absent.
    pub fn insert(&mut self, name: Arc<str>, value: Option<Instance>) {
        self.values.insert(name, value);
    }

    /// Returns the raw resolved value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.values.get(name).and_then(Option::as_ref)
    }

    /// Returns `true` if `name` was declared, whether or not it resolved.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Returns the number of declared arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no arguments were declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a required service dependency.
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ResolveError> {
        let instance = self
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::MissingDependency {
                name: name.to_string(),
            })?;
        instance
            .downcast::<T>()
            .map_err(|_| ResolveError::type_mismatch::<T>(name))
    }

    /// Returns an optional context dependency.
    pub fn context<T: Any + Send + Sync>(
        &self,
        name: &str,
    ) -> Result<Option<Arc<T>>, ResolveError> {
        self.get(name)
            .cloned()
            .map(|instance| {
                instance
                    .downcast::<T>()
                    .map_err(|_| ResolveError::type_mismatch::<T>(name))
            })
            .transpose()
    }

    /// Returns a context string value (header, cookie, param or query).
    pub fn string(&self, name: &str) -> Result<Option<String>, ResolveError> {
        Ok(self.context::<String>(name)?.map(|value| value.as_ref().clone()))
    }

    /// Deserializes the body dependency `name` as JSON.
    pub fn body<T: DeserializeOwned>(&self, name: &str) -> Result<T, KeystoneError> {
        let body = self.context::<Bytes>(name)?.unwrap_or_default();
        serde_json::from_slice(&body)
            .map_err(|e| KeystoneError::bad_request(format!("Invalid request body: {e}")))
    }
}

/// A type the container can construct.
///
/// # Example
///
/// ```
/// use keystone_core::di::{Dependencies, Dependency, Injectable, ResolveError};
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
/// struct UserRepository {
///     db: Arc<Database>,
/// }
///
/// impl Injectable for UserRepository {
///     fn dependencies() -> Vec<Dependency> {
///         vec![Dependency::service::<Database>("db")]
///     }
///
///     fn construct(deps: &Dependencies) -> Result<Self, ResolveError> {
///         Ok(Self { db: deps.service("db")? })
///     }
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Declares the dependencies injected into [`construct`](Self::construct).
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    /// Builds an instance from its resolved dependencies.
    fn construct(deps: &Dependencies) -> Result<Self, ResolveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_downcast() {
        let mut deps = Dependencies::new();
        deps.insert(Arc::from("count"), Some(Arc::new(5_u32)));
        assert_eq!(*deps.service::<u32>("count").unwrap(), 5);
        assert!(matches!(
            deps.service::<String>("count"),
            Err(ResolveError::TypeMismatch { .. })
        ));
        assert!(matches!(
            deps.service::<u32>("other"),
            Err(ResolveError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_absent_context_value() {
        let mut deps = Dependencies::new();
        deps.insert(Arc::from("x-user"), None);
        assert!(deps.contains("x-user"));
        assert!(deps.string("x-user").unwrap().is_none());
    }

    #[test]
    fn test_body_deserializes() {
        let mut deps = Dependencies::new();
        deps.insert(
            Arc::from("body"),
            Some(Arc::new(Bytes::from_static(br#"{"name":"Ada"}"#))),
        );
        let value: serde_json::Value = deps.body("body").unwrap();
        assert_eq!(value["name"], "Ada");

        deps.insert(Arc::from("body"), Some(Arc::new(Bytes::from_static(b"not json"))));
        let error = deps.body::<serde_json::Value>("body").unwrap_err();
        assert_eq!(error.status_code(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_dependency_constructors() {
        assert_eq!(
            Dependency::header("authorization").kind,
            DependencyKind::Context(ContextKey::Header)
        );
        assert!(Dependency::service::<String>("s").service_token().is_some());
        assert!(Dependency::param("id").service_token().is_none());
    }
}
