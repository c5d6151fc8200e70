//! Middleware registration and route matching.
//!
//! Middleware is registered against route patterns, optionally limited to a
//! set of HTTP methods and with exclusion patterns. Patterns are compiled to
//! regular expressions anchored at the start of the path:
//!
//! | Pattern | Matches |
//! |---|---|
//! | `/`, `*`, `/*` | every path |
//! | `/users` | `/users` and everything below it |
//! | `/users/:id` | `/users/42`, `/users/42/posts` |
//! | `/files/*` | anything starting with `/files/` |
//!
//! Global middleware (registered without a module) runs before module
//! middleware; otherwise registration order is preserved.

use crate::middleware::MiddlewareRef;
use http::Method;
use indexmap::IndexMap;
use keystone_core::KeystoneError;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::sync::Arc;

/// The maximum number of cached `(method, path)` match results.
pub const MATCH_CACHE_SIZE: usize = 1024;

/// The HTTP methods a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MethodFilter {
    /// Every method (`ALL` / `ANY`).
    #[default]
    All,
    /// Only the listed methods.
    Only(Vec<Method>),
}

impl MethodFilter {
    /// Returns `true` if `method` is accepted.
    #[must_use]
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::All => true,
            Self::Only(methods) => methods.contains(method),
        }
    }

    /// Parses method names; `ALL` or `ANY` accepts every method.
    pub fn parse<I, S>(names: I) -> Result<Self, KeystoneError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut methods = Vec::new();
        for name in names {
            let name = name.as_ref().to_ascii_uppercase();
            if name == "ALL" || name == "ANY" {
                return Ok(Self::All);
            }
            let method = Method::from_bytes(name.as_bytes()).map_err(|_| {
                KeystoneError::configuration(format!("Invalid HTTP method: {name}"))
            })?;
            methods.push(method);
        }
        Ok(if methods.is_empty() {
            Self::All
        } else {
            Self::Only(methods)
        })
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        Self::Only(vec![method])
    }
}

impl From<Vec<Method>> for MethodFilter {
    fn from(methods: Vec<Method>) -> Self {
        if methods.is_empty() {
            Self::All
        } else {
            Self::Only(methods)
        }
    }
}

/// A route pattern with the methods it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    /// The path pattern.
    pub path: String,
    /// The accepted methods.
    pub methods: MethodFilter,
}

impl RouteRule {
    /// A rule for every method.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            methods: MethodFilter::All,
        }
    }

    /// A rule limited to `methods`.
    #[must_use]
    pub fn with_methods(path: impl Into<String>, methods: impl Into<MethodFilter>) -> Self {
        Self {
            path: path.into(),
            methods: methods.into(),
        }
    }
}

impl From<&str> for RouteRule {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for RouteRule {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl<M: Into<MethodFilter>> From<(&str, M)> for RouteRule {
    fn from((path, methods): (&str, M)) -> Self {
        Self::with_methods(path, methods)
    }
}

/// Compiles a route pattern.
///
/// `:name` segments match one path segment, `*` matches anything, and
/// patterns that do not end in a wildcard also match every path below them.
pub fn compile_pattern(path: &str) -> Result<Regex, KeystoneError> {
    let path = normalize_path(path);
    if matches!(path.as_str(), "/" | "/*" | "*") {
        return compile("^/.*$");
    }

    let mut body = String::with_capacity(path.len() * 2);
    let mut chars = path.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            ':' => {
                while chars
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_')
                {
                    chars.next();
                }
                body.push_str("[^/]+");
            }
            '*' => body.push_str(".*"),
            other => body.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    if !body.ends_with(".*") {
        body.push_str("(?:/.*)?");
    }
    compile(&format!("^{body}$"))
}

fn compile(pattern: &str) -> Result<Regex, KeystoneError> {
    Regex::new(pattern).map_err(|e| {
        KeystoneError::configuration(format!("Invalid route pattern {pattern}: {e}"))
    })
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[derive(Debug, Clone)]
struct Registration {
    middleware: MiddlewareRef,
    routes: Vec<RouteRule>,
    excludes: Vec<RouteRule>,
    module: Option<Arc<str>>,
    order: usize,
}

#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    methods: MethodFilter,
}

impl CompiledRule {
    fn new(rule: &RouteRule) -> Result<Self, KeystoneError> {
        Ok(Self {
            regex: compile_pattern(&rule.path)?,
            methods: rule.methods.clone(),
        })
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        self.methods.matches(method) && self.regex.is_match(path)
    }
}

#[derive(Debug)]
struct CompiledEntry {
    middleware: MiddlewareRef,
    routes: Vec<CompiledRule>,
    excludes: Vec<CompiledRule>,
}

impl CompiledEntry {
    fn matches(&self, method: &Method, path: &str) -> bool {
        self.routes.iter().any(|rule| rule.matches(method, path))
            && !self.excludes.iter().any(|rule| rule.matches(method, path))
    }
}

/// Middleware registrations and their route rules.
///
/// # Example
///
/// ```
/// use http::Method;
/// use keystone_pipeline::{MiddlewareRef, MiddlewareRegistry};
///
/// let logger = MiddlewareRef::from_fn("logger", |_, _, next| async move { next.run().await });
///
/// let mut registry = MiddlewareRegistry::new();
/// registry
///     .apply([logger])
///     .for_routes(["/users"])
///     .exclude([("/users/health", Method::GET)]);
///
/// assert_eq!(registry.matching(&Method::GET, "/users/1").unwrap().len(), 1);
/// assert!(registry.matching(&Method::GET, "/users/health").unwrap().is_empty());
/// assert!(registry.matching(&Method::GET, "/orders").unwrap().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MiddlewareRegistry {
    registrations: Vec<Registration>,
    compiled: RwLock<Option<Arc<[CompiledEntry]>>>,
    cache: Mutex<IndexMap<(Method, String), Arc<[usize]>>>,
}

impl MiddlewareRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers global middleware. Until configured with
    /// [`for_routes`](MiddlewareConfig::for_routes) it applies to every route.
    pub fn apply<I>(&mut self, middleware: I) -> MiddlewareConfig<'_>
    where
        I: IntoIterator<Item = MiddlewareRef>,
    {
        self.apply_in(None, middleware)
    }

    /// Registers middleware on behalf of a module. Module middleware runs
    /// after global middleware.
    pub fn apply_for_module<I>(&mut self, module: &str, middleware: I) -> MiddlewareConfig<'_>
    where
        I: IntoIterator<Item = MiddlewareRef>,
    {
        self.apply_in(Some(Arc::from(module)), middleware)
    }

    fn apply_in<I>(&mut self, module: Option<Arc<str>>, middleware: I) -> MiddlewareConfig<'_>
    where
        I: IntoIterator<Item = MiddlewareRef>,
    {
        let start = self.registrations.len();
        let order = self
            .registrations
            .last()
            .map_or(0, |registration| registration.order + 1);
        for middleware in middleware {
            self.registrations.push(Registration {
                middleware,
                routes: vec![RouteRule::new("/")],
                excludes: Vec::new(),
                module: module.clone(),
                order,
            });
        }
        self.invalidate();
        MiddlewareConfig {
            registry: self,
            start,
        }
    }

    /// Returns the number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Compiles every route rule.
    ///
    /// Called lazily by [`matching`](Self::matching); calling it at startup
    /// reports malformed patterns early.
    pub fn compile(&self) -> Result<(), KeystoneError> {
        self.compiled_entries().map(|_| ())
    }

    /// Returns the middleware applying to `method` and `path`, global
    /// middleware first, then in registration order.
    ///
    /// The result is not de-duplicated.
    pub fn matching(
        &self,
        method: &Method,
        path: &str,
    ) -> Result<Vec<MiddlewareRef>, KeystoneError> {
        let entries = self.compiled_entries()?;
        let key = (method.clone(), path.to_string());

        let cached = {
            let mut cache = self.cache.lock();
            cache.shift_remove(&key).map(|indexes| {
                cache.insert(key.clone(), Arc::clone(&indexes));
                indexes
            })
        };
        let indexes = match cached {
            Some(indexes) => indexes,
            None => {
                let indexes: Arc<[usize]> = entries
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.matches(method, path))
                    .map(|(index, _)| index)
                    .collect();
                let mut cache = self.cache.lock();
                cache.insert(key, Arc::clone(&indexes));
                if cache.len() > MATCH_CACHE_SIZE {
                    cache.shift_remove_index(0);
                }
                indexes
            }
        };

        Ok(indexes
            .iter()
            .map(|index| entries[*index].middleware.clone())
            .collect())
    }

    fn compiled_entries(&self) -> Result<Arc<[CompiledEntry]>, KeystoneError> {
        if let Some(entries) = self.compiled.read().as_ref() {
            return Ok(Arc::clone(entries));
        }

        let mut ordered: Vec<&Registration> = self.registrations.iter().collect();
        ordered.sort_by_key(|registration| (registration.module.is_some(), registration.order));
        let entries = ordered
            .into_iter()
            .map(|registration| {
                Ok(CompiledEntry {
                    middleware: registration.middleware.clone(),
                    routes: registration
                        .routes
                        .iter()
                        .map(CompiledRule::new)
                        .collect::<Result<_, _>>()?,
                    excludes: registration
                        .excludes
                        .iter()
                        .map(CompiledRule::new)
                        .collect::<Result<_, _>>()?,
                })
            })
            .collect::<Result<Vec<_>, KeystoneError>>()?;

        let entries: Arc<[CompiledEntry]> = entries.into();
        *self.compiled.write() = Some(Arc::clone(&entries));
        tracing::debug!(entries = entries.len(), "Compiled middleware registry");
        Ok(entries)
    }

    fn invalidate(&mut self) {
        *self.compiled.get_mut() = None;
        self.cache.get_mut().clear();
    }
}

/// Configures the middleware added by one [`MiddlewareRegistry::apply`]
/// call.
pub struct MiddlewareConfig<'a> {
    registry: &'a mut MiddlewareRegistry,
    start: usize,
}

impl MiddlewareConfig<'_> {
    /// Limits the middleware to the given routes.
    pub fn for_routes<I, R>(self, routes: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RouteRule>,
    {
        let routes: Vec<RouteRule> = routes.into_iter().map(Into::into).collect();
        self.update(|registration| registration.routes.clone_from(&routes))
    }

    /// Excludes paths, optionally for some methods only.
    pub fn exclude<I, R>(self, excludes: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RouteRule>,
    {
        let excludes: Vec<RouteRule> = excludes.into_iter().map(Into::into).collect();
        self.update(|registration| registration.excludes.extend(excludes.iter().cloned()))
    }

    fn update(self, mut apply: impl FnMut(&mut Registration)) -> Self {
        for registration in &mut self.registry.registrations[self.start..] {
            apply(registration);
        }
        self.registry.invalidate();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhancer::EnhancerId;
    use proptest::prelude::*;

    fn noop(name: &'static str) -> MiddlewareRef {
        MiddlewareRef::from_fn(name, |_, _, next| async move { next.run().await })
    }

    fn ids(refs: &[MiddlewareRef]) -> Vec<EnhancerId> {
        refs.iter().map(MiddlewareRef::id).collect()
    }

    #[test]
    fn test_compile_pattern() {
        let users = compile_pattern("/users").unwrap();
        assert!(users.is_match("/users"));
        assert!(users.is_match("/users/1"));
        assert!(!users.is_match("/usersx"));
        assert!(!users.is_match("/orders"));

        let param = compile_pattern("users/:id/posts").unwrap();
        assert!(param.is_match("/users/42/posts"));
        assert!(param.is_match("/users/42/posts/7"));
        assert!(!param.is_match("/users/42"));

        let wildcard = compile_pattern("/files/*").unwrap();
        assert!(wildcard.is_match("/files/a/b.txt"));
        assert!(!wildcard.is_match("/file"));

        assert!(compile_pattern("*").unwrap().is_match("/anything"));
        assert!(compile_pattern("/a.b").unwrap().is_match("/a.b"));
        assert!(!compile_pattern("/a.b").unwrap().is_match("/axb"));
    }

    #[test]
    fn test_method_filter_parse() {
        assert_eq!(
            MethodFilter::parse(["get", "POST"]).unwrap(),
            MethodFilter::Only(vec![Method::GET, Method::POST])
        );
        assert_eq!(MethodFilter::parse(["ANY"]).unwrap(), MethodFilter::All);
        assert_eq!(MethodFilter::parse(Vec::<&str>::new()).unwrap(), MethodFilter::All);
        assert!(MethodFilter::parse(["NOT A METHOD"]).is_err());
    }

    #[test]
    fn test_method_restriction() {
        let mut registry = MiddlewareRegistry::new();
        registry
            .apply([noop("writes")])
            .for_routes([("/users", vec![Method::POST, Method::PUT])]);
        assert!(registry.matching(&Method::GET, "/users").unwrap().is_empty());
        assert_eq!(registry.matching(&Method::POST, "/users").unwrap().len(), 1);
    }

    #[test]
    fn test_exclusion_with_method() {
        let mut registry = MiddlewareRegistry::new();
        registry
            .apply([noop("auth")])
            .for_routes(["/api"])
            .exclude([("/api/login", Method::POST)]);
        assert!(registry.matching(&Method::POST, "/api/login").unwrap().is_empty());
        assert_eq!(registry.matching(&Method::GET, "/api/login").unwrap().len(), 1);
    }

    #[test]
    fn test_global_before_module() {
        let module_mw = noop("module");
        let global_mw = noop("global");
        let mut registry = MiddlewareRegistry::new();
        registry.apply_for_module("users", [module_mw.clone()]);
        registry.apply([global_mw.clone()]);

        let matched = registry.matching(&Method::GET, "/users").unwrap();
        assert_eq!(ids(&matched), ids(&[global_mw, module_mw]));
    }

    #[test]
    fn test_duplicates_are_kept_for_executor() {
        let shared = noop("shared");
        let mut registry = MiddlewareRegistry::new();
        registry.apply([shared.clone()]).for_routes(["/users"]);
        registry.apply([shared]).for_routes(["/users"]);
        assert_eq!(registry.matching(&Method::GET, "/users").unwrap().len(), 2);
    }

    #[test]
    fn test_cache_is_bounded_and_invalidated() {
        let mut registry = MiddlewareRegistry::new();
        registry.apply([noop("a")]);
        for i in 0..(MATCH_CACHE_SIZE + 10) {
            registry.matching(&Method::GET, &format!("/p/{i}")).unwrap();
        }
        assert_eq!(registry.cache.lock().len(), MATCH_CACHE_SIZE);

        registry.apply([noop("b")]).for_routes(["/p"]);
        assert!(registry.cache.lock().is_empty());
        assert_eq!(registry.matching(&Method::GET, "/p/1").unwrap().len(), 2);
    }

    proptest! {
        #[test]
        fn prop_prefix_matches_descendants(
            segments in prop::collection::vec("[a-z0-9]{1,8}", 1..4),
            tail in prop::collection::vec("[a-z0-9]{1,8}", 0..3),
        ) {
            let prefix = format!("/{}", segments.join("/"));
            let regex = compile_pattern(&prefix).unwrap();
            let mut path = prefix.clone();
            for part in &tail {
                path.push('/');
                path.push_str(part);
            }
            prop_assert!(regex.is_match(&path));
        }

        #[test]
        fn prop_excluded_paths_never_match(path in "/[a-z]{1,6}(/[a-z]{1,6}){0,2}") {
            let mut registry = MiddlewareRegistry::new();
            registry.apply([noop("all")]).exclude([path.as_str()]);
            prop_assert!(registry.matching(&Method::GET, &path).unwrap().is_empty());
        }
    }
}
