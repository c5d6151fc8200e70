//! Method and path matching for registered routes.
//!
//! Patterns are split on `/` into segments:
//!
//! | Segment | Matches |
//! |---------|---------|
//! | `users` | exactly `users` |
//! | `:id`, `{id}` | any one segment, captured as `id` |
//! | `*` | the rest of the path, captured as `*` |
//!
//! Routes are tried in registration order and the first match wins.
//!
//! ```rust
//! use keystone_server::RouteTable;
//! use http::Method;
//!
//! let mut table = RouteTable::new();
//! table.add(Method::GET, "/users/:id", "show");
//! table.add(Method::GET, "/files/*", "files");
//!
//! let found = table.match_route(&Method::GET, "/users/42").unwrap();
//! assert_eq!(*found.value, "show");
//! assert_eq!(found.params.get("id").map(String::as_str), Some("42"));
//!
//! let found = table.match_route(&Method::GET, "/files/a/b.txt").unwrap();
//! assert_eq!(found.params.get("*").map(String::as_str), Some("a/b.txt"));
//! ```

use http::Method;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

fn parse_segments(pattern: &str) -> Vec<Segment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s == "*" {
                Segment::Wildcard
            } else if let Some(name) = s.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(s.to_string())
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Route<T> {
    method: Method,
    pattern: String,
    segments: Vec<Segment>,
    value: T,
}

impl<T> Route<T> {
    fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let actual: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    params.insert("*".to_string(), actual.get(index..)?.join("/"));
                    return Some(params);
                }
                Segment::Literal(expected) => {
                    if actual.get(index) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), (*actual.get(index)?).to_string());
                }
            }
        }

        (actual.len() == self.segments.len()).then_some(params)
    }
}

/// A matched route.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    /// The value registered with the route.
    pub value: &'a T,
    /// The pattern the route was registered with.
    pub pattern: &'a str,
    /// Captured path parameters.
    pub params: HashMap<String, String>,
}

/// An ordered table of `(method, pattern) -> T` routes.
#[derive(Debug, Clone)]
pub struct RouteTable<T> {
    routes: Vec<Route<T>>,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<T> RouteTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route.
    pub fn add(&mut self, method: Method, pattern: &str, value: T) {
        self.routes.push(Route {
            method,
            pattern: pattern.to_string(),
            segments: parse_segments(pattern),
            value,
        });
    }

    /// Finds the first route matching `method` and `path`.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, T>> {
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                route.match_path(path).map(|params| RouteMatch {
                    value: &route.value,
                    pattern: &route.pattern,
                    params,
                })
            })
    }

    /// Returns `true` if some route matches `path` under another method.
    #[must_use]
    pub fn matches_path(&self, path: &str) -> bool {
        self.routes.iter().any(|route| route.match_path(path).is_some())
    }

    /// Returns the registered `(method, pattern)` pairs in order.
    pub fn entries(&self) -> impl Iterator<Item = (&Method, &str, &T)> {
        self.routes
            .iter()
            .map(|route| (&route.method, route.pattern.as_str(), &route.value))
    }

    /// Returns the number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
