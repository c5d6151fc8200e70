//! Transport-neutral request type.
//!
//! Adapters convert whatever their transport produces into a [`Request`].
//! The request is immutable once built, apart from its [`Session`], which is
//! a shared map middleware and handlers may write to.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared, mutable session map attached to a request.
#[derive(Debug, Clone, Default)]
pub struct Session {
    values: Arc<Mutex<HashMap<String, serde_json::Value>>>,
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a session value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values.lock().get(key).cloned()
    }

    /// Stores a session value, returning the previous one.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.values.lock().insert(key.into(), value)
    }

    /// Removes a session value.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.values.lock().remove(key)
    }

    /// Returns a copy of every session value.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.values.lock().clone()
    }
}

/// An incoming request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    params: HashMap<String, String>,
    body: Bytes,
    session: Session,
}

impl Request {
    /// Creates a request builder.
    #[must_use]
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Converts an `http` request into a Keystone request.
    pub fn from_http(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);
        let mut builder = Self::builder().method(parts.method).uri(path_and_query);
        builder.headers = parts.headers;
        builder.body(body).build()
    }

    /// Returns the HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns a query parameter.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Returns every query parameter.
    #[must_use]
    pub const fn queries(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Returns a header value, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the header map.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a cookie value.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Returns every cookie.
    #[must_use]
    pub const fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Returns a route parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns every route parameter.
    #[must_use]
    pub const fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Returns the raw body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Returns the session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Returns this request with the given route parameters.
    #[must_use]
    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }
}

/// Builder for [`Request`].
#[derive(Debug, Default)]
pub struct RequestBuilder {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    params: HashMap<String, String>,
    body: Bytes,
    session: Option<Session>,
}

impl RequestBuilder {
    /// Sets the HTTP method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the path and query string.
    #[must_use]
    pub fn uri(mut self, uri: &str) -> Self {
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
        self.path = if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        };
        self.query = parse_query(query);
        self
    }

    /// Adds a header. Invalid names or values are ignored.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Adds a route parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a JSON body and content type.
    #[must_use]
    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string())
    }

    /// Shares an existing session.
    #[must_use]
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Builds the request.
    #[must_use]
    pub fn build(self) -> Request {
        let cookies = parse_cookies(&self.headers);
        Request {
            method: self.method,
            path: if self.path.is_empty() {
                "/".to_string()
            } else {
                self.path
            },
            query: self.query,
            headers: self.headers,
            cookies,
            params: self.params,
            body: self.body,
            session: self.session.unwrap_or_default(),
        }
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.to_string(), value.replace('+', " "))
        })
        .collect()
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_parsing() {
        let request = Request::builder()
            .uri("/users/search?name=ada+lovelace&active&page=2")
            .build();
        assert_eq!(request.path(), "/users/search");
        assert_eq!(request.query("name"), Some("ada lovelace"));
        assert_eq!(request.query("active"), Some(""));
        assert_eq!(request.query("page"), Some("2"));
        assert_eq!(request.method(), &Method::GET);
    }

    #[test]
    fn test_cookie_parsing() {
        let request = Request::builder()
            .uri("/")
            .header("cookie", "session=abc123; theme=\"dark\"; =bad")
            .header("cookie", "lang=en")
            .build();
        assert_eq!(request.cookie("session"), Some("abc123"));
        assert_eq!(request.cookie("theme"), Some("dark"));
        assert_eq!(request.cookie("lang"), Some("en"));
        assert_eq!(request.cookies().len(), 3);
    }

    #[test]
    fn test_json_body() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/users")
            .json(&serde_json::json!({ "name": "Ada" }))
            .build();
        let body: serde_json::Value = request.json().unwrap();
        assert_eq!(body["name"], "Ada");
        assert_eq!(request.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_session_is_shared() {
        let session = Session::new();
        let request = Request::builder().uri("/").session(session.clone()).build();
        request.session().insert("user", serde_json::json!(7));
        assert_eq!(session.get("user"), Some(serde_json::json!(7)));
        assert_eq!(request.clone().session().remove("user"), Some(serde_json::json!(7)));
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn test_from_http() {
        let http_request = http::Request::builder()
            .method(Method::DELETE)
            .uri("http://localhost/items/9?force=true")
            .header("x-api-key", "k")
            .body(Bytes::from_static(b"{}"))
            .unwrap();
        let request = Request::from_http(http_request).with_params(HashMap::from([(
            "id".to_string(),
            "9".to_string(),
        )]));
        assert_eq!(request.method(), &Method::DELETE);
        assert_eq!(request.path(), "/items/9");
        assert_eq!(request.query("force"), Some("true"));
        assert_eq!(request.header("x-api-key"), Some("k"));
        assert_eq!(request.param("id"), Some("9"));
    }
}
