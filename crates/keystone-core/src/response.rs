//! Shared response writer.
//!
//! A [`Response`] is a cheap, clonable handle to the response being built for
//! the current request. Middleware, handlers, filters and the response
//! normalizer all write to the same underlying state.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// `SameSite` attribute of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// `SameSite=Strict`
    Strict,
    /// `SameSite=Lax`
    Lax,
    /// `SameSite=None`
    None,
}

/// A cookie to set on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    name: String,
    value: String,
    path: Option<String>,
    max_age: Option<i64>,
    http_only: bool,
    secure: bool,
    same_site: Option<SameSite>,
}

impl SetCookie {
    /// Creates a cookie with a name and value.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            max_age: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    /// Sets the `Path` attribute.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the `Max-Age` attribute in seconds.
    #[must_use]
    pub const fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Sets the `HttpOnly` flag.
    #[must_use]
    pub const fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    /// Sets the `Secure` flag.
    #[must_use]
    pub const fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Sets the `SameSite` attribute.
    #[must_use]
    pub const fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Returns the cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        match self.same_site {
            Some(SameSite::Strict) => f.write_str("; SameSite=Strict"),
            Some(SameSite::Lax) => f.write_str("; SameSite=Lax"),
            Some(SameSite::None) => f.write_str("; SameSite=None"),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    cookies: Vec<SetCookie>,
    body: Bytes,
    written: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: Bytes::new(),
            written: false,
        }
    }
}

/// The response for the current request.
///
/// Cloning a `Response` yields another handle to the same response.
#[derive(Debug, Clone, Default)]
pub struct Response {
    state: Arc<Mutex<ResponseState>>,
}

impl Response {
    /// Creates an empty `200 OK` response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.state.lock().status
    }

    /// Sets the status code.
    pub fn set_status(&self, status: StatusCode) -> &Self {
        self.state.lock().status = status;
        self
    }

    /// Sets a header, replacing existing values.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) -> &Self {
        self.state.lock().headers.insert(name, value);
        self
    }

    /// Sets a header from strings. Invalid names or values are ignored.
    pub fn header(&self, name: &str, value: &str) -> &Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.insert_header(name, value);
        }
        self
    }

    /// Adds a cookie.
    pub fn cookie(&self, cookie: SetCookie) -> &Self {
        self.state.lock().cookies.push(cookie);
        self
    }

    /// Writes a plain-text body.
    pub fn send(&self, text: impl Into<String>) -> &Self {
        self.write("text/plain; charset=utf-8", Bytes::from(text.into()))
    }

    /// Writes a JSON body.
    pub fn json(&self, value: &serde_json::Value) -> &Self {
        self.write("application/json", Bytes::from(value.to_string()))
    }

    /// Writes an HTML body.
    pub fn html(&self, markup: impl Into<String>) -> &Self {
        self.write("text/html; charset=utf-8", Bytes::from(markup.into()))
    }

    /// Sets the status and clears the body.
    pub fn empty(&self, status: StatusCode) -> &Self {
        let mut state = self.state.lock();
        state.status = status;
        state.headers.remove(CONTENT_TYPE);
        state.body = Bytes::new();
        state.written = true;
        drop(state);
        self
    }

    fn write(&self, content_type: &'static str, body: Bytes) -> &Self {
        let mut state = self.state.lock();
        state
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        state.body = body;
        state.written = true;
        drop(state);
        self
    }

    /// Returns a header value.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    }

    /// Returns the cookies set so far.
    #[must_use]
    pub fn cookies(&self) -> Vec<SetCookie> {
        self.state.lock().cookies.clone()
    }

    /// Returns the body written so far.
    #[must_use]
    pub fn body(&self) -> Bytes {
        self.state.lock().body.clone()
    }

    /// Returns `true` once a body writer has been called.
    #[must_use]
    pub fn is_written(&self) -> bool {
        self.state.lock().written
    }

    /// Returns `true` if both handles refer to the same response.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Renders this response as an `http` response.
    #[must_use]
    pub fn to_http(&self) -> http::Response<Full<Bytes>> {
        let state = self.state.lock();
        let mut response = http::Response::new(Full::new(state.body.clone()));
        *response.status_mut() = state.status;
        *response.headers_mut() = state.headers.clone();
        for cookie in &state.cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_clones_share_state() {
        let response = Response::new();
        let handle = response.clone();
        handle.set_status(StatusCode::CREATED).send("made");
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.body(), Bytes::from("made"));
        assert!(response.ptr_eq(&handle));
        assert!(!response.ptr_eq(&Response::new()));
    }

    #[test]
    fn test_json_sets_content_type() {
        let response = Response::new();
        response.json(&serde_json::json!({ "ok": true }));
        assert_eq!(
            response.header_value("content-type").as_deref(),
            Some("application/json")
        );
        assert_eq!(response.body(), Bytes::from(r#"{"ok":true}"#));
        assert!(response.is_written());
    }

    #[test]
    fn test_empty_clears_body() {
        let response = Response::new();
        response.send("text").empty(StatusCode::NO_CONTENT);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.body().is_empty());
        assert!(response.header_value("content-type").is_none());
    }

    #[test]
    fn test_cookie_rendering() {
        let cookie = SetCookie::new("sid", "abc")
            .path("/")
            .max_age(3600)
            .http_only()
            .secure()
            .same_site(SameSite::Lax);
        assert_eq!(
            cookie.to_string(),
            "sid=abc; Path=/; Max-Age=3600; HttpOnly; Secure; SameSite=Lax"
        );
    }

    #[tokio::test]
    async fn test_to_http() {
        let response = Response::new();
        response
            .set_status(StatusCode::ACCEPTED)
            .header("x-request-id", "r-1")
            .cookie(SetCookie::new("a", "1"))
            .cookie(SetCookie::new("b", "2"))
            .html("<p>hi</p>");

        let http_response = response.to_http();
        assert_eq!(http_response.status(), StatusCode::ACCEPTED);
        assert_eq!(http_response.headers()["x-request-id"], "r-1");
        assert_eq!(http_response.headers().get_all(SET_COOKIE).iter().count(), 2);

        let body = http_response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from("<p>hi</p>"));
    }
}
