//! # Keystone Test
//!
//! In-memory HTTP testing for Keystone applications. Requests are
//! dispatched straight into a [`RouteAdapter`](keystone_server::RouteAdapter),
//! so no port is bound, yet every request runs the complete pipeline:
//! middleware, guards, interceptors, the handler and exception filters.
//!
//! ## Example
//!
//! ```ignore
//! use keystone_test::TestClient;
//! use http::StatusCode;
//!
//! #[tokio::test]
//! async fn test_create_user() {
//!     let client = TestClient::new(app.adapter());
//!
//!     let response = client
//!         .post("/users")
//!         .json(&serde_json::json!({ "name": "Alice" }))
//!         .send()
//!         .await
//!         .unwrap();
//!
//!     response.assert_status(StatusCode::CREATED);
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod request;
mod response;

pub use client::{TestClient, TestClientRequest};
pub use error::TestError;
pub use request::TestRequestBuilder;
pub use response::TestResponse;
