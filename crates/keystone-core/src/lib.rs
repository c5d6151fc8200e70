//! # Keystone Core
//!
//! Core types for the Keystone server framework.
//!
//! This crate provides the foundation every other Keystone crate builds on:
//!
//! - [`Container`] - Dependency injection container with singleton, transient
//!   and request scoping, lazy providers and circular-dependency detection
//! - [`RequestContextHolder`] - Task-local holder for the in-flight request
//! - [`ExecutionContext`] - Immutable snapshot of one in-flight handler call
//! - [`Request`] / [`Response`] - Transport-neutral request and response objects
//! - [`Reply`] - Everything a handler may return
//! - [`KeystoneError`] - Standard error type with category and call frames
//! - [`ErrorTrace`] - Structured error record built on the exception path

#![doc(html_root_url = "https://docs.rs/keystone-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
pub mod di;
mod error;
mod holder;
mod reply;
mod request;
mod response;
pub mod trace;

use std::future::Future;
use std::pin::Pin;

pub use context::{ExecutionContext, ExecutionContextBuilder, HttpArguments, RequestId};
pub use di::{
    Container, ContextKey, Dependencies, Dependency, Injectable, Instance, ModuleDef, Provider,
    ResolveError, Scope, Token,
};
pub use error::{
    ErrorCategory, ErrorDetail, ErrorEnvelope, FieldErrors, KeystoneError, KeystoneResult,
};
pub use holder::RequestContextHolder;
pub use request::{Request, RequestBuilder, Session};
pub use response::{Response, SameSite, SetCookie};
pub use reply::{Model, Reply};
pub use trace::{ErrorTrace, Frame, RequestSummary, TraceOptions};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
