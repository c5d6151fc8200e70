//! # Keystone
//!
//! **Dependency-injected HTTP request pipeline**
//!
//! Keystone resolves controllers and enhancers from a dependency injection
//! container and runs every request through a fixed pipeline:
//!
//! ```text
//! Request → Middleware → Guards → Interceptors → Handler → Normalizer → Response
//!                                                    ↓ error
//!                         Exception filters → Adapter fallback → Response
//! ```
//!
//! - **Container** – Singleton, transient and request-scoped providers,
//!   lazy value/alias/factory providers, circular-dependency detection
//! - **Enhancers** – Guards, interceptors and exception filters attached to
//!   a handler, its controller, its module or globally
//! - **Middleware** – Route-pattern based, de-duplicated per request
//! - **Structured errors** – Envelopes with call frames and source excerpts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keystone::prelude::*;
//!
//! struct Users;
//!
//! impl Injectable for Users {
//!     fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
//!         Ok(Self)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ApplicationError> {
//!     Application::builder()
//!         .config(ConfigLoader::new().with_env_prefix(DEFAULT_ENV_PREFIX).load()?)
//!         .provider(Provider::class::<Users>().action_sync("list", vec![], |_: &Users, _| {
//!             Ok(Reply::json(serde_json::json!([])))
//!         }))
//!         .controller(ControllerDef::new::<Users>("/users").get("/", "list"))
//!         .guard(Target::Global, GuardRef::from_fn("AuthGuard", |ctx| async move {
//!             Ok(ctx.request().header("authorization").is_some())
//!         }))
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/keystone/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;
mod error;

pub use app::{Application, ApplicationBuilder};
pub use error::ApplicationError;

// Re-export core types
pub use keystone_core as core;

// Re-export pipeline stages
pub use keystone_pipeline as pipeline;

// Re-export the router and transport
pub use keystone_server as server;

// Re-export observability
pub use keystone_telemetry as telemetry;

// Re-export configuration
pub use keystone_config as config;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use keystone::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{Application, ApplicationBuilder, ApplicationError};

    pub use keystone_core::{
        Container, Dependencies, Dependency, ErrorCategory, ExecutionContext, Injectable,
        KeystoneError, KeystoneResult, ModuleDef, Provider, Reply, Request, RequestContextHolder,
        ResolveError, Response, Scope, Token,
    };

    pub use keystone_pipeline::{
        CallHandler, Catch, ErrorSnapshot, ExceptionFilter, FilterRef, Guard, GuardRef,
        Interceptor, InterceptorRef, Middleware, MiddlewareRef, MiddlewareRegistry, Next, Target,
    };

    pub use keystone_server::{ControllerDef, RouterConfig, ServerConfig, ShutdownSignal};

    pub use keystone_config::{ConfigLoader, KeystoneConfig, DEFAULT_ENV_PREFIX};
}
