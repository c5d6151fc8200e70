//! # Keystone Pipeline
//!
//! The request pipeline stages of the Keystone framework.
//!
//! Every routed request flows through the same stages, in the same order:
//!
//! ```text
//! Request → Guards → Interceptors → Middleware → Handler
//!                                                  ↓
//! Reply   ←──────── Interceptors ←── Middleware ←──┘
//!
//! any error ──→ Exception filters ──→ adapter fallback
//! ```
//!
//! | Stage         | Type                   | Declared at                       |
//! |---------------|------------------------|-----------------------------------|
//! | Guards        | [`Guard`]              | handler, class, module, global    |
//! | Interceptors  | [`Interceptor`]        | handler, class, module, global    |
//! | Middleware    | [`Middleware`]         | route patterns, [`MiddlewareRegistry`] |
//! | Filters       | [`ExceptionFilter`]    | handler, class, module, global    |
//!
//! Guards, interceptors and filters come from a [`MetadataSource`]; the
//! stages concatenate them handler first and global last. Each reference is
//! either a ready instance or a provider token resolved through the
//! [`Container`](keystone_core::Container) on every request.
//!
//! ## Example
//!
//! ```
//! use keystone_pipeline::{EnhancerRegistry, GuardRef, InterceptorRef, Target};
//!
//! struct UsersController;
//!
//! let metadata = EnhancerRegistry::new()
//!     .guard(Target::class::<UsersController>(), GuardRef::from_fn("AuthGuard", |ctx| async move {
//!         Ok(ctx.request().header("authorization").is_some())
//!     }))
//!     .interceptor(Target::Global, InterceptorRef::from_fn("Logging", |_, next| async move {
//!         next.handle().await
//!     }));
//!
//! assert_eq!(metadata.len(), 2);
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-pipeline/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod enhancer;
mod executor;
mod filter;
mod guard;
mod interceptor;
mod metadata;
mod middleware;
mod registry;

use keystone_core::{BoxFuture, KeystoneError, Reply};
use std::sync::Arc;

pub use enhancer::{dedup, resolve_all, Enhancer, EnhancerId};
pub use executor::MiddlewareExecutor;
pub use filter::{Catch, ErrorSnapshot, ExceptionFilter, FilterProcessor, FilterRef, FnFilter};
pub use guard::{FnGuard, Guard, GuardDecision, GuardProcessor, GuardRef};
pub use interceptor::{
    CallHandler, FnInterceptor, Intercepted, Interceptor, InterceptorChain, InterceptorRef,
};
pub use metadata::{EnhancerRegistry, EnhancerScope, EnhancerSet, MetadataSource, Target};
pub use middleware::{FnMiddleware, Middleware, MiddlewareRef, Next};
pub use registry::{
    compile_pattern, MethodFilter, MiddlewareConfig, MiddlewareRegistry, RouteRule,
    MATCH_CACHE_SIZE,
};

/// The innermost step of a chain.
///
/// Interceptors and middleware wrap a continuation that may be invoked more
/// than once (an interceptor retrying the call), so it is a shared `Fn`.
pub type Continuation =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Reply, KeystoneError>> + Send + Sync>;
