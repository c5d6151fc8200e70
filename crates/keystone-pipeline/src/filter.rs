//! Exception filters.
//!
//! Filters run when any earlier stage fails. The router collects the filters
//! for the handler in handler, class, module, global order, and the first one
//! whose [`Catch`] list matches the error gets to produce the reply.

use crate::enhancer::{dedup, Enhancer};
use crate::metadata::MetadataSource;
use http::StatusCode;
use keystone_core::di::short_type_name;
use keystone_core::{
    BoxFuture, Container, ErrorCategory, ErrorTrace, ExecutionContext, Instance, KeystoneError,
    Reply, Token,
};
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

/// What an exception filter handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Catch {
    /// Every error of a category.
    Category(ErrorCategory),
    /// Every error with this HTTP status.
    Status(StatusCode),
    /// Errors of a specific kind (see [`KeystoneError::kind`]).
    Kind(Cow<'static, str>),
}

impl Catch {
    /// Returns `true` if `error` is handled by this entry.
    #[must_use]
    pub fn matches(&self, error: &KeystoneError) -> bool {
        match self {
            Self::Category(category) => error.category() == *category,
            Self::Status(status) => error.status_code() == *status,
            Self::Kind(kind) => error.kind() == kind.as_ref(),
        }
    }
}

/// Turns an error into a reply.
///
/// # Example
///
/// ```
/// use keystone_core::{BoxFuture, ErrorCategory, ErrorTrace, ExecutionContext, KeystoneError, Reply};
/// use keystone_pipeline::{Catch, ExceptionFilter};
///
/// struct NotFoundPage;
///
/// impl ExceptionFilter for NotFoundPage {
///     fn catches(&self) -> Vec<Catch> {
///         vec![Catch::Category(ErrorCategory::NotFound)]
///     }
///
///     fn catch<'a>(
///         &'a self,
///         error: &'a KeystoneError,
///         _trace: &'a ErrorTrace,
///         _ctx: &'a ExecutionContext,
///     ) -> BoxFuture<'a, Result<Option<Reply>, KeystoneError>> {
///         Box::pin(async move { Ok(Some(Reply::text(format!("missing: {}", error.message())))) })
///     }
/// }
/// ```
pub trait ExceptionFilter: Send + Sync + 'static {
    /// Returns the filter name, for logging.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Errors this filter handles. Empty means every error.
    fn catches(&self) -> Vec<Catch> {
        Vec::new()
    }

    /// Handles `error`.
    ///
    /// `Ok(None)` means the filter wrote the response itself (or declined to
    /// answer), and the router falls back to the adapter's reply.
    fn catch<'a>(
        &'a self,
        error: &'a KeystoneError,
        trace: &'a ErrorTrace,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Option<Reply>, KeystoneError>>;

    /// Returns `true` if this filter handles `error`.
    fn handles(&self, error: &KeystoneError) -> bool {
        let catches = self.catches();
        catches.is_empty() || catches.iter().any(|catch| catch.matches(error))
    }
}

/// A filter built from an async function.
pub struct FnFilter<F> {
    name: &'static str,
    catches: Vec<Catch>,
    func: F,
}

impl<F> FnFilter<F> {
    /// Creates a filter handling every error.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self {
            name,
            catches: Vec::new(),
            func,
        }
    }

    /// Restricts the filter to the given errors.
    #[must_use]
    pub fn catching(mut self, catches: impl IntoIterator<Item = Catch>) -> Self {
        self.catches.extend(catches);
        self
    }
}

impl<F, Fut> ExceptionFilter for FnFilter<F>
where
    F: Fn(ErrorSnapshot, ErrorTrace, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Reply>, KeystoneError>> + Send + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn catches(&self) -> Vec<Catch> {
        self.catches.clone()
    }

    fn catch<'a>(
        &'a self,
        error: &'a KeystoneError,
        trace: &'a ErrorTrace,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Option<Reply>, KeystoneError>> {
        Box::pin((self.func)(
            ErrorSnapshot::of(error),
            trace.clone(),
            ctx.clone(),
        ))
    }
}

/// An owned view of an error, handed to function filters.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorSnapshot {
    /// The error category.
    pub category: ErrorCategory,
    /// The HTTP status the error maps to.
    pub status: StatusCode,
    /// The error kind.
    pub kind: String,
    /// The error message.
    pub message: String,
    /// Structured details, if any.
    pub details: Option<serde_json::Value>,
}

impl ErrorSnapshot {
    /// Captures `error`.
    #[must_use]
    pub fn of(error: &KeystoneError) -> Self {
        Self {
            category: error.category(),
            status: error.status_code(),
            kind: error.kind().to_string(),
            message: error.message().to_string(),
            details: error.details().cloned(),
        }
    }
}

/// A reference to an exception filter.
pub type FilterRef = Enhancer<dyn ExceptionFilter>;

impl Enhancer<dyn ExceptionFilter> {
    /// Wraps a filter instance.
    #[must_use]
    pub fn filter<X: ExceptionFilter>(filter: X) -> Self {
        Self::Instance(Arc::new(filter))
    }

    /// Wraps an async function handling every error.
    #[must_use]
    pub fn from_fn<F, Fut>(name: &'static str, func: F) -> Self
    where
        F: Fn(ErrorSnapshot, ErrorTrace, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Reply>, KeystoneError>> + Send + 'static,
    {
        Self::filter(FnFilter::new(name, func))
    }

    /// References filter `X`, resolved through the container.
    #[must_use]
    pub fn provider<X: ExceptionFilter>() -> Self {
        Self::from_token::<X>(Token::of::<X>())
    }

    /// References filter `X` registered under `token`.
    #[must_use]
    pub fn from_token<X: ExceptionFilter>(token: Token) -> Self {
        Self::Provider {
            token,
            cast: |instance: Instance| {
                instance
                    .downcast::<X>()
                    .ok()
                    .map(|filter| filter as Arc<dyn ExceptionFilter>)
            },
            kind: "exception filter",
        }
    }
}

/// Runs the exception filters that apply to an execution context.
pub struct FilterProcessor<'a> {
    container: &'a Container,
    metadata: &'a dyn MetadataSource,
}

impl<'a> FilterProcessor<'a> {
    /// Creates a processor.
    #[must_use]
    pub fn new(container: &'a Container, metadata: &'a dyn MetadataSource) -> Self {
        Self {
            container,
            metadata,
        }
    }

    /// Offers `error` to the filters for `ctx`.
    ///
    /// Only the first filter that handles the error is invoked. Returns
    /// `Ok(None)` when no filter handles it or the handling filter produced
    /// no reply.
    pub async fn catch(
        &self,
        error: &KeystoneError,
        trace: &ErrorTrace,
        ctx: &ExecutionContext,
    ) -> Result<Option<Reply>, KeystoneError> {
        for reference in dedup(self.metadata.filters(ctx)) {
            let filter = reference.resolve(self.container).await?;
            if filter.handles(error) {
                tracing::debug!(
                    filter = filter.name(),
                    error_kind = error.kind(),
                    "Exception filter handling error"
                );
                return filter.catch(error, trace, ctx).await;
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EnhancerRegistry, Target};
    use keystone_core::{Request, TraceOptions};
    use parking_lot::Mutex;

    struct Controller;

    fn ctx() -> ExecutionContext {
        ExecutionContext::builder(Request::builder().build())
            .class(Token::of::<Controller>())
            .handler("show")
            .build()
    }

    fn trace(error: &KeystoneError) -> ErrorTrace {
        let options = TraceOptions {
            include_source: false,
            ..TraceOptions::default()
        };
        ErrorTrace::build(error, None, &options)
    }

    fn answering(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> FilterRef {
        let log = Arc::clone(log);
        FilterRef::from_fn(name, move |_, _, _| {
            log.lock().push(name);
            async move { Ok(Some(Reply::text(name))) }
        })
    }

    #[test]
    fn test_catch_matches() {
        let error = KeystoneError::not_found("missing").with_kind("UserMissing");
        assert!(Catch::Category(ErrorCategory::NotFound).matches(&error));
        assert!(Catch::Status(StatusCode::NOT_FOUND).matches(&error));
        assert!(Catch::Kind(Cow::Borrowed("UserMissing")).matches(&error));
        assert!(!Catch::Category(ErrorCategory::Internal).matches(&error));
    }

    #[tokio::test]
    async fn test_handler_filter_wins_over_global() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = EnhancerRegistry::new()
            .filter(Target::Global, answering("global", &log))
            .filter(Target::handler::<Controller>("show"), answering("handler", &log));
        let container = Container::new();
        let error = KeystoneError::internal("boom");

        let reply = FilterProcessor::new(&container, &registry)
            .catch(&error, &trace(&error), &ctx())
            .await
            .unwrap();
        assert!(matches!(reply, Some(Reply::Text(ref t)) if t == "handler"));
        assert_eq!(*log.lock(), ["handler"]);
    }

    #[tokio::test]
    async fn test_non_matching_filter_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let narrow = FilterRef::filter(
            FnFilter::new(
                "narrow",
                |_: ErrorSnapshot, _: ErrorTrace, _: ExecutionContext| async {
                    Ok::<_, KeystoneError>(Some(Reply::text("narrow")))
                },
            )
                .catching([Catch::Category(ErrorCategory::NotFound)]),
        );
        let registry = EnhancerRegistry::new()
            .filter(Target::class::<Controller>(), narrow)
            .filter(Target::Global, answering("fallback", &log));
        let container = Container::new();
        let error = KeystoneError::conflict("taken");

        let reply = FilterProcessor::new(&container, &registry)
            .catch(&error, &trace(&error), &ctx())
            .await
            .unwrap();
        assert!(matches!(reply, Some(Reply::Text(ref t)) if t == "fallback"));
    }

    #[tokio::test]
    async fn test_no_filters_returns_none() {
        let registry = EnhancerRegistry::new();
        let container = Container::new();
        let error = KeystoneError::internal("boom");
        let reply = FilterProcessor::new(&container, &registry)
            .catch(&error, &trace(&error), &ctx())
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_filter_sees_error_details() {
        let registry = EnhancerRegistry::new().filter(
            Target::Global,
            FilterRef::from_fn("echo", |error: ErrorSnapshot, trace: ErrorTrace, _| async move {
                assert_eq!(error.message, trace.message);
                Ok(Some(Reply::json(serde_json::json!({
                    "status": error.status.as_u16(),
                    "kind": error.kind,
                }))))
            }),
        );
        let container = Container::new();
        let error = KeystoneError::bad_request("nope").with_kind("ParseError");

        let reply = FilterProcessor::new(&container, &registry)
            .catch(&error, &trace(&error), &ctx())
            .await
            .unwrap();
        match reply {
            Some(Reply::Value(value)) => {
                assert_eq!(value["status"], 400);
                assert_eq!(value["kind"], "ParseError");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
