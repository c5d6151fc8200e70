//! Integration tests wiring the pipeline stages together.
//!
//! The router normally drives these stages; here they are composed by hand
//! around a controller registered in the container:
//!
//! 1. Guards decide whether the request proceeds
//! 2. Interceptors wrap everything after them
//! 3. Middleware matching the route wraps the handler call
//! 4. Exception filters turn failures into replies

use http::Method;
use keystone_core::{
    BoxFuture, Container, Dependencies, ErrorTrace, ExecutionContext, Injectable, KeystoneError,
    Provider, Reply, Request, ResolveError, Response, Token, TraceOptions,
};
use keystone_pipeline::{
    Continuation, EnhancerRegistry, ErrorSnapshot, FilterProcessor, FilterRef,
    GuardProcessor, GuardRef, InterceptorChain, InterceptorRef, MetadataSource,
    MiddlewareExecutor, MiddlewareRef, MiddlewareRegistry, Target,
};
use std::sync::{Arc, Mutex};

struct UsersController;

impl Injectable for UsersController {
    fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
        Ok(Self)
    }
}

fn container() -> Arc<Container> {
    let container = Container::new();
    container.register(
        Provider::class::<UsersController>()
            .action_sync("list", vec![], |_: &UsersController, _| {
                Ok(Reply::json(serde_json::json!([{ "id": 1 }])))
            })
            .action_sync("fail", vec![], |_: &UsersController, _| {
                Err(KeystoneError::not_found("User 7 not found"))
            }),
    );
    Arc::new(container)
}

type Log = Arc<Mutex<Vec<String>>>;

fn push(log: &Log, entry: &str) {
    log.lock().unwrap().push(entry.to_string());
}

/// Runs guards, interceptors, middleware and the handler, returning the
/// reply or the filtered error reply.
async fn dispatch(
    container: Arc<Container>,
    metadata: &EnhancerRegistry,
    middleware: Arc<MiddlewareRegistry>,
    request: Request,
    action: &'static str,
) -> Result<Option<Reply>, KeystoneError> {
    let response = Response::new();
    let ctx = ExecutionContext::builder(request)
        .class(Token::of::<UsersController>())
        .handler(action)
        .response(response.clone())
        .build();

    let decision = GuardProcessor::new(&container, metadata).process(&ctx).await?;
    if !decision.allowed {
        return Err(KeystoneError::unauthorized(format!(
            "Not authorized from guard {}",
            decision.guard.unwrap_or_default()
        )));
    }

    let interceptors =
        keystone_pipeline::resolve_all(&metadata.interceptors(&ctx), &container).await?;

    let terminal: Continuation = {
        let container = Arc::clone(&container);
        let middleware = Arc::clone(&middleware);
        let request = ctx.request_arc();
        let response = response.clone();
        Arc::new(move || -> BoxFuture<'static, Result<Reply, KeystoneError>> {
            let container = Arc::clone(&container);
            let middleware = Arc::clone(&middleware);
            let request = Arc::clone(&request);
            let response = response.clone();
            Box::pin(async move {
                let handler: Continuation = {
                    let container = Arc::clone(&container);
                    Arc::new(move || -> BoxFuture<'static, Result<Reply, KeystoneError>> {
                        let container = Arc::clone(&container);
                        Box::pin(async move {
                            container
                                .call(&Token::of::<UsersController>(), action)
                                .await
                        })
                    })
                };
                MiddlewareExecutor::new(&middleware, &container, request, response, handler)
                    .execute()
                    .await
            })
        })
    };

    match InterceptorChain::new(interceptors).intercept(&ctx, terminal).await {
        Ok(intercepted) => Ok(Some(intercepted.reply)),
        Err(error) => {
            let options = TraceOptions {
                include_source: false,
                ..TraceOptions::default()
            };
            let trace = ErrorTrace::build(&error, Some(ctx.request()), &options);
            FilterProcessor::new(&container, metadata)
                .catch(&error, &trace, &ctx)
                .await
        }
    }
}

#[tokio::test]
async fn test_full_stage_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let metadata = {
        let (g, i) = (Arc::clone(&log), Arc::clone(&log));
        EnhancerRegistry::new()
            .guard(
                Target::Global,
                GuardRef::from_fn("Open", move |_| {
                    push(&g, "guard");
                    async { Ok(true) }
                }),
            )
            .interceptor(
                Target::class::<UsersController>(),
                InterceptorRef::from_fn("Around", move |_, next| {
                    let log = Arc::clone(&i);
                    async move {
                        push(&log, "interceptor:before");
                        let reply = next.handle().await;
                        push(&log, "interceptor:after");
                        reply
                    }
                }),
            )
    };

    let mut middleware = MiddlewareRegistry::new();
    let m = Arc::clone(&log);
    middleware
        .apply([MiddlewareRef::from_fn("Users", move |_, _, next| {
            let log = Arc::clone(&m);
            async move {
                push(&log, "middleware");
                next.run().await
            }
        })])
        .for_routes(["/users"]);

    let request = Request::builder().method(Method::GET).uri("/users").build();
    let reply = dispatch(container(), &metadata, Arc::new(middleware), request, "list")
        .await
        .unwrap();

    assert!(matches!(reply, Some(Reply::Value(_))));
    assert_eq!(
        *log.lock().unwrap(),
        ["guard", "interceptor:before", "middleware", "interceptor:after"]
    );
}

#[tokio::test]
async fn test_guard_rejection_skips_everything_else() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let i = Arc::clone(&log);
    let metadata = EnhancerRegistry::new()
        .guard(
            Target::handler::<UsersController>("list"),
            GuardRef::from_fn("AdminGuard", |_| async { Ok(false) }),
        )
        .interceptor(
            Target::Global,
            InterceptorRef::from_fn("Never", move |_, next| {
                push(&i, "interceptor");
                async move { next.handle().await }
            }),
        );

    let request = Request::builder().uri("/users").build();
    let error = dispatch(
        container(),
        &metadata,
        Arc::new(MiddlewareRegistry::new()),
        request,
        "list",
    )
    .await
    .unwrap_err();

    assert_eq!(error.status_code(), http::StatusCode::UNAUTHORIZED);
    assert_eq!(error.message(), "Not authorized from guard AdminGuard");
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_handler_error_reaches_filter() {
    let metadata = EnhancerRegistry::new().filter(
        Target::Global,
        FilterRef::from_fn("NotFoundBody", |error: ErrorSnapshot, trace: ErrorTrace, _| async move {
            Ok(Some(Reply::json(serde_json::json!({
                "status": error.status.as_u16(),
                "path": trace.request.path,
            }))))
        }),
    );

    let request = Request::builder().uri("/users/7").build();
    let reply = dispatch(
        container(),
        &metadata,
        Arc::new(MiddlewareRegistry::new()),
        request,
        "fail",
    )
    .await
    .unwrap();

    match reply {
        Some(Reply::Value(value)) => {
            assert_eq!(value["status"], 404);
            assert_eq!(value["path"], "/users/7");
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn test_unmatched_middleware_is_not_run() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut middleware = MiddlewareRegistry::new();
    let m = Arc::clone(&log);
    middleware
        .apply([MiddlewareRef::from_fn("Admin", move |_, _, next| {
            push(&m, "admin");
            async move { next.run().await }
        })])
        .for_routes(["/admin"]);

    let request = Request::builder().uri("/administrators").build();
    let reply = dispatch(
        container(),
        &EnhancerRegistry::new(),
        Arc::new(middleware),
        request,
        "list",
    )
    .await
    .unwrap();

    assert!(reply.is_some());
    assert!(log.lock().unwrap().is_empty());
}
