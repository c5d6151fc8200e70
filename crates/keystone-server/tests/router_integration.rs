//! End-to-end tests of the router orchestrator.
//!
//! Each test wires a container, enhancer metadata and middleware into a
//! [`RouterProxy`] and dispatches requests through the in-memory adapter.

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use keystone_core::{
    Container, Dependencies, Dependency, ErrorTrace, ExecutionContext, Injectable, KeystoneError,
    Provider, Reply, Request, RequestContextHolder, ResolveError,
};
use keystone_pipeline::{
    Catch, EnhancerRegistry, ErrorSnapshot, FilterRef, FnFilter, GuardRef, InterceptorRef,
    MiddlewareRef, MiddlewareRegistry, Target,
};
use keystone_server::{
    ControllerDef, HttpAdapter, RouteAdapter, RouterConfig, RouterProxy, INVALID_REQUEST_MESSAGE,
    NOT_FOUND_MESSAGE, REQUEST_ID_HEADER,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Users;

impl Injectable for Users {
    fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
        Ok(Self)
    }
}

static NEXT_SESSION: AtomicUsize = AtomicUsize::new(1);

struct Session(usize);

impl Injectable for Session {
    fn construct(_: &Dependencies) -> Result<Self, ResolveError> {
        Ok(Self(NEXT_SESSION.fetch_add(1, Ordering::SeqCst)))
    }
}

struct Fixture {
    calls: Arc<AtomicUsize>,
    holder: Arc<Mutex<Option<RequestContextHolder>>>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            holder: Arc::new(Mutex::new(None)),
        }
    }

    fn container(&self) -> Container {
        let calls = Arc::clone(&self.calls);
        let holder = Arc::clone(&self.holder);
        let container = Container::new();
        container.register(Provider::class::<Session>().request_scoped());
        container.register(
            Provider::class::<Users>()
                .action_sync("list", vec![], move |_: &Users, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    *holder.lock() = RequestContextHolder::current();
                    Ok(Reply::json(serde_json::json!([{ "id": 1 }])))
                })
                .action_sync("show", vec![Dependency::param("id")], |_: &Users, deps| {
                    let id = deps.string("id")?.unwrap_or_default();
                    Err(KeystoneError::not_found(format!("User {id} not found")))
                })
                .action_sync("boom", vec![], |_: &Users, _| panic!("handler exploded"))
                .action_sync("empty", vec![], |_: &Users, _| Ok(Reply::Empty))
                .action_sync(
                    "session",
                    vec![
                        Dependency::service::<Session>("first"),
                        Dependency::service::<Session>("second"),
                    ],
                    |_: &Users, deps| {
                        let first = deps.service::<Session>("first")?;
                        let second = deps.service::<Session>("second")?;
                        Ok(Reply::json(serde_json::json!({
                            "first": first.0,
                            "second": second.0,
                        })))
                    },
                ),
        );
        container
    }
}

fn users() -> ControllerDef {
    ControllerDef::new::<Users>("/users")
        .get("/", "list")
        .get("/explode", "boom")
        .get("/:id", "show")
        .delete("/", "empty")
        .get("/session/current", "session")
}

fn mount(
    container: Container,
    metadata: EnhancerRegistry,
    middleware: MiddlewareRegistry,
    config: RouterConfig,
) -> Arc<RouteAdapter> {
    let adapter = Arc::new(RouteAdapter::new());
    let router = RouterProxy::new(
        Arc::clone(&adapter) as Arc<dyn HttpAdapter>,
        Arc::new(container),
        Arc::new(metadata),
        Arc::new(middleware),
        config,
    );
    router.apply_routes(&[users()]).expect("routes map");
    router.install_not_found();
    adapter
}

async fn call(
    adapter: &RouteAdapter,
    method: Method,
    uri: &str,
) -> (StatusCode, http::HeaderMap, Bytes) {
    let response: http::Response<Full<Bytes>> = adapter
        .dispatch(Request::builder().method(method).uri(uri).build())
        .await;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.expect("body").to_bytes();
    (status, headers, body)
}

fn json(body: &Bytes) -> serde_json::Value {
    serde_json::from_slice(body).expect("json body")
}

#[tokio::test]
async fn test_handler_reply_is_sent_as_json() {
    let fixture = Fixture::new();
    let adapter = mount(
        fixture.container(),
        EnhancerRegistry::new(),
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (status, headers, body) = call(&adapter, Method::GET, "/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::json!([{ "id": 1 }]));
    assert!(headers.contains_key(REQUEST_ID_HEADER));
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_reply_is_no_content() {
    let fixture = Fixture::new();
    let adapter = mount(
        fixture.container(),
        EnhancerRegistry::new(),
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (status, _, body) = call(&adapter, Method::DELETE, "/users").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_guard_rejection_skips_handler() {
    let fixture = Fixture::new();
    let metadata = EnhancerRegistry::new().guard(
        Target::handler::<Users>("list"),
        GuardRef::from_fn("AdminGuard", |_| async { Ok(false) }),
    );
    let adapter = mount(
        fixture.container(),
        metadata,
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (status, headers, body) = call(&adapter, Method::GET, "/users").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let value = json(&body);
    assert_eq!(value["error"]["message"], "Unauthorized");
    assert_eq!(value["error"]["details"], "Not authorized from guard AdminGuard");
    assert_eq!(
        value["request_id"].as_str(),
        headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok())
    );
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejection_bypasses_exception_filters() {
    let fixture = Fixture::new();
    let caught = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&caught);
    let metadata = EnhancerRegistry::new()
        .guard(Target::Global, GuardRef::from_fn("Closed", |_| async { Ok(false) }))
        .filter(
            Target::Global,
            FilterRef::from_fn("Everything", move |_, _, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok(Some(Reply::text("filtered"))) }
            }),
        );
    let adapter = mount(
        fixture.container(),
        metadata,
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (status, _, _) = call(&adapter, Method::GET, "/users").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(caught.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unhandled_error_carries_trace() {
    let fixture = Fixture::new();
    let adapter = mount(
        fixture.container(),
        EnhancerRegistry::new(),
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (status, _, body) = call(&adapter, Method::GET, "/users/7").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let value = json(&body);
    assert_eq!(value["error"]["message"], "User 7 not found");
    assert_eq!(value["trace"]["message"], "User 7 not found");
    assert_eq!(value["trace"]["request"]["method"], "GET");
    let frames: Vec<&str> = value["trace"]["frames"]
        .as_array()
        .expect("frames")
        .iter()
        .filter_map(|frame| frame["name"].as_str())
        .collect();
    assert!(frames.contains(&"handler"));
}

#[tokio::test]
async fn test_trace_is_hidden_when_disabled() {
    let fixture = Fixture::new();
    let adapter = mount(
        fixture.container(),
        EnhancerRegistry::new(),
        MiddlewareRegistry::new(),
        RouterConfig::builder().expose_error_trace(false).build(),
    );

    let (status, _, body) = call(&adapter, Method::GET, "/users/7").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json(&body).get("trace").is_none());
}

#[tokio::test]
async fn test_filter_reply_is_normalized() {
    let fixture = Fixture::new();
    let metadata = EnhancerRegistry::new().filter(
        Target::class::<Users>(),
        FilterRef::filter(
            FnFilter::new(
                "NotFoundFilter",
                |error: ErrorSnapshot, _: ErrorTrace, ctx: ExecutionContext| async move {
                    ctx.response().set_status(StatusCode::NOT_FOUND);
                    Ok::<_, KeystoneError>(Some(Reply::json(serde_json::json!({
                        "missing": error.message,
                    }))))
                },
            )
            .catching([Catch::Status(StatusCode::NOT_FOUND)]),
        ),
    );
    let adapter = mount(
        fixture.container(),
        metadata,
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (status, _, body) = call(&adapter, Method::GET, "/users/9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body), serde_json::json!({ "missing": "User 9 not found" }));
}

#[tokio::test]
async fn test_only_the_nearest_matching_filter_runs() {
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let (handler_log, global_log) = (Arc::clone(&log), Arc::clone(&log));
    let metadata = EnhancerRegistry::new()
        .filter(
            Target::Global,
            FilterRef::from_fn("Global", move |_, _, _| {
                global_log.lock().push("global");
                async { Ok(Some(Reply::text("global"))) }
            }),
        )
        .filter(
            Target::handler::<Users>("show"),
            FilterRef::from_fn("Handler", move |_, _, _| {
                handler_log.lock().push("handler");
                async { Ok(Some(Reply::text("handler"))) }
            }),
        );
    let adapter = mount(
        fixture.container(),
        metadata,
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (_, _, body) = call(&adapter, Method::GET, "/users/1").await;
    assert_eq!(body, Bytes::from("handler"));
    assert_eq!(*log.lock(), ["handler"]);
}

#[tokio::test]
async fn test_interceptor_that_skips_handler_is_invalid_request() {
    let fixture = Fixture::new();
    let metadata = EnhancerRegistry::new().interceptor(
        Target::Global,
        InterceptorRef::from_fn("Cache", |_, _| async { Ok(Reply::text("cached")) }),
    );
    let adapter = mount(
        fixture.container(),
        metadata,
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (status, _, body) = call(&adapter, Method::GET, "/users").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"]["message"], INVALID_REQUEST_MESSAGE);
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_interceptors_wrap_handler_in_declaration_order() {
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let (outer, inner) = (Arc::clone(&log), Arc::clone(&log));
    let metadata = EnhancerRegistry::new()
        .interceptor(
            Target::Global,
            InterceptorRef::from_fn("Inner", move |_, next| {
                let log = Arc::clone(&inner);
                async move {
                    log.lock().push("inner:before");
                    let reply = next.handle().await;
                    log.lock().push("inner:after");
                    reply
                }
            }),
        )
        .interceptor(
            Target::handler::<Users>("list"),
            InterceptorRef::from_fn("Outer", move |_, next| {
                let log = Arc::clone(&outer);
                async move {
                    log.lock().push("outer:before");
                    let reply = next.handle().await;
                    log.lock().push("outer:after");
                    reply
                }
            }),
        );
    let adapter = mount(
        fixture.container(),
        metadata,
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (status, _, _) = call(&adapter, Method::GET, "/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        *log.lock(),
        ["outer:before", "inner:before", "inner:after", "outer:after"]
    );
}

#[tokio::test]
async fn test_shared_middleware_runs_once() {
    let fixture = Fixture::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&runs);
    let counting = MiddlewareRef::from_fn("Counting", move |_, _, next| {
        counted.fetch_add(1, Ordering::SeqCst);
        async move { next.run().await }
    });

    let mut middleware = MiddlewareRegistry::new();
    middleware.apply([counting.clone()]);
    middleware
        .apply_for_module("users", [counting])
        .for_routes(["/users"]);
    let adapter = mount(
        fixture.container(),
        EnhancerRegistry::new(),
        middleware,
        RouterConfig::default(),
    );

    let (status, _, _) = call(&adapter, Method::GET, "/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_middleware_observes_handler_error() {
    let fixture = Fixture::new();
    let observed = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&observed);
    let mut middleware = MiddlewareRegistry::new();
    middleware.apply([MiddlewareRef::from_fn("Observer", move |_, _, next| {
        let sink = Arc::clone(&sink);
        async move {
            let outcome = next.run().await;
            if let Err(error) = &outcome {
                *sink.lock() = Some(error.status_code());
            }
            outcome
        }
    })]);
    let adapter = mount(
        fixture.container(),
        EnhancerRegistry::new(),
        middleware,
        RouterConfig::default(),
    );

    let (status, _, _) = call(&adapter, Method::GET, "/users/3").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(*observed.lock(), Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn test_panic_becomes_internal_error() {
    let fixture = Fixture::new();
    let adapter = mount(
        fixture.container(),
        EnhancerRegistry::new(),
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (status, _, body) = call(&adapter, Method::GET, "/users/explode").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let value = json(&body);
    assert_eq!(value["error"]["message"], "handler exploded");
    assert_eq!(value["trace"]["type"], "panic");
}

#[tokio::test]
async fn test_unmatched_route_runs_through_pipeline() {
    let fixture = Fixture::new();
    let metadata = EnhancerRegistry::new().filter(
        Target::Global,
        FilterRef::filter(
            FnFilter::new(
                "Missing",
                |error: ErrorSnapshot, _: ErrorTrace, ctx: ExecutionContext| async move {
                    ctx.response().set_status(error.status);
                    Ok::<_, KeystoneError>(Some(Reply::text(format!("custom: {}", error.message))))
                },
            )
            .catching([Catch::Status(StatusCode::NOT_FOUND)]),
        ),
    );
    let adapter = mount(
        fixture.container(),
        metadata,
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (status, _, body) = call(&adapter, Method::GET, "/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, Bytes::from(format!("custom: {NOT_FOUND_MESSAGE}")));
}

#[tokio::test]
async fn test_holder_is_destroyed_after_request() {
    let fixture = Fixture::new();
    let adapter = mount(
        fixture.container(),
        EnhancerRegistry::new(),
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    call(&adapter, Method::GET, "/users").await;
    let holder = fixture.holder.lock().take().expect("handler saw a holder");
    assert!(holder.is_destroyed());
    assert!(holder.context().is_none());
    assert!(RequestContextHolder::current().is_none());
}

#[tokio::test]
async fn test_request_scoped_provider_is_shared_within_request() {
    let fixture = Fixture::new();
    let adapter = mount(
        fixture.container(),
        EnhancerRegistry::new(),
        MiddlewareRegistry::new(),
        RouterConfig::default(),
    );

    let (_, _, first) = call(&adapter, Method::GET, "/users/session/current").await;
    let (_, _, second) = call(&adapter, Method::GET, "/users/session/current").await;
    let (first, second) = (json(&first), json(&second));
    assert_eq!(first["first"], first["second"]);
    assert_eq!(second["first"], second["second"]);
    assert_ne!(first["first"], second["first"]);
}

#[tokio::test]
async fn test_global_prefix_applies_to_every_route() {
    let fixture = Fixture::new();
    let adapter = mount(
        fixture.container(),
        EnhancerRegistry::new(),
        MiddlewareRegistry::new(),
        RouterConfig::builder().global_prefix("api/v1").build(),
    );

    let (status, _, _) = call(&adapter, Method::GET, "/api/v1/users").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = call(&adapter, Method::GET, "/users").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(adapter.routes().iter().all(|route| route.path.starts_with("/api/v1/")));
}

#[tokio::test]
async fn test_callback_routes_share_global_enhancers() {
    let fixture = Fixture::new();
    let adapter = Arc::new(RouteAdapter::new());
    let metadata = EnhancerRegistry::new().guard(
        Target::Global,
        GuardRef::from_fn("Token", |ctx| async move {
            Ok(ctx.request().header("authorization").is_some())
        }),
    );
    let router = RouterProxy::new(
        Arc::clone(&adapter) as Arc<dyn HttpAdapter>,
        Arc::new(fixture.container()),
        Arc::new(metadata),
        Arc::new(MiddlewareRegistry::new()),
        RouterConfig::default(),
    );
    let info = router
        .route_callback(Method::GET, "/health", "health", |_| async {
            Ok(Reply::text("ok"))
        })
        .unwrap();
    assert_eq!(info.path, "/health");
    assert!(info.controller.is_none());

    let denied = adapter
        .dispatch(Request::builder().uri("/health").build())
        .await;
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = adapter
        .dispatch(
            Request::builder()
                .uri("/health")
                .header("authorization", "Bearer t")
                .build(),
        )
        .await;
    assert_eq!(allowed.status(), StatusCode::OK);
}
