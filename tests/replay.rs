//! Executor and service behaviour against a real HTTP upstream on loopback.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::Path;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use replay_guard::{
    CapturedHeaders, CapturedRequest, Caller, Error, InMemoryRequestStore, PolicyBuilder,
    ReplayError, ReplayExecutor, ReplayMethod, ReplayService, StaticResolver, TargetUrl,
    TargetValidator, MAX_RESPONSE_BODY, TRUNCATION_MARKER,
};

const LOOPBACK: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "method": method.as_str(),
        "host": header("host"),
        "authorization": header("authorization"),
        "x_custom": header("x-custom"),
        "x_forwarded_for": header("x-forwarded-for"),
        "connection": header("connection"),
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/echo", any(echo))
        .route("/big", get(|| async { "x".repeat(250_000) }))
        .route(
            "/redirect",
            get(|| async {
                (
                    StatusCode::MOVED_PERMANENTLY,
                    [(header::LOCATION, "http://169.254.169.254/latest/meta-data")],
                )
            }),
        )
        .route(
            "/slow",
            any(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .route("/n/{id}", get(|Path(id): Path<u32>| async move { format!("n{id}") }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn target(addr: SocketAddr, path: &str) -> TargetUrl {
    TargetUrl::parse(&format!("http://upstream.test:{}{}", addr.port(), path)).unwrap()
}

fn body_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_headers_rewritten_and_host_preserved() {
    let addr = spawn_upstream().await;
    let headers: CapturedHeaders = [
        ("X-Custom", "kept"),
        ("Authorization", "Bearer secret"),
        ("Host", "old.example"),
        ("X-Forwarded-For", "203.0.113.9"),
        ("Connection", "close"),
    ]
    .into_iter()
    .collect();
    let request = CapturedRequest::new("u", ReplayMethod::Post)
        .with_headers(headers)
        .with_body("payload");

    let response = ReplayExecutor::default()
        .execute(&request, &target(addr, "/echo"), LOOPBACK)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    let echoed = body_json(&response.body);
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["x_custom"], "kept");
    assert_eq!(echoed["authorization"], "Bearer secret");
    assert_eq!(echoed["host"], format!("upstream.test:{}", addr.port()));
    assert_eq!(echoed["x_forwarded_for"], Value::Null);
    assert_eq!(echoed["body"], "payload");
}

#[tokio::test]
async fn test_get_never_sends_body() {
    let addr = spawn_upstream().await;
    let request = CapturedRequest::new("u", ReplayMethod::Get).with_body("should not be sent");

    let response = ReplayExecutor::default()
        .execute(&request, &target(addr, "/echo"), LOOPBACK)
        .await
        .unwrap();

    let echoed = body_json(&response.body);
    assert_eq!(echoed["method"], "GET");
    assert_eq!(echoed["body"], "");
}

#[tokio::test]
async fn test_large_body_is_truncated() {
    let addr = spawn_upstream().await;
    let request = CapturedRequest::new("u", ReplayMethod::Get);

    let response = ReplayExecutor::default()
        .execute(&request, &target(addr, "/big"), LOOPBACK)
        .await
        .unwrap();

    assert!(response.truncated);
    assert_eq!(response.body.len(), MAX_RESPONSE_BODY + TRUNCATION_MARKER.len());
    assert!(response.body.ends_with(TRUNCATION_MARKER.as_bytes()));
}

#[tokio::test]
async fn test_redirect_is_not_followed() {
    let addr = spawn_upstream().await;
    let request = CapturedRequest::new("u", ReplayMethod::Get);

    let response = ReplayExecutor::default()
        .execute(&request, &target(addr, "/redirect"), LOOPBACK)
        .await
        .unwrap();

    assert_eq!(response.status, 301);
    assert_eq!(
        response.headers.get("location").map(String::as_str),
        Some("http://169.254.169.254/latest/meta-data")
    );
    assert!(!response.truncated);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let addr = spawn_upstream().await;
    let request = CapturedRequest::new("u", ReplayMethod::Get);
    let executor = ReplayExecutor::new(Duration::from_millis(300), MAX_RESPONSE_BODY);

    let err = executor
        .execute(&request, &target(addr, "/slow"), LOOPBACK)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err:?}");
    assert_eq!(err.failure_kind().map(|k| k.as_str()), Some("timeout"));
}

#[tokio::test]
async fn test_refused_connection_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let request = CapturedRequest::new("u", ReplayMethod::Get);
    let err = ReplayExecutor::default()
        .execute(&request, &target(addr, "/"), LOOPBACK)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network { .. }), "{err:?}");
    assert_eq!(err.failure_kind().map(|k| k.as_str()), Some("network_error"));
}

#[tokio::test]
async fn test_concurrent_replays_do_not_interfere() {
    let addr = spawn_upstream().await;
    let executor = Arc::new(ReplayExecutor::default());
    let request = Arc::new(CapturedRequest::new("u", ReplayMethod::Get));

    let tasks = (0..16u32).map(|i| {
        let executor = Arc::clone(&executor);
        let request = Arc::clone(&request);
        tokio::spawn(async move {
            let response = executor
                .execute(&request, &target(addr, &format!("/n/{i}")), LOOPBACK)
                .await
                .unwrap();
            (i, response)
        })
    });

    for result in futures_util::future::join_all(tasks).await {
        let (i, response) = result.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], format!("n{i}").as_bytes());
    }
}

fn service(timeout: Duration, store: InMemoryRequestStore) -> ReplayService {
    let resolver = StaticResolver::new()
        .with("upstream.test", [LOOPBACK])
        .with("rebind.test", [LOOPBACK, "10.0.0.8".parse().unwrap()]);
    // Loopback is opened up so the local upstream is reachable; 10/8 stays blocked.
    let policy = PolicyBuilder::new()
        .allow_cidr("127.0.0.1/32".parse().unwrap())
        .build();
    let validator = TargetValidator::new(policy, Arc::new(resolver));
    let executor = ReplayExecutor::new(timeout, MAX_RESPONSE_BODY);
    ReplayService::new(validator, executor, Arc::new(store))
}

#[tokio::test]
async fn test_service_end_to_end() {
    let addr = spawn_upstream().await;
    let store = InMemoryRequestStore::new();
    let captured = CapturedRequest::new("alice", ReplayMethod::Put).with_body("v=1");
    let id = captured.id;
    store.insert(captured).unwrap();
    let service = service(Duration::from_millis(500), store);
    let alice = Caller::new("alice", true);

    let ok = service
        .replay(&alice, id, &format!("http://upstream.test:{}/echo", addr.port()))
        .await
        .unwrap();
    assert_eq!(body_json(&ok.body)["method"], "PUT");
    assert_eq!(body_json(&ok.body)["body"], "v=1");

    let rebind = service
        .replay(&alice, id, &format!("http://rebind.test:{}/echo", addr.port()))
        .await
        .unwrap_err();
    assert_eq!(rebind, ReplayError::PolicyRejection);

    let slow = service
        .replay(&alice, id, &format!("http://upstream.test:{}/slow", addr.port()))
        .await
        .unwrap_err();
    assert_eq!(slow, ReplayError::Timeout);
}

#[tokio::test]
async fn test_concurrent_service_replays_keep_their_own_outcome() {
    let addr = spawn_upstream().await;
    let store = InMemoryRequestStore::new();
    let captured = CapturedRequest::new("alice", ReplayMethod::Get);
    let id = captured.id;
    store.insert(captured).unwrap();

    // Every third host also resolves into 10/8 and must be refused.
    let mut resolver = StaticResolver::new();
    for i in 0..24u32 {
        let host = format!("h{i}.test");
        resolver = if i % 3 == 0 {
            resolver.with(&host, [LOOPBACK, format!("10.0.{i}.1").parse().unwrap()])
        } else {
            resolver.with(&host, [LOOPBACK])
        };
    }
    let policy = PolicyBuilder::new()
        .allow_cidr("127.0.0.1/32".parse().unwrap())
        .build();
    let service = ReplayService::new(
        TargetValidator::new(policy, Arc::new(resolver)),
        ReplayExecutor::default(),
        Arc::new(store),
    );
    let alice = Caller::new("alice", true);

    let tasks = (0..24u32).map(|i| {
        let service = service.clone();
        let alice = alice.clone();
        tokio::spawn(async move {
            let url = format!("http://h{i}.test:{}/n/{i}", addr.port());
            (i, service.replay(&alice, id, &url).await)
        })
    });

    for result in futures_util::future::join_all(tasks).await {
        let (i, outcome) = result.unwrap();
        if i % 3 == 0 {
            assert_eq!(outcome.unwrap_err(), ReplayError::PolicyRejection, "h{i}.test");
        } else {
            let response = outcome.unwrap();
            assert_eq!(response.status, 200);
            assert_eq!(&response.body[..], format!("n{i}").as_bytes());
        }
    }
}
