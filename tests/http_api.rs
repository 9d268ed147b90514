//! HTTP API tests against an in-process router

use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use txgate::common::{Database, MemCluster, MemStore, NodeRole, Statement, METRICS};
use txgate::facade::resolver::StaticResolver;
use txgate::facade::{create_router, AppState, Membership};

struct Fixture {
    store: MemStore,
    cluster: MemCluster,
    router: Router,
}

async fn fixture(surface_init_contention: bool) -> Fixture {
    fixture_with(
        MemStore::new(),
        surface_init_contention,
        Duration::from_millis(500),
    )
    .await
}

async fn fixture_with(
    store: MemStore,
    surface_init_contention: bool,
    request_timeout: Duration,
) -> Fixture {
    store.create_schema().await.unwrap();

    let cluster = MemCluster::new();
    let leader = cluster.add("10.0.0.1:8081", NodeRole::Voter);
    cluster.add("10.0.0.2:8081", NodeRole::Voter);
    cluster.add("10.0.0.3:8081", NodeRole::Spare);
    cluster.set_leader(Some(leader));

    let hosts = BTreeMap::from([
        ("10.0.0.1".to_string(), "n1".to_string()),
        ("10.0.0.2".to_string(), "n2".to_string()),
        ("10.0.0.3".to_string(), "n3".to_string()),
    ]);
    let state = AppState {
        node: "n1".into(),
        db: Arc::new(store.clone()),
        membership: Membership::new(
            Arc::new(cluster.clone()),
            Arc::new(StaticResolver::new(hosts)),
            8081,
        ),
        expected_nodes: 3,
        request_timeout,
        surface_init_contention,
    };

    Fixture {
        store,
        cluster,
        router: create_router(state),
    }
}

async fn call(router: &Router, method: Method, path: &str, body: &str) -> String {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_append_roundtrip() {
    let f = fixture(false).await;
    let out = call(
        &f.router,
        Method::POST,
        "/append",
        "[[:append 1 10][:append 1 20][:r 1 nil]]",
    )
    .await;
    assert_eq!(out, "[[:append 1 10] [:append 1 20] [:r 1 [10 20]]]");

    let out = call(&f.router, Method::POST, "/append", "[[:r 1 nil][:r 2 nil]]").await;
    assert_eq!(out, "[[:r 1 [10 20]] [:r 2 []]]");
}

#[tokio::test]
async fn test_append_errors() {
    let f = fixture(false).await;
    let out = call(&f.router, Method::POST, "/append", "[[:cas 1 2]]").await;
    assert_eq!(out, "Error: unknown operation: :cas");

    let out = call(&f.router, Method::POST, "/append", "[[:append 1 x]]").await;
    assert!(out.starts_with("Error: "), "{}", out);
    assert!(f.store.snapshot().is_empty());
}

#[tokio::test]
async fn test_bank_flow() {
    let f = fixture(false).await;
    let out = call(
        &f.router,
        Method::PUT,
        "/bank",
        "{:accounts [1 2], :total-amount 100}",
    )
    .await;
    assert_eq!(out, "nil");
    assert_eq!(call(&f.router, Method::GET, "/bank", "").await, "{1 50, 2 50}");

    let out = call(&f.router, Method::POST, "/bank", "{:from 1, :to 2, :amount 20}").await;
    assert_eq!(out, "nil");
    assert_eq!(call(&f.router, Method::GET, "/bank", "").await, "{1 30, 2 70}");

    let out = call(&f.router, Method::PUT, "/bank", "{:accounts [1], :total-amount 5}").await;
    assert_eq!(out, "nil");
    assert_eq!(call(&f.router, Method::GET, "/bank", "").await, "{1 30, 2 70}");

    let out = call(&f.router, Method::POST, "/bank", "{:from 1, :to 2}").await;
    assert!(out.starts_with("Error: malformed request"), "{}", out);
}

#[tokio::test]
async fn test_bank_init_contention() {
    for surface in [false, true] {
        let f = fixture(surface).await;
        let mut holder = f.store.begin().await.unwrap();
        holder
            .exec(&Statement::Insert {
                key: 9.into(),
                value: 9.into(),
            })
            .await
            .unwrap();

        let masked = METRICS.masked_contention.get();
        let out = call(
            &f.router,
            Method::PUT,
            "/bank",
            "{:accounts [1 2], :total-amount 100}",
        )
        .await;
        if surface {
            assert_eq!(out, "Error: database is locked");
            assert_eq!(METRICS.masked_contention.get(), masked);
        } else {
            assert_eq!(out, "nil");
            assert_eq!(METRICS.masked_contention.get(), masked + 1);
        }
        holder.rollback().await.unwrap();
    }
}

#[tokio::test]
async fn test_deeply_nested_body_is_rejected() {
    let f = fixture(false).await;
    let out = call(&f.router, Method::PUT, "/bank", &"[".repeat(200_000)).await;
    assert!(out.starts_with("Error: malformed request"), "{}", out);
    assert!(f.store.snapshot().is_empty());
}

#[tokio::test]
async fn test_deadline_inside_transaction() {
    let f = fixture_with(
        MemStore::with_busy_timeout(Duration::from_secs(10)),
        false,
        Duration::from_millis(50),
    )
    .await;
    let mut holder = f.store.begin().await.unwrap();
    holder
        .exec(&Statement::Insert {
            key: 9.into(),
            value: 9.into(),
        })
        .await
        .unwrap();

    let out = call(&f.router, Method::POST, "/append", "[[:append 1 1][:append 2 2]]").await;
    assert_eq!(out, "Error: operation timeout: deadline exceeded");

    holder.commit().await.unwrap();
    let values: Vec<i64> = f.store.snapshot().iter().map(|e| e.value).collect();
    assert_eq!(values, vec![9]);

    let out = call(&f.router, Method::POST, "/append", "[[:append 2 2][:r 1 nil]]").await;
    assert_eq!(out, "[[:append 2 2] [:r 1 []]]");
}

#[tokio::test]
async fn test_set() {
    let f = fixture(false).await;
    assert_eq!(call(&f.router, Method::POST, "/set", "4").await, "4");
    assert_eq!(call(&f.router, Method::POST, "/set", "8").await, "8");
    assert_eq!(call(&f.router, Method::GET, "/set", "").await, "[4 8]");
}

#[tokio::test]
async fn test_membership_endpoints() {
    let f = fixture(false).await;
    assert_eq!(call(&f.router, Method::GET, "/leader", "").await, "\"n1\"");
    assert_eq!(
        call(&f.router, Method::GET, "/members", "").await,
        "[\"n1\" \"n2\" \"n3\"]"
    );
    assert_eq!(
        call(&f.router, Method::GET, "/ready", "").await,
        "Error: node 10.0.0.3:8081 is still spare"
    );

    f.cluster.adjust_roles(3, 0);
    assert_eq!(call(&f.router, Method::GET, "/ready", "").await, "nil");

    assert_eq!(call(&f.router, Method::DELETE, "/members", "n3").await, "nil");
    assert_eq!(
        call(&f.router, Method::DELETE, "/members", "n3").await,
        "Error: no node named n3"
    );
    assert_eq!(
        call(&f.router, Method::GET, "/ready", "").await,
        "Error: cluster has still only 2 nodes (expected 3)"
    );

    f.cluster.set_leader(None);
    assert_eq!(call(&f.router, Method::GET, "/leader", "").await, "\"\"");
}

#[tokio::test]
async fn test_bad_requests() {
    let f = fixture(false).await;
    for (method, path) in [
        (Method::GET, "/append"),
        (Method::DELETE, "/bank"),
        (Method::PUT, "/set"),
        (Method::POST, "/leader"),
        (Method::PUT, "/members"),
        (Method::POST, "/ready"),
        (Method::POST, "/health"),
        (Method::DELETE, "/metrics"),
        (Method::GET, "/nowhere"),
    ] {
        assert_eq!(
            call(&f.router, method, path, "").await,
            "Error: bad request",
            "{}",
            path
        );
    }
}

#[tokio::test]
async fn test_health_and_metrics() {
    let f = fixture(false).await;
    call(&f.router, Method::GET, "/set", "").await;

    let health: serde_json::Value =
        serde_json::from_str(&call(&f.router, Method::GET, "/health", "").await).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["node"], "n1");

    let metrics = call(&f.router, Method::GET, "/metrics", "").await;
    assert!(metrics.contains("txgate_requests_total{endpoint=\"set\"}"));
}
