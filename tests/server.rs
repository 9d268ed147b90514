//! Node startup, serving and shutdown

use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use txgate::common::{ResolverConfig, ResolverKind};
use txgate::facade::server::REMOVED_MARKER;
use txgate::ops::{wait_ready, Client};
use txgate::{Config, Server};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn local_config(dir: &TempDir, api_port: u16) -> Config {
    Config {
        node: "n1".into(),
        dir: dir.path().to_path_buf(),
        api_port,
        resolver: ResolverConfig {
            kind: ResolverKind::Static,
            hosts: BTreeMap::from([("127.0.0.1".to_string(), "n1".to_string())]),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_removed_node_does_not_start() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(REMOVED_MARKER), b"").unwrap();

    let server = Server::new(local_config(&dir, free_port()));
    tokio::time::timeout(
        Duration::from_secs(5),
        server.serve_with_shutdown(std::future::pending()),
    )
    .await
    .expect("removed node should return immediately")
    .unwrap();
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = local_config(&dir, free_port());
    config.cluster = vec!["n2".into(), "n3".into()];
    assert!(Server::new(config).serve().await.is_err());
}

#[tokio::test]
async fn test_multi_node_cluster_fails_fast() {
    let dir = TempDir::new().unwrap();
    let mut config = local_config(&dir, free_port());
    config.cluster = vec!["n1".into(), "n2".into(), "n3".into()];
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        Server::new(config).serve_with_shutdown(std::future::pending()),
    )
    .await
    .expect("startup should fail immediately");
    assert!(matches!(result, Err(txgate::Error::InvalidConfig(_))));
}

#[tokio::test]
async fn test_single_node_serves_until_shutdown() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let (stop, stopped) = oneshot::channel::<()>();

    let server = Server::new(local_config(&dir, port));
    let handle = tokio::spawn(server.serve_with_shutdown(async {
        let _ = stopped.await;
    }));

    let client = Client::new(format!("http://127.0.0.1:{}", port), Duration::from_secs(1)).unwrap();
    wait_ready(&client, 50, Duration::from_millis(50))
        .await
        .unwrap();

    assert_eq!(client.leader().await.unwrap(), "\"n1\"");
    assert_eq!(client.members().await.unwrap(), "[\"n1\"]");
    assert_eq!(
        client.append("[[:append 1 10][:r 1 nil]]").await.unwrap(),
        "[[:append 1 10] [:r 1 [10]]]"
    );
    assert_eq!(client.init_accounts(&[1, 2], 10).await.unwrap(), "nil");
    assert!(client.remove("n9").await.is_err());

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server should stop")
        .unwrap()
        .unwrap();
}
