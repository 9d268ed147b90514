//! Node startup and shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{
    make_address, other_addresses, preceding_addresses, Config, Database, Error, Result, METRICS,
};
use crate::facade::http::{create_router, AppState};
use crate::facade::membership::Membership;
use crate::facade::node::{LocalNode, Node, NodeOptions};
use crate::facade::resolver;

/// Present once the node has been removed from the cluster. The node then
/// refuses to start.
pub const REMOVED_MARKER: &str = "removed";

/// Present when the node comes back after a removal: it joins every other
/// node instead of only the preceding ones.
pub const REJOIN_MARKER: &str = "rejoin";

/// Name of the database every workload uses.
pub const DATABASE_NAME: &str = "app";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Markers {
    pub removed: bool,
    pub rejoin: bool,
}

impl Markers {
    pub async fn read(dir: &Path) -> Result<Self> {
        Ok(Self {
            removed: marker_exists(dir, REMOVED_MARKER).await?,
            rejoin: marker_exists(dir, REJOIN_MARKER).await?,
        })
    }
}

async fn marker_exists(dir: &Path, name: &str) -> Result<bool> {
    match tokio::fs::metadata(dir.join(name)).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Internal(format!("check if '{}' exists: {}", name, e))),
    }
}

/// Replication addresses this node contacts when joining.
pub fn join_addresses(config: &Config, rejoin: bool) -> Vec<String> {
    let port = config.replication_port();
    if rejoin {
        other_addresses(&config.node, &config.cluster, port)
    } else {
        preceding_addresses(&config.node, &config.cluster, port)
    }
}

pub fn node_options(config: &Config, ip: &str, rejoin: bool) -> NodeOptions {
    let mut options = NodeOptions::new(make_address(ip, config.replication_port()))
        .with_cluster(join_addresses(config, rejoin))
        .with_network_latency(config.network_latency())
        .with_roles_adjustment_frequency(config.roles_adjustment_frequency())
        .with_busy_timeout(config.busy_timeout());
    let n = config.cluster.len();
    if n > 1 {
        options = options.with_voters(n);
    }
    options
}

/// The bundled engine lives inside one process, so separate node processes
/// cannot share its membership table.
pub fn check_engine_scope(config: &Config) -> Result<()> {
    if config.cluster.len() > 1 {
        return Err(Error::InvalidConfig(format!(
            "the in-process engine cannot span {} node processes; run a single-node cluster",
            config.cluster.len()
        )));
    }
    Ok(())
}

/// Create the schema, retrying while the database is locked.
pub async fn ensure_schema(db: &dyn Database, attempts: u32, backoff: Duration) -> Result<()> {
    let mut attempt = 1;
    loop {
        match db.create_schema().await {
            Ok(()) => return Ok(()),
            Err(Error::Contention) if attempt < attempts => {
                METRICS.schema_retries.inc();
                tracing::debug!(attempt, "schema creation contended, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(Error::Contention) => {
                return Err(Error::Storage(format!(
                    "create schema: database still locked after {} attempts",
                    attempts
                )))
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Serve until SIGINT or SIGTERM.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(wait_for_signal()).await
    }

    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = self.config;
        config.validate()?;
        check_engine_scope(&config)?;
        tokio::fs::create_dir_all(&config.dir).await?;

        let markers = Markers::read(&config.dir).await?;
        if markers.removed {
            tracing::info!(node = %config.node, "node was removed, not starting");
            return Ok(());
        }

        let resolver = resolver::from_config(&config.resolver)?;
        let ip = resolver.forward(&config.node).await?;
        tracing::info!(
            node = %config.node,
            ip = %ip,
            cluster = %config.cluster.join(","),
            rejoin = markers.rejoin,
            "starting node"
        );

        let options = node_options(&config, &ip.to_string(), markers.rejoin);
        let node = LocalNode::new(&config.dir, options).await?;
        node.ready().await?;
        tracing::info!("node ready");

        let db = node.open(DATABASE_NAME).await?;
        ensure_schema(db.as_ref(), config.schema_retries, config.schema_backoff()).await?;

        let state = AppState {
            node: config.node.clone(),
            db: db.clone(),
            membership: Membership::new(node.cluster(), resolver, config.replication_port()),
            expected_nodes: config.expected_nodes().len(),
            request_timeout: config.request_timeout(),
            surface_init_contention: config.bank.surface_init_contention,
        };
        let router = create_router(state);

        let addr = SocketAddr::new(ip, config.api_port);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "serving API");

        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;
        if let Err(e) = &served {
            tracing::error!(error = %e, "HTTP server error");
        }

        shutdown_node(&node, db, config.handover_grace()).await?;
        served.map_err(Error::from)
    }
}

/// Hand leadership over within `grace`, then close the database and the
/// node.
pub async fn shutdown_node(node: &dyn Node, db: Arc<dyn Database>, grace: Duration) -> Result<()> {
    match tokio::time::timeout(grace, node.handover()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "handover failed"),
        Err(_) => tracing::warn!(grace_ms = grace.as_millis() as u64, "handover timed out"),
    }
    db.close().await?;
    node.close().await?;
    tracing::info!("node stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
