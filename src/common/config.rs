//! Configuration for txgate nodes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::common::{Error, Result};

/// Default API port. The replication engine listens on the next port.
pub const DEFAULT_API_PORT: u16 = 8080;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node name (hostname, also its external identity)
    pub node: String,

    /// Names of all nodes in the cluster, in bootstrap order
    pub cluster: Vec<String>,

    /// Data directory (marker files, engine state)
    pub dir: PathBuf,

    /// Port of the HTTP API
    pub api_port: u16,

    /// Port of the replication engine (defaults to API port + 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_port: Option<u16>,

    /// Average one-way network latency, in milliseconds
    pub latency_ms: u64,

    /// Per-request deadline (defaults to 100 x latency)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    /// Attempts at creating the schema when the database is locked
    pub schema_retries: u32,

    /// Fixed pause between schema attempts
    pub schema_backoff_ms: u64,

    /// Grace period for leadership handover at shutdown
    pub handover_grace_ms: u64,

    /// How long a writer waits for the engine's write lock
    pub busy_timeout_ms: u64,

    /// How often the engine rebalances voter/stand-by/spare roles
    pub roles_adjustment_ms: u64,

    /// Address to identity resolution
    pub resolver: ResolverConfig,

    /// Bank workload behaviour
    pub bank: BankConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: "localhost".to_string(),
            cluster: Vec::new(),
            dir: PathBuf::from("./txgate-data"),
            api_port: DEFAULT_API_PORT,
            replication_port: None,
            latency_ms: 5,
            request_timeout_ms: None,
            schema_retries: 10,
            schema_backoff_ms: 250,
            handover_grace_ms: 1000,
            busy_timeout_ms: 0,
            roles_adjustment_ms: 1000,
            resolver: ResolverConfig::default(),
            bank: BankConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// Reverse (PTR) and forward lookups through the system resolver
    #[default]
    Dns,
    /// Fixed address -> hostname table
    Static,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub kind: ResolverKind,

    /// IP address -> hostname, used by the static resolver
    pub hosts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Report a lock conflict during account initialization instead of
    /// answering `nil`
    pub surface_init_contention: bool,
}

impl Config {
    /// Load configuration from `txgate.toml` (optional) and `TXGATE__*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from("txgate")
    }

    pub fn load_from(name: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(
                config::Environment::with_prefix("TXGATE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cluster")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn replication_port(&self) -> u16 {
        self.replication_port
            .unwrap_or_else(|| self.api_port.saturating_add(1))
    }

    pub fn network_latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// With a 2 ms latency the engine's election timeout is about 30 ms, so
    /// 100 x latency leaves room for a few election rounds.
    pub fn request_timeout(&self) -> Duration {
        match self.request_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.network_latency() * 100,
        }
    }

    pub fn schema_backoff(&self) -> Duration {
        Duration::from_millis(self.schema_backoff_ms)
    }

    pub fn handover_grace(&self) -> Duration {
        Duration::from_millis(self.handover_grace_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn roles_adjustment_frequency(&self) -> Duration {
        Duration::from_millis(self.roles_adjustment_ms)
    }

    /// The expected node set, defaulting to this node alone.
    pub fn expected_nodes(&self) -> Vec<String> {
        if self.cluster.is_empty() {
            vec![self.node.clone()]
        } else {
            self.cluster.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.is_empty() {
            return Err(Error::InvalidConfig("node name is empty".into()));
        }
        if !self.cluster.is_empty() && !self.cluster.iter().any(|n| n == &self.node) {
            return Err(Error::InvalidConfig(format!(
                "node {} is not part of cluster {}",
                self.node,
                self.cluster.join(",")
            )));
        }
        if self.replication_port() == self.api_port {
            return Err(Error::InvalidConfig(
                "replication port must differ from API port".into(),
            ));
        }
        if self.schema_retries == 0 {
            return Err(Error::InvalidConfig("schema_retries must be > 0".into()));
        }
        if self.resolver.kind == ResolverKind::Static && self.resolver.hosts.is_empty() {
            return Err(Error::InvalidConfig(
                "static resolver needs at least one host entry".into(),
            ));
        }
        Ok(())
    }
}
