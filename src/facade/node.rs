//! Replication node lifecycle
//!
//! A node joins (or bootstraps) the cluster, opens the shared database,
//! hands leadership over before it stops and is closed last. Role
//! rebalancing runs in the background while the node is up.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::common::{ClusterHandle, Database, Error, MemCluster, MemStore, NodeRole, Result};

/// Bootstrap parameters of a node.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Replication address, `host:port`
    pub address: String,
    /// Members to contact when joining
    pub join: Vec<String>,
    pub voters: usize,
    pub standbys: usize,
    pub network_latency: Duration,
    pub roles_adjustment_frequency: Duration,
    /// How long a writer waits for the write lock
    pub busy_timeout: Duration,
}

impl NodeOptions {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            join: Vec::new(),
            voters: 3,
            standbys: 0,
            network_latency: Duration::from_millis(5),
            roles_adjustment_frequency: Duration::from_secs(1),
            busy_timeout: Duration::ZERO,
        }
    }

    pub fn with_cluster(mut self, join: Vec<String>) -> Self {
        self.join = join;
        self
    }

    pub fn with_voters(mut self, voters: usize) -> Self {
        self.voters = voters;
        self
    }

    pub fn with_standbys(mut self, standbys: usize) -> Self {
        self.standbys = standbys;
        self
    }

    pub fn with_network_latency(mut self, latency: Duration) -> Self {
        self.network_latency = latency;
        self
    }

    pub fn with_roles_adjustment_frequency(mut self, frequency: Duration) -> Self {
        self.roles_adjustment_frequency = frequency;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

#[async_trait]
pub trait Node: Send + Sync {
    /// Join or bootstrap the cluster. Returns once the node is a member.
    async fn ready(&self) -> Result<()>;

    /// Open the named database.
    async fn open(&self, name: &str) -> Result<Arc<dyn Database>>;

    /// Handle on the membership as seen from this node.
    fn cluster(&self) -> Arc<dyn ClusterHandle>;

    /// Transfer leadership away from this node, if it leads.
    async fn handover(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// In-process node backed by [`MemCluster`] and [`MemStore`].
///
/// Nodes built with [`LocalNode::with_engine`] over the same cluster and
/// store behave like members of one replicated cluster.
pub struct LocalNode {
    dir: PathBuf,
    options: NodeOptions,
    cluster: MemCluster,
    store: MemStore,
    id: Mutex<Option<u64>>,
    roles_task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalNode {
    pub async fn new(dir: impl AsRef<Path>, options: NodeOptions) -> Result<Self> {
        let store = MemStore::with_busy_timeout(options.busy_timeout);
        Self::with_engine(dir, options, MemCluster::new(), store).await
    }

    pub async fn with_engine(
        dir: impl AsRef<Path>,
        options: NodeOptions,
        cluster: MemCluster,
        store: MemStore,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            options,
            cluster,
            store,
            id: Mutex::new(None),
            roles_task: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Engine id of this node once it is a member.
    pub fn id(&self) -> Option<u64> {
        *self.id.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn join(&self) -> Result<u64> {
        if self.cluster.is_empty() {
            if !self.options.join.is_empty() {
                tracing::warn!(
                    join = ?self.options.join,
                    "no member reachable, bootstrapping a new cluster"
                );
            }
            let id = self.cluster.add(&self.options.address, NodeRole::Voter);
            self.cluster.set_leader(Some(id));
            tracing::info!(address = %self.options.address, id, "cluster bootstrapped");
            return Ok(id);
        }

        let members = self.cluster.nodes();
        let reachable = self.options.join.is_empty()
            || self
                .options
                .join
                .iter()
                .any(|addr| members.iter().any(|m| &m.address == addr));
        if !reachable {
            return Err(Error::Storage(format!(
                "no join target among {}",
                self.options.join.join(",")
            )));
        }

        let id = self.cluster.add(&self.options.address, NodeRole::Spare);
        tracing::info!(address = %self.options.address, id, "joined cluster as spare");
        Ok(id)
    }

    fn spawn_roles_adjustment(&self) -> JoinHandle<()> {
        let cluster = self.cluster.clone();
        let voters = self.options.voters;
        let standbys = self.options.standbys;
        let frequency = self.options.roles_adjustment_frequency;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frequency);
            loop {
                ticker.tick().await;
                adjust_roles(&cluster, voters, standbys);
            }
        })
    }
}

/// One rebalancing round: promote members and elect a leader if none.
fn adjust_roles(cluster: &MemCluster, voters: usize, standbys: usize) {
    cluster.adjust_roles(voters, standbys);
    if cluster.leader_id().is_none() {
        let next = cluster
            .nodes()
            .into_iter()
            .find(|n| n.role == NodeRole::Voter)
            .map(|n| n.id);
        if let Some(id) = next {
            tracing::info!(id, "leader elected");
            cluster.set_leader(Some(id));
        }
    }
}

#[async_trait]
impl Node for LocalNode {
    async fn ready(&self) -> Result<()> {
        let id = self.join()?;
        *self.id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);

        let task = self.spawn_roles_adjustment();
        if let Some(old) = self
            .roles_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task)
        {
            old.abort();
        }
        Ok(())
    }

    async fn open(&self, name: &str) -> Result<Arc<dyn Database>> {
        if self.id().is_none() {
            return Err(Error::Storage(format!(
                "cannot open {}: node is not ready",
                name
            )));
        }
        tracing::debug!(name, dir = %self.dir.display(), "database opened");
        Ok(Arc::new(self.store.clone()))
    }

    fn cluster(&self) -> Arc<dyn ClusterHandle> {
        Arc::new(self.cluster.clone())
    }

    async fn handover(&self) -> Result<()> {
        let Some(id) = self.id() else {
            return Ok(());
        };
        if self.cluster.leader_id() != Some(id) {
            return Ok(());
        }
        match self.cluster.transfer_leadership(id) {
            Some(next) if next != id => {
                tracing::info!(from = id, to = next, "leadership transferred");
            }
            _ => tracing::debug!(id, "no other voter to hand leadership to"),
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self
            .roles_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        tracing::debug!(address = %self.options.address, "node closed");
        Ok(())
    }
}
