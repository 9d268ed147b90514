//! Membership controller
//!
//! Every call opens a handle to the current leader, performs one round
//! trip against it and drops it. Nothing is cached between calls.

use std::sync::Arc;
use tracing::Instrument;

use crate::common::{make_address, ClusterHandle, Error, LeaderClient, NodeInfo, NodeRole, Result};
use crate::facade::resolver::{resolve_identity, Resolver};

/// Progress of one membership call, recorded on its span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingLeaderHandle,
    QueryingCluster,
    Resolving,
    Mutating,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::AwaitingLeaderHandle => "awaiting_leader_handle",
            Phase::QueryingCluster => "querying_cluster",
            Phase::Resolving => "resolving",
            Phase::Mutating => "mutating",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }
}

fn enter(phase: Phase) {
    tracing::Span::current().record("phase", phase.as_str());
    tracing::trace!(phase = phase.as_str());
}

fn finish<T>(result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => enter(Phase::Done),
        Err(e) => {
            enter(Phase::Failed);
            tracing::debug!(error = %e, "membership call failed");
        }
    }
    result
}

#[derive(Clone)]
pub struct Membership {
    cluster: Arc<dyn ClusterHandle>,
    resolver: Arc<dyn Resolver>,
    replication_port: u16,
}

impl Membership {
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        resolver: Arc<dyn Resolver>,
        replication_port: u16,
    ) -> Self {
        Self {
            cluster,
            resolver,
            replication_port,
        }
    }

    async fn leader_client(&self) -> Result<Box<dyn LeaderClient>> {
        enter(Phase::AwaitingLeaderHandle);
        self.cluster.leader_client().await
    }

    async fn members_of(&self, client: &dyn LeaderClient) -> Result<Vec<NodeInfo>> {
        enter(Phase::QueryingCluster);
        client.cluster().await
    }

    /// Identity of the current leader, `None` when no leader is elected.
    pub async fn leader(&self) -> Result<Option<String>> {
        let span = tracing::debug_span!("leader", phase = Phase::Idle.as_str());
        async { finish(self.query_leader().await) }
            .instrument(span)
            .await
    }

    async fn query_leader(&self) -> Result<Option<String>> {
        let client = self.leader_client().await?;
        enter(Phase::QueryingCluster);
        let Some(node) = client.leader().await? else {
            return Ok(None);
        };
        enter(Phase::Resolving);
        let name = resolve_identity(self.resolver.as_ref(), &node.address).await?;
        Ok(Some(name))
    }

    /// Identities of all members, in engine order. One unresolvable member
    /// fails the whole listing.
    pub async fn members(&self) -> Result<Vec<String>> {
        let span = tracing::debug_span!("members", phase = Phase::Idle.as_str());
        async { finish(self.query_members().await) }
            .instrument(span)
            .await
    }

    async fn query_members(&self) -> Result<Vec<String>> {
        let client = self.leader_client().await?;
        let members = self.members_of(client.as_ref()).await?;
        enter(Phase::Resolving);
        let mut names = Vec::with_capacity(members.len());
        for node in &members {
            names.push(resolve_identity(self.resolver.as_ref(), &node.address).await?);
        }
        Ok(names)
    }

    /// Remove the member named `identity`, matched by its replication
    /// address.
    pub async fn remove(&self, identity: &str) -> Result<()> {
        let identity = identity.trim();
        let span = tracing::debug_span!("remove", identity, phase = Phase::Idle.as_str());
        async { finish(self.remove_member(identity).await) }
            .instrument(span)
            .await
    }

    async fn remove_member(&self, identity: &str) -> Result<()> {
        let client = self.leader_client().await?;
        let members = self.members_of(client.as_ref()).await?;

        enter(Phase::Resolving);
        let ip = self.resolver.forward(identity).await?;
        let address = make_address(&ip.to_string(), self.replication_port);

        let node = members
            .iter()
            .find(|n| n.address == address)
            .ok_or_else(|| Error::NodeNotFound(identity.to_string()))?;

        enter(Phase::Mutating);
        client.remove(node.id).await?;
        tracing::info!(identity, address = %node.address, id = node.id, "member removed");
        Ok(())
    }

    /// Succeeds once the cluster has all `expected` nodes and none of them
    /// is a spare.
    pub async fn ready(&self, expected: usize) -> Result<()> {
        let span = tracing::debug_span!("ready", expected, phase = Phase::Idle.as_str());
        async {
            let result = match self.leader_client().await {
                Ok(client) => self
                    .members_of(client.as_ref())
                    .await
                    .and_then(|members| check_readiness(&members, expected)),
                Err(e) => Err(e),
            };
            finish(result)
        }
        .instrument(span)
        .await
    }
}

/// Readiness predicate over a membership snapshot.
pub fn check_readiness(members: &[NodeInfo], expected: usize) -> Result<()> {
    if members.len() != expected {
        return Err(Error::ClusterIncomplete {
            expected,
            actual: members.len(),
        });
    }
    if let Some(node) = members.iter().find(|n| n.role == NodeRole::Spare) {
        return Err(Error::NodeNotVoter {
            address: node.address.clone(),
            role: node.role.to_string(),
        });
    }
    Ok(())
}
