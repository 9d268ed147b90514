//! Cluster view exposed by the replication engine
//!
//! Membership is owned by the engine. Callers get a handle routed to the
//! current leader ([`ClusterHandle::leader_client`]) and use it for one
//! round trip: who leads, who belongs, remove a member.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::common::{Error, Result};

/// Participation of a node in replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Replicates the log and votes in elections
    Voter,
    /// Replicates the log, ready to be promoted
    StandBy,
    /// Neither replicates nor votes
    Spare,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Voter => write!(f, "voter"),
            NodeRole::StandBy => write!(f, "stand-by"),
            NodeRole::Spare => write!(f, "spare"),
        }
    }
}

/// A member as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: u64,
    /// Replication address, `host:port`
    pub address: String,
    pub role: NodeRole,
}

#[async_trait]
pub trait LeaderClient: Send + Sync {
    /// Current leader, if one is elected.
    async fn leader(&self) -> Result<Option<NodeInfo>>;
    async fn cluster(&self) -> Result<Vec<NodeInfo>>;
    async fn remove(&self, id: u64) -> Result<()>;
}

#[async_trait]
pub trait ClusterHandle: Send + Sync {
    /// Connect to the current leader.
    async fn leader_client(&self) -> Result<Box<dyn LeaderClient>>;
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: Vec<NodeInfo>,
    leader: Option<u64>,
    next_id: u64,
}

/// Shared in-process membership table.
#[derive(Debug, Clone, Default)]
pub struct MemCluster {
    state: Arc<RwLock<ClusterState>>,
}

impl MemCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ClusterState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ClusterState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a node, returning its id. An existing address keeps its id.
    pub fn add(&self, address: impl Into<String>, role: NodeRole) -> u64 {
        let address = address.into();
        let mut state = self.write();
        if let Some(node) = state.nodes.iter().find(|n| n.address == address) {
            return node.id;
        }
        state.next_id += 1;
        let id = state.next_id;
        state.nodes.push(NodeInfo { id, address, role });
        id
    }

    pub fn set_role(&self, id: u64, role: NodeRole) -> Result<()> {
        let mut state = self.write();
        let node = state
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| Error::Storage(format!("node {} does not belong to the cluster", id)))?;
        node.role = role;
        Ok(())
    }

    pub fn set_leader(&self, id: Option<u64>) {
        self.write().leader = id;
    }

    pub fn leader_id(&self) -> Option<u64> {
        self.read().leader
    }

    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.read().nodes.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.read().nodes.is_empty()
    }

    pub fn remove_node(&self, id: u64) -> Result<()> {
        let mut state = self.write();
        let before = state.nodes.len();
        state.nodes.retain(|n| n.id != id);
        if state.nodes.len() == before {
            return Err(Error::Storage(format!(
                "node {} does not belong to the cluster",
                id
            )));
        }
        if state.leader == Some(id) {
            state.leader = None;
        }
        Ok(())
    }

    /// Promote members in id order until `voters` voters and `standbys`
    /// stand-bys are reached. Surplus voters are never demoted.
    pub fn adjust_roles(&self, voters: usize, standbys: usize) {
        let mut state = self.write();
        let mut voter_count = state
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::Voter)
            .count();
        let mut standby_count = state
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::StandBy)
            .count();

        for node in state.nodes.iter_mut() {
            if voter_count < voters && node.role != NodeRole::Voter {
                if node.role == NodeRole::StandBy {
                    standby_count -= 1;
                }
                node.role = NodeRole::Voter;
                voter_count += 1;
            } else if standby_count < standbys && node.role == NodeRole::Spare {
                node.role = NodeRole::StandBy;
                standby_count += 1;
            }
        }
    }

    /// Hand leadership to another voter, if there is one.
    pub fn transfer_leadership(&self, from: u64) -> Option<u64> {
        let mut state = self.write();
        if state.leader != Some(from) {
            return state.leader;
        }
        let next = state
            .nodes
            .iter()
            .find(|n| n.id != from && n.role == NodeRole::Voter)
            .map(|n| n.id);
        if next.is_some() {
            state.leader = next;
        }
        state.leader
    }
}

#[async_trait]
impl LeaderClient for MemCluster {
    async fn leader(&self) -> Result<Option<NodeInfo>> {
        let state = self.read();
        Ok(state
            .leader
            .and_then(|id| state.nodes.iter().find(|n| n.id == id).cloned()))
    }

    async fn cluster(&self) -> Result<Vec<NodeInfo>> {
        Ok(self.nodes())
    }

    async fn remove(&self, id: u64) -> Result<()> {
        self.remove_node(id)
    }
}

#[async_trait]
impl ClusterHandle for MemCluster {
    async fn leader_client(&self) -> Result<Box<dyn LeaderClient>> {
        if self.is_empty() {
            return Err(Error::Storage("no available leader server found".into()));
        }
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(NodeRole::Voter.to_string(), "voter");
        assert_eq!(NodeRole::StandBy.to_string(), "stand-by");
        assert_eq!(NodeRole::Spare.to_string(), "spare");
    }

    #[test]
    fn test_adjust_roles() {
        let cluster = MemCluster::new();
        let ids: Vec<u64> = (1..=5)
            .map(|i| cluster.add(format!("10.0.0.{}:8081", i), NodeRole::Spare))
            .collect();

        cluster.adjust_roles(3, 1);
        let roles: Vec<NodeRole> = cluster.nodes().iter().map(|n| n.role).collect();
        assert_eq!(
            roles,
            vec![
                NodeRole::Voter,
                NodeRole::Voter,
                NodeRole::Voter,
                NodeRole::StandBy,
                NodeRole::Spare
            ]
        );

        cluster.remove_node(ids[0]).unwrap();
        cluster.adjust_roles(3, 1);
        let voters = cluster
            .nodes()
            .iter()
            .filter(|n| n.role == NodeRole::Voter)
            .count();
        assert_eq!(voters, 3);
    }

    #[test]
    fn test_add_is_idempotent_per_address() {
        let cluster = MemCluster::new();
        let a = cluster.add("10.0.0.1:8081", NodeRole::Voter);
        let b = cluster.add("10.0.0.1:8081", NodeRole::Spare);
        assert_eq!(a, b);
        assert_eq!(cluster.nodes().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_leader_clears_leader() {
        let cluster = MemCluster::new();
        let id = cluster.add("10.0.0.1:8081", NodeRole::Voter);
        cluster.set_leader(Some(id));

        let client = cluster.leader_client().await.unwrap();
        assert_eq!(client.leader().await.unwrap().map(|n| n.id), Some(id));
        client.remove(id).await.unwrap();
        assert!(cluster.leader_id().is_none());
        assert!(client.remove(id).await.is_err());
    }

    #[test]
    fn test_transfer_leadership() {
        let cluster = MemCluster::new();
        let a = cluster.add("10.0.0.1:8081", NodeRole::Voter);
        let b = cluster.add("10.0.0.2:8081", NodeRole::Spare);
        cluster.set_leader(Some(a));

        assert_eq!(cluster.transfer_leadership(a), Some(a));
        cluster.set_role(b, NodeRole::Voter).unwrap();
        assert_eq!(cluster.transfer_leadership(a), Some(b));
    }
}
