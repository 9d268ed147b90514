//! HTTP façade over the replicated store
//!
//! Test workloads (append batches, bank, set) and membership control,
//! served by one node per cluster member.

pub mod commands;
pub mod edn;
pub mod executor;
pub mod http;
pub mod ledger;
pub mod membership;
pub mod node;
pub mod resolver;
pub mod server;

pub use http::{create_router, AppState};
pub use membership::Membership;
pub use node::{LocalNode, Node, NodeOptions};
pub use server::Server;
