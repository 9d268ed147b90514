//! Common utilities and types shared across txgate

pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod tracing_middleware;
pub mod utils;

pub use cluster::{ClusterHandle, LeaderClient, MemCluster, NodeInfo, NodeRole};
pub use config::{BankConfig, Config, ResolverConfig, ResolverKind};
pub use error::{Error, Result};
pub use metrics::METRICS;
pub use storage::{complete_tx, Database, Entry, MemStore, Query, Statement, Transaction, Value};
pub use utils::{host_part, make_address, other_addresses, parse_duration, preceding_addresses};
