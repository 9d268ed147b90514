//! # txgate
//!
//! HTTP front end for a replicated SQL store, driven by an external
//! consistency checker. Each node serves:
//! - Append batches on a shared `map (key INT, value INT)` relation
//! - A bank workload (accounts, transfers) and a set workload
//! - Membership queries and removal, and a readiness gate
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!   checker ──HTTP──▶ ┌──────────────┐
//!                     │  facade::http │  one per node
//!                     └──────┬───────┘
//!              ┌─────────────┼──────────────┐
//!              ▼             ▼              ▼
//!        executor/ledger  membership    resolver
//!              │             │
//!              ▼             ▼
//!         Database     ClusterHandle   (replication engine)
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! The bundled engine runs in-process, so `txgate-node` serves a
//! single-node cluster. Multi-node clusters are built in one process from
//! [`facade::LocalNode::with_engine`] over a shared engine.
//! ```bash
//! txgate-node --node n1 --dir ./n1-data --latency 5
//! ```
//!
//! ### Use the CLI
//! ```bash
//! txgate --url http://n1:8080 append '[[:append 1 10][:r 1 nil]]'
//! txgate --url http://n1:8080 bank-init --accounts 1,2,3 --total 300
//! txgate --url http://n1:8080 members
//! txgate --url http://n1:8080 wait-ready
//! ```

pub mod common;
pub mod facade;
pub mod ops;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use facade::Server;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
