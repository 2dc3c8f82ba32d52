//! ddbsync - Single-writer MariaDB replication coordinator
//!
//! One node of a small cluster of database nodes. Exactly one node, the
//! writer, accepts mutating operations; it applies them locally and then
//! pushes them asynchronously to every replica. Replicas watch the writer
//! and, when it stops answering, one pre-designated replica promotes
//! itself.
//!
//! # Components
//!
//! - Cluster roster: who is the writer, who are the replicas
//! - Replication transport and dispatcher: best-effort fan-out with retries
//! - Liveness monitor: periodic writer probe
//! - Failover coordinator: guarded, deterministic self-promotion
//! - HTTP API for client operations, replica replay and cluster status

pub mod config;
pub mod error;
pub mod state;
pub mod replication;
pub mod executor;
pub mod api;
pub mod node;

pub use config::DdbConfig;
pub use error::{Error, Result};
pub use node::Node;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::DdbConfig;
    pub use crate::error::{Error, Result};
    pub use crate::state::{ClusterRoster, FailoverCoordinator, LivenessMonitor, NodeRole};
    pub use crate::replication::{ReplicationDispatcher, ReplicationPayload, OperationKind};
    pub use crate::executor::StorageEngine;
    pub use crate::node::Node;
}
