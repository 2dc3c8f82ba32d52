//! State Management Module
//!
//! Cluster roster, writer liveness monitoring and failover.

mod roster;
mod liveness;
pub mod election;

pub use roster::{ClusterRoster, NodeRole, RosterSnapshot};
pub use liveness::{LivenessMonitor, ProbeOutcome};
pub use election::{
    ElectionOutcome, ElectionPolicy, ElectionState, FailoverCoordinator, PrimaryIdentityPolicy,
};
