//! Writer Failover
//!
//! Reacts to a writer suspicion by running a single-round election:
//! enter through the roster's election guard, wait out a settle window,
//! then ask an [`ElectionPolicy`] whether this node should promote itself.
//!
//! The default policy is deliberately naive. It does not talk to other
//! nodes, does not count healthy replicas and cannot break a tie between two
//! nodes configured with the same identity. A node that does not match simply
//! resolves without a writer until the matching node runs its own check.

use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::state::{ClusterRoster, RosterSnapshot};
use crate::error::Result;

/// Decides whether a node should promote itself to writer
pub trait ElectionPolicy: Send + Sync {
    /// Evaluate the election from this node's point of view
    fn evaluate(&self, self_identity: &str, cluster: &RosterSnapshot) -> bool;
}

/// Promote iff this node's identity equals the well-known primary identity
#[derive(Debug, Clone)]
pub struct PrimaryIdentityPolicy {
    primary_identity: String,
}

impl PrimaryIdentityPolicy {
    pub fn new(primary_identity: impl Into<String>) -> Self {
        Self {
            primary_identity: primary_identity.into(),
        }
    }
}

impl ElectionPolicy for PrimaryIdentityPolicy {
    fn evaluate(&self, self_identity: &str, _cluster: &RosterSnapshot) -> bool {
        self_identity == self.primary_identity
    }
}

/// Election state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    /// Writer presumed alive
    Healthy,
    /// Inside the settle window
    ElectionInProgress,
    /// Last election promoted this node
    PromotedSelf,
    /// Last election resolved without promoting this node
    DeferredToOther,
}

/// Result of handling one suspicion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// Another election was already running; nothing was done
    AlreadyInProgress,
    /// This node is now the writer
    PromotedSelf,
    /// No promotion; the cluster may be without a writer
    DeferredToOther,
}

/// Failover coordinator runs the election state machine
pub struct FailoverCoordinator {
    /// This node's identity
    node_id: String,
    /// Cluster roster
    roster: Arc<ClusterRoster>,
    /// Promotion rule
    policy: Arc<dyn ElectionPolicy>,
    /// Settle window before evaluating
    settle: Duration,
    /// Last observed state
    state: RwLock<ElectionState>,
}

impl FailoverCoordinator {
    /// Create a new failover coordinator
    pub fn new(
        node_id: String,
        roster: Arc<ClusterRoster>,
        policy: Arc<dyn ElectionPolicy>,
        settle: Duration,
    ) -> Self {
        Self {
            node_id,
            roster,
            policy,
            settle,
            state: RwLock::new(ElectionState::Healthy),
        }
    }

    /// Current election state
    pub async fn state(&self) -> ElectionState {
        *self.state.read().await
    }

    /// Handle a writer suspicion
    pub async fn on_suspicion(&self) -> Result<ElectionOutcome> {
        if !self.roster.try_begin_election() {
            tracing::debug!("Election already in progress, ignoring suspicion");
            return Ok(ElectionOutcome::AlreadyInProgress);
        }

        *self.state.write().await = ElectionState::ElectionInProgress;
        tracing::info!("Starting writer election (node: {})", self.node_id);

        tokio::time::sleep(self.settle).await;

        let view = self.roster.snapshot().await;
        if self.policy.evaluate(&self.node_id, &view) {
            if let Err(e) = self.roster.promote_self(self.roster.self_address()).await {
                self.roster.end_election();
                *self.state.write().await = ElectionState::DeferredToOther;
                return Err(e);
            }
            *self.state.write().await = ElectionState::PromotedSelf;
            Ok(ElectionOutcome::PromotedSelf)
        } else {
            self.roster.end_election();
            *self.state.write().await = ElectionState::DeferredToOther;
            tracing::warn!(
                "Election resolved without promotion; node {} is not the primary identity",
                self.node_id
            );
            Ok(ElectionOutcome::DeferredToOther)
        }
    }
}
