//! Cluster Roster
//!
//! The only shared mutable cluster state in the process: who the writer is,
//! whether this node is it, and whether an election is running. Everything
//! goes through the methods below; the fields are never exposed.

use std::sync::atomic::{AtomicBool, Ordering};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Accepts and applies mutating operations
    Writer,
    /// Receives replayed operations from the writer
    Replica,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Writer => write!(f, "WRITER"),
            NodeRole::Replica => write!(f, "REPLICA"),
        }
    }
}

/// Writer address and self-writer flag, always read and written together
#[derive(Debug, Clone, PartialEq, Eq)]
struct WriterView {
    writer_address: String,
    self_is_writer: bool,
}

/// Point-in-time copy of the roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub self_address: String,
    pub writer_address: String,
    pub replicas: Vec<String>,
    pub self_is_writer: bool,
    pub election_in_progress: bool,
}

impl RosterSnapshot {
    /// This node's current role
    pub fn role(&self) -> NodeRole {
        if self.self_is_writer {
            NodeRole::Writer
        } else {
            NodeRole::Replica
        }
    }
}

/// Process-wide cluster roster
pub struct ClusterRoster {
    /// This node's advertised address
    self_address: String,
    /// Fixed replica membership, in configuration order
    replicas: Vec<String>,
    /// Writer address + self flag
    writer: RwLock<WriterView>,
    /// Election guard, entered only through compare-and-set
    election_in_progress: AtomicBool,
}

impl ClusterRoster {
    /// Create a roster from static configuration.
    ///
    /// This node is the writer iff `writer_address` is its own address.
    pub fn new(self_address: String, writer_address: String, replicas: Vec<String>) -> Self {
        let self_is_writer = writer_address == self_address;
        Self {
            self_address,
            replicas,
            writer: RwLock::new(WriterView {
                writer_address,
                self_is_writer,
            }),
            election_in_progress: AtomicBool::new(false),
        }
    }

    /// This node's advertised address
    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    /// Whether this node currently believes it is the writer
    pub async fn is_writer(&self) -> bool {
        self.writer.read().await.self_is_writer
    }

    /// Current writer address
    pub async fn writer_address(&self) -> String {
        self.writer.read().await.writer_address.clone()
    }

    /// Writer address and self flag from a single read
    pub async fn writer_view(&self) -> (String, bool) {
        let view = self.writer.read().await;
        (view.writer_address.clone(), view.self_is_writer)
    }

    /// Replica addresses in configuration order, excluding this node
    pub fn replica_addresses(&self) -> Vec<String> {
        self.replicas
            .iter()
            .filter(|addr| **addr != self.self_address)
            .cloned()
            .collect()
    }

    /// Whether an election is currently running
    pub fn election_in_progress(&self) -> bool {
        self.election_in_progress.load(Ordering::Acquire)
    }

    /// Enter an election. Returns false if one is already running.
    pub fn try_begin_election(&self) -> bool {
        self.election_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Leave an election without changing the writer
    pub fn end_election(&self) {
        self.election_in_progress.store(false, Ordering::Release);
    }

    /// Make this node the writer at `new_writer_address` and close the election.
    ///
    /// The address must denote this node; anything else would leave
    /// `self_is_writer` pointing at a foreign writer address.
    pub async fn promote_self(&self, new_writer_address: &str) -> Result<()> {
        if new_writer_address != self.self_address {
            return Err(Error::State(format!(
                "cannot promote self as {}: this node is {}",
                new_writer_address, self.self_address
            )));
        }

        {
            let mut view = self.writer.write().await;
            view.writer_address = new_writer_address.to_string();
            view.self_is_writer = true;
        }
        self.end_election();

        tracing::info!("This node has been promoted to writer ({})", new_writer_address);
        Ok(())
    }

    /// Point-in-time copy for status reporting and election policies
    pub async fn snapshot(&self) -> RosterSnapshot {
        let (writer_address, self_is_writer) = self.writer_view().await;
        RosterSnapshot {
            self_address: self.self_address.clone(),
            writer_address,
            replicas: self.replica_addresses(),
            self_is_writer,
            election_in_progress: self.election_in_progress(),
        }
    }
}
