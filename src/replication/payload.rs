//! Replicated operation payloads
//!
//! A payload is the replayable form of a locally applied mutation: the
//! replica endpoint it targets plus either query parameters (GET replay,
//! used for schema changes) or a serialized JSON body (POST replay).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of client operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CreateDatabase,
    DropDatabase,
    CreateTable,
    Insert,
    Select,
    Update,
    Delete,
}

impl OperationKind {
    /// Every kind that changes state and is therefore replicated
    pub const MUTATING: [OperationKind; 6] = [
        OperationKind::CreateDatabase,
        OperationKind::DropDatabase,
        OperationKind::CreateTable,
        OperationKind::Insert,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    /// Whether this operation is propagated to replicas
    pub fn is_mutating(&self) -> bool {
        !matches!(self, OperationKind::Select)
    }

    /// Replica endpoint that replays this operation
    pub fn replication_path(&self) -> Option<&'static str> {
        match self {
            OperationKind::CreateDatabase => Some("/replicate/db"),
            OperationKind::DropDatabase => Some("/replicate/dropdb"),
            OperationKind::CreateTable => Some("/replicate/table"),
            OperationKind::Insert => Some("/replicate/insert"),
            OperationKind::Update => Some("/replicate/update"),
            OperationKind::Delete => Some("/replicate/delete"),
            OperationKind::Select => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::CreateDatabase => write!(f, "create-database"),
            OperationKind::DropDatabase => write!(f, "drop-database"),
            OperationKind::CreateTable => write!(f, "create-table"),
            OperationKind::Insert => write!(f, "insert"),
            OperationKind::Select => write!(f, "select"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// How a payload is delivered
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationMethod {
    /// GET with query parameters
    Get { query: Vec<(String, String)> },
    /// POST with a JSON body, serialized once and shared by every task
    Post { body: Bytes },
}

/// Replayable form of one operation
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationPayload {
    kind: OperationKind,
    method: ReplicationMethod,
}

impl ReplicationPayload {
    /// GET-style payload
    pub fn get(kind: OperationKind, query: Vec<(String, String)>) -> Self {
        Self {
            kind,
            method: ReplicationMethod::Get { query },
        }
    }

    /// POST-style payload with `body` serialized as JSON
    pub fn post_json<T: Serialize>(kind: OperationKind, body: &T) -> Result<Self> {
        let body = serde_json::to_vec(body)?;
        Ok(Self {
            kind,
            method: ReplicationMethod::Post { body: Bytes::from(body) },
        })
    }

    /// Operation kind
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Delivery method
    pub fn method(&self) -> &ReplicationMethod {
        &self.method
    }

    /// Replica endpoint path
    pub fn path(&self) -> Result<&'static str> {
        self.kind.replication_path().ok_or_else(|| {
            Error::Replication(format!("{} operations are not replicated", self.kind))
        })
    }

    /// Full URL of the replica endpoint on `target`
    pub fn url(&self, target: &str) -> Result<String> {
        Ok(format!("{}{}", target.trim_end_matches('/'), self.path()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutating_kinds_have_endpoints() {
        for kind in OperationKind::MUTATING {
            assert!(kind.is_mutating());
            assert!(kind.replication_path().is_some());
        }
        assert!(!OperationKind::Select.is_mutating());
        assert!(OperationKind::Select.replication_path().is_none());
    }

    #[test]
    fn test_post_payload_serialized_once() {
        let payload = ReplicationPayload::post_json(
            OperationKind::Delete,
            &serde_json::json!({"dbname": "shop", "table": "orders", "where": "id = 3"}),
        )
        .unwrap();

        match payload.method() {
            ReplicationMethod::Post { body } => {
                let decoded: serde_json::Value = serde_json::from_slice(body).unwrap();
                assert_eq!(decoded["where"], "id = 3");
            }
            other => panic!("unexpected method {:?}", other),
        }
        assert_eq!(
            payload.url("http://r1:8002/").unwrap(),
            "http://r1:8002/replicate/delete"
        );
    }

    #[test]
    fn test_select_payload_has_no_endpoint() {
        let payload = ReplicationPayload::get(OperationKind::Select, vec![]);
        assert!(matches!(payload.path(), Err(Error::Replication(_))));
    }
}
