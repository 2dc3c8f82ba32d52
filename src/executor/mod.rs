//! Database Executor Module
//!
//! The storage engine boundary: executable statements, the
//! [`StorageEngine`] trait and its MariaDB implementation.

mod mariadb;
pub mod statements;

pub use mariadb::MariaDbExecutor;
pub use statements::{Column, TableSpec};

use serde::{Deserialize, Serialize};

/// One result row, column name to value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Bound statement parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
}

impl SqlValue {
    /// Convert a JSON scalar; arrays and objects are bound as JSON text
    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    SqlValue::UInt(u)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::Float(f)
                } else {
                    SqlValue::Null
                }
            }
            serde_json::Value::String(s) => SqlValue::String(s.clone()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                SqlValue::String(v.to_string())
            }
        }
    }
}

/// SQL text plus positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// Statement without parameters
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Statement with positional `?` parameters
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Local storage engine
#[async_trait::async_trait]
pub trait StorageEngine: Send + Sync {
    /// Execute a statement, returning the number of affected rows
    async fn execute(&self, statement: &Statement) -> crate::Result<u64>;

    /// Run a query, returning all rows
    async fn query(&self, statement: &Statement) -> crate::Result<Vec<Row>>;

    /// Check the engine is reachable
    async fn health_check(&self) -> crate::Result<bool>;

    /// Release connections on shutdown
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_to_sql_value() {
        assert_eq!(SqlValue::from_json(&serde_json::json!(null)), SqlValue::Null);
        assert_eq!(SqlValue::from_json(&serde_json::json!(true)), SqlValue::Bool(true));
        assert_eq!(SqlValue::from_json(&serde_json::json!(42)), SqlValue::Int(42));
        assert_eq!(SqlValue::from_json(&serde_json::json!(1.5)), SqlValue::Float(1.5));
        assert_eq!(
            SqlValue::from_json(&serde_json::json!("alice")),
            SqlValue::String("alice".into())
        );
        assert_eq!(
            SqlValue::from_json(&serde_json::json!([1, 2])),
            SqlValue::String("[1,2]".into())
        );
    }
}
