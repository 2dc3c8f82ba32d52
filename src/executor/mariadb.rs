//! MariaDB Executor
//!
//! Runs statements against a server-level MariaDB pool. Statements are
//! always database-qualified, so no default database is selected.

use std::time::Duration;
use sqlx::mysql::{MySqlArguments, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column as _, MySql, MySqlPool, Row as _, TypeInfo, ValueRef};

use crate::config::DatabaseConfig;
use crate::executor::{Row, SqlValue, Statement, StorageEngine};
use crate::error::{Error, Result};

/// MariaDB storage engine
pub struct MariaDbExecutor {
    pool: MySqlPool,
}

impl MariaDbExecutor {
    /// Connect a pool using `config`
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url())
            .await?;

        tracing::info!("Connected to MariaDB at {}:{}", config.host, config.port);
        Ok(Self { pool })
    }
}

fn bind_params<'q>(statement: &'q Statement) -> Query<'q, MySql, MySqlArguments> {
    statement
        .params
        .iter()
        .fold(sqlx::query(&statement.sql), |query, param| match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::UInt(u) => query.bind(*u),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::String(s) => query.bind(s.as_str()),
        })
}

fn preview(sql: &str) -> &str {
    let mut end = sql.len().min(50);
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// Decode one column into JSON by its reported type
fn column_to_json(row: &MySqlRow, index: usize) -> Result<serde_json::Value> {
    use serde_json::Value;

    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOLEAN" => Value::from(row.try_get::<bool, _>(index)?),
        name if name.ends_with("UNSIGNED") => Value::from(row.try_get_unchecked::<u64, _>(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            Value::from(row.try_get_unchecked::<i64, _>(index)?)
        }
        "FLOAT" => Value::from(row.try_get::<f32, _>(index)? as f64),
        "DOUBLE" => Value::from(row.try_get::<f64, _>(index)?),
        "DATE" => Value::from(row.try_get::<chrono::NaiveDate, _>(index)?.to_string()),
        "TIME" => Value::from(row.try_get::<chrono::NaiveTime, _>(index)?.to_string()),
        "DATETIME" => Value::from(row.try_get::<chrono::NaiveDateTime, _>(index)?.to_string()),
        "TIMESTAMP" => Value::from(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)?.to_rfc3339(),
        ),
        // Text, DECIMAL, JSON, ENUM and binary types: render bytes as text
        _ => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            Value::from(String::from_utf8_lossy(&bytes).into_owned())
        }
    };
    Ok(value)
}

fn row_to_json(row: &MySqlRow) -> Result<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        out.insert(column.name().to_string(), column_to_json(row, column.ordinal())?);
    }
    Ok(out)
}

#[async_trait::async_trait]
impl StorageEngine for MariaDbExecutor {
    async fn execute(&self, statement: &Statement) -> Result<u64> {
        tracing::debug!("Executing: {}", preview(&statement.sql));

        let result = bind_params(statement)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::QueryExecution(format!(
                    "Failed to execute '{}...': {}",
                    preview(&statement.sql),
                    e
                ))
            })?;

        Ok(result.rows_affected())
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        tracing::debug!("Querying: {}", preview(&statement.sql));

        let rows = bind_params(statement)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::QueryExecution(format!(
                    "Failed to query '{}...': {}",
                    preview(&statement.sql),
                    e
                ))
            })?;

        rows.iter().map(row_to_json).collect()
    }

    async fn health_check(&self) -> Result<bool> {
        let result: (i32,) = sqlx::query_as("SELECT 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0 == 1)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("MariaDB connection pool closed");
    }
}
