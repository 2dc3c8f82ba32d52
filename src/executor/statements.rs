//! Request to statement translation
//!
//! Builds the SQL for each client operation. Database, table and column
//! names are validated and quoted; `values`, `set` and `where` fragments are
//! raw SQL supplied by the client and are passed through as-is.

use serde::{Deserialize, Serialize};

use crate::executor::{SqlValue, Statement};
use crate::error::{Error, Result};

/// Column prepended to tables created from a column list
pub const ID_COLUMN: &str = "Id INT AUTO_INCREMENT PRIMARY KEY";

const MAX_TEXT_VALUE_LEN: usize = 255;

/// Column definition for table creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "DataType", alias = "dataType")]
    pub data_type: String,
}

/// Table definition: a raw schema string or a list of columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSpec {
    Schema(String),
    Columns(Vec<Column>),
}

/// Check that `name` is a plain SQL identifier
pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidRequest(format!("{} is required", what)));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return Err(Error::InvalidRequest(format!("invalid {}: {}", what, name)));
    }
    Ok(())
}

fn qualified(database: &str, table: &str) -> Result<String> {
    validate_identifier("database name", database)?;
    validate_identifier("table name", table)?;
    Ok(format!("`{}`.`{}`", database, table))
}

fn require(what: &str, fragment: &str) -> Result<()> {
    if fragment.trim().is_empty() {
        return Err(Error::InvalidRequest(format!("{} is required", what)));
    }
    Ok(())
}

pub fn create_database(name: &str) -> Result<Statement> {
    validate_identifier("database name", name)?;
    Ok(Statement::raw(format!("CREATE DATABASE IF NOT EXISTS `{}`", name)))
}

pub fn drop_database(name: &str) -> Result<Statement> {
    validate_identifier("database name", name)?;
    Ok(Statement::raw(format!("DROP DATABASE IF EXISTS `{}`", name)))
}

/// Build a CREATE TABLE statement.
///
/// Also returns the column schema, which is what replicas receive.
pub fn create_table(database: &str, table: &str, spec: &TableSpec) -> Result<(Statement, String)> {
    let target = qualified(database, table)?;

    let schema = match spec {
        TableSpec::Schema(schema) => {
            require("schema", schema)?;
            schema.clone()
        }
        TableSpec::Columns(columns) => {
            if columns.is_empty() {
                return Err(Error::InvalidRequest(
                    "Either columns in request body or schema parameter is required".into(),
                ));
            }
            let mut defs = Vec::with_capacity(columns.len() + 1);
            defs.push(ID_COLUMN.to_string());
            for column in columns {
                validate_identifier("column name", &column.name)?;
                require("column data type", &column.data_type)?;
                if column.data_type.contains(';') {
                    return Err(Error::InvalidRequest(format!(
                        "invalid data type for {}",
                        column.name
                    )));
                }
                defs.push(format!("`{}` {}", column.name, column.data_type));
            }
            defs.join(", ")
        }
    };

    let sql = format!("CREATE TABLE IF NOT EXISTS {} ({})", target, schema);
    Ok((Statement::raw(sql), schema))
}

/// INSERT with a raw VALUES list
pub fn insert_values(database: &str, table: &str, values: &str) -> Result<Statement> {
    let target = qualified(database, table)?;
    require("values", values)?;
    Ok(Statement::raw(format!("INSERT INTO {} VALUES ({})", target, values)))
}

/// Check one record value.
///
/// Text may only hold letters, digits, whitespace and hyphens; numbers must
/// be positive.
pub fn validate_record_value(column: &str, value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => {
            let valid = s.chars().count() <= MAX_TEXT_VALUE_LEN
                && s.chars().all(|c| {
                    c.is_ascii_alphanumeric() || c.is_ascii_whitespace() || c == '-'
                });
            if !valid {
                return Err(Error::InvalidRequest(format!(
                    "Invalid value for {}. Must be valid characters \
                     (letters, numbers, spaces, or hyphens).",
                    column
                )));
            }
        }
        serde_json::Value::Number(n) => {
            if n.as_f64().map_or(true, |f| f <= 0.0) {
                return Err(Error::InvalidRequest(format!(
                    "Invalid value for {}. Must be a positive number.",
                    column
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Parameterised INSERT from a column → value map
pub fn insert_records(
    database: &str,
    table: &str,
    records: &serde_json::Map<String, serde_json::Value>,
) -> Result<Statement> {
    let target = qualified(database, table)?;
    if records.is_empty() {
        return Err(Error::InvalidRequest("Either 'values' or 'records' is required".into()));
    }

    let mut columns = Vec::with_capacity(records.len());
    let mut params = Vec::with_capacity(records.len());
    for (column, value) in records {
        validate_identifier("column name", column)?;
        validate_record_value(column, value)?;
        columns.push(format!("`{}`", column));
        params.push(SqlValue::from_json(value));
    }

    let placeholders = vec!["?"; params.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        target,
        columns.join(", "),
        placeholders
    );
    Ok(Statement::with_params(sql, params))
}

pub fn select_all(database: &str, table: &str) -> Result<Statement> {
    let target = qualified(database, table)?;
    Ok(Statement::raw(format!("SELECT * FROM {}", target)))
}

pub fn update(database: &str, table: &str, set: &str, predicate: &str) -> Result<Statement> {
    let target = qualified(database, table)?;
    require("set", set)?;
    require("where", predicate)?;
    Ok(Statement::raw(format!("UPDATE {} SET {} WHERE {}", target, set, predicate)))
}

pub fn delete(database: &str, table: &str, predicate: &str) -> Result<Statement> {
    let target = qualified(database, table)?;
    require("where", predicate)?;
    Ok(Statement::raw(format!("DELETE FROM {} WHERE {}", target, predicate)))
}
