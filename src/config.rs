//! ddbsync Configuration
//!
//! Static configuration read once at startup. Cluster membership is fixed:
//! there is no join/leave protocol, so the writer address and replica list
//! given here are the whole cluster.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Main ddbsync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdbConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Database connection configuration
    pub database: DatabaseConfig,

    /// Cluster configuration
    pub cluster: ClusterConfig,

    /// Replication retry configuration
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identity, compared against `cluster.primary_identity` during elections
    pub id: String,

    /// Base URL other nodes use to reach this node (e.g. `http://10.0.0.2:8001`)
    pub address: String,
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// MariaDB host
    pub host: String,

    /// MariaDB port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Base URL of the initial writer
    pub writer: String,

    /// Replica base URLs, in fan-out order
    #[serde(default)]
    pub replicas: Vec<String>,

    /// Identity that is allowed to promote itself when the writer is lost
    pub primary_identity: String,

    /// Writer probe interval in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Writer probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Settle window between entering an election and evaluating it
    #[serde(default = "default_election_settle_ms")]
    pub election_settle_ms: u64,

    /// Run the liveness monitor and failover coordinator
    #[serde(default = "default_true")]
    pub auto_failover: bool,
}

/// Replication retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Delivery attempts per replica before a task is exhausted
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles after every failed attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-delivery timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable permissive CORS headers
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_db_port() -> u16 {
    3306
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_probe_interval_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_election_settle_ms() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8001".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_address(),
            cors_enabled: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl DatabaseConfig {
    /// Server-level connection URL; no default database is selected
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}",
            self.user, self.password, self.host, self.port
        )
    }
}

impl ReplicationConfig {
    /// Get the first retry delay as Duration
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Get the per-delivery timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl DdbConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: DdbConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.address.is_empty() {
            return Err(crate::Error::Config("node.address cannot be empty".into()));
        }

        if self.cluster.writer.is_empty() {
            return Err(crate::Error::Config("cluster.writer cannot be empty".into()));
        }

        if self.cluster.primary_identity.is_empty() {
            return Err(crate::Error::Config(
                "cluster.primary_identity cannot be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for replica in &self.cluster.replicas {
            if !seen.insert(replica.as_str()) {
                return Err(crate::Error::Config(format!(
                    "cluster.replicas lists {} more than once",
                    replica
                )));
            }
        }

        if self.cluster.probe_interval_ms == 0 {
            return Err(crate::Error::Config(
                "cluster.probe_interval_ms must be greater than 0".into(),
            ));
        }

        if self.cluster.probe_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "cluster.probe_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.replication.max_attempts == 0 {
            return Err(crate::Error::Config(
                "replication.max_attempts must be at least 1".into(),
            ));
        }

        if self.database.host.is_empty() {
            return Err(crate::Error::Config("database.host cannot be empty".into()));
        }

        Ok(())
    }

    /// Whether this node starts out as the writer
    pub fn starts_as_writer(&self) -> bool {
        self.cluster.writer == self.node.address
    }

    /// Get probe interval as Duration
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.probe_interval_ms)
    }

    /// Get probe timeout as Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.probe_timeout_ms)
    }

    /// Get election settle window as Duration
    pub fn election_settle(&self) -> Duration {
        Duration::from_millis(self.cluster.election_settle_ms)
    }

    /// Get server-level database connection URL
    pub fn database_url(&self) -> String {
        self.database.url()
    }

    /// Sample configuration written by `ddbsync init`
    pub fn sample(node_id: &str) -> String {
        format!(
            r#"[node]
id = "{node_id}"
address = "http://127.0.0.1:8001"

[database]
host = "127.0.0.1"
port = 3306
user = "root"
password = "root"

[cluster]
writer = "http://127.0.0.1:8001"
replicas = ["http://127.0.0.1:8002", "http://127.0.0.1:8003"]
primary_identity = "{node_id}"
probe_interval_ms = 10000
probe_timeout_ms = 5000
election_settle_ms = 2000

[replication]
max_attempts = 3
base_delay_ms = 2000
request_timeout_ms = 5000

[api]
bind_address = "0.0.0.0:8001"
cors_enabled = true

[logging]
level = "info"
format = "pretty"
"#
        )
    }
}
