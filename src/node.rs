//! Node wiring
//!
//! Builds the roster, transport, dispatcher, failover coordinator, liveness
//! monitor and HTTP server from one configuration, and runs them together.

use std::future::Future;
use std::sync::Arc;
use axum::Router;
use tokio::task::JoinHandle;

use crate::api::{AppState, HttpServer};
use crate::config::DdbConfig;
use crate::executor::{MariaDbExecutor, StorageEngine};
use crate::replication::{HttpTransport, Prober, ReplicationDispatcher, RetryPolicy, Transport};
use crate::state::{ClusterRoster, FailoverCoordinator, LivenessMonitor, PrimaryIdentityPolicy};
use crate::error::Result;

/// A running cluster member
pub struct Node {
    config: DdbConfig,
    roster: Arc<ClusterRoster>,
    dispatcher: Arc<ReplicationDispatcher>,
    coordinator: Arc<FailoverCoordinator>,
    monitor: Arc<LivenessMonitor>,
    storage: Arc<dyn StorageEngine>,
    server: HttpServer,
}

impl Node {
    /// Assemble a node from its parts
    pub fn new(
        config: DdbConfig,
        storage: Arc<dyn StorageEngine>,
        transport: Arc<dyn Transport>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        let roster = Arc::new(ClusterRoster::new(
            config.node.address.clone(),
            config.cluster.writer.clone(),
            config.cluster.replicas.clone(),
        ));

        let dispatcher = Arc::new(ReplicationDispatcher::new(
            Arc::clone(&roster),
            transport,
            RetryPolicy::from(&config.replication),
        ));

        let coordinator = Arc::new(FailoverCoordinator::new(
            config.node.id.clone(),
            Arc::clone(&roster),
            Arc::new(PrimaryIdentityPolicy::new(config.cluster.primary_identity.clone())),
            config.election_settle(),
        ));

        let monitor = Arc::new(LivenessMonitor::new(
            Arc::clone(&roster),
            prober,
            Arc::clone(&coordinator),
            config.probe_interval(),
        ));

        let server = HttpServer::new(
            config.api.clone(),
            AppState {
                node_id: config.node.id.clone(),
                roster: Arc::clone(&roster),
                dispatcher: Arc::clone(&dispatcher),
                storage: Arc::clone(&storage),
                coordinator: config.cluster.auto_failover.then(|| Arc::clone(&coordinator)),
                started_at: chrono::Utc::now(),
            },
        );

        Self {
            config,
            roster,
            dispatcher,
            coordinator,
            monitor,
            storage,
            server,
        }
    }

    /// Connect to MariaDB and build a node with the HTTP transport
    pub async fn connect(config: DdbConfig) -> Result<Self> {
        let storage = Arc::new(MariaDbExecutor::new(&config.database).await?);
        let transport = Arc::new(HttpTransport::new(
            config.replication.request_timeout(),
            config.probe_timeout(),
        )?);

        Ok(Self::new(
            config,
            storage,
            Arc::clone(&transport) as Arc<dyn Transport>,
            transport,
        ))
    }

    /// Node configuration
    pub fn config(&self) -> &DdbConfig {
        &self.config
    }

    /// Cluster roster
    pub fn roster(&self) -> Arc<ClusterRoster> {
        Arc::clone(&self.roster)
    }

    /// Replication dispatcher
    pub fn dispatcher(&self) -> Arc<ReplicationDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Failover coordinator
    pub fn coordinator(&self) -> Arc<FailoverCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// HTTP router
    pub fn router(&self) -> Router {
        self.server.router()
    }

    /// Spawn the liveness monitor, unless automatic failover is off
    pub fn start_monitor(&self) -> Option<JoinHandle<()>> {
        if !self.config.cluster.auto_failover {
            tracing::info!("Automatic failover disabled, not monitoring the writer");
            return None;
        }

        let monitor = Arc::clone(&self.monitor);
        Some(tokio::spawn(async move { monitor.run().await }))
    }

    /// Run until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            "Node {} starting at {} as {}",
            self.config.node.id,
            self.config.node.address,
            self.roster.snapshot().await.role()
        );

        let monitor_handle = self.start_monitor();
        let result = self.server.start(shutdown).await;

        self.monitor.stop().await;
        if let Some(handle) = monitor_handle {
            handle.abort();
        }
        self.storage.close().await;

        tracing::info!("Node {} stopped", self.config.node.id);
        result
    }

    /// Run until Ctrl+C
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use crate::executor::{Row, Statement};

    #[derive(Default)]
    struct ClosingStorage {
        closed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl StorageEngine for ClosingStorage {
        async fn execute(&self, _statement: &Statement) -> Result<u64> {
            Ok(0)
        }

        async fn query(&self, _statement: &Statement) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_storage() {
        let config = DdbConfig::from_str(
            r#"
[node]
id = "node-1"
address = "http://127.0.0.1:8001"

[database]
host = "127.0.0.1"
user = "root"
password = "root"

[cluster]
writer = "http://127.0.0.1:8001"
primary_identity = "node-1"

[api]
bind_address = "127.0.0.1:0"
"#,
        )
        .unwrap();

        let storage = Arc::new(ClosingStorage::default());
        let transport = Arc::new(
            HttpTransport::new(Duration::from_millis(200), Duration::from_millis(200)).unwrap(),
        );
        let node = Node::new(
            config,
            Arc::clone(&storage) as Arc<dyn StorageEngine>,
            Arc::clone(&transport) as Arc<dyn Transport>,
            transport,
        );

        node.run_until(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        })
        .await
        .unwrap();

        assert!(storage.closed.load(Ordering::SeqCst));
    }
}
