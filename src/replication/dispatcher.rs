//! Replication Dispatcher
//!
//! Fans a locally applied mutation out to every replica. Each replica gets
//! its own task with its own retry schedule; tasks never block the caller
//! and are not ordered relative to each other or to tasks of other
//! operations, so replicas may briefly apply operations in different orders.
//!
//! Delivery is at-least-once at best. A replica that applied a payload but
//! whose answer was lost will see the payload again on the next attempt,
//! and nothing here deduplicates it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ReplicationConfig;
use crate::replication::{OperationKind, ReplicationPayload, Transport};
use crate::state::ClusterRoster;
use crate::error::{Error, Result};

/// Retry schedule for one replication task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delivery attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after every failed attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl From<&ReplicationConfig> for RetryPolicy {
    fn from(config: &ReplicationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
        }
    }
}

/// Outcome of a replication task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskOutcome {
    Pending,
    Delivered,
    Exhausted,
}

/// Final report of one (operation, replica) task
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub target: String,
    pub outcome: TaskOutcome,
    pub attempts: u32,
    /// Delays slept between attempts, in order
    pub delays: Vec<Duration>,
}

/// Replication counters for observability
#[derive(Debug, Default)]
pub struct ReplicationStats {
    operations: AtomicU64,
    tasks: AtomicU64,
    attempts: AtomicU64,
    delivered: AtomicU64,
    exhausted: AtomicU64,
}

/// Serializable copy of [`ReplicationStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub operations: u64,
    pub tasks: u64,
    pub attempts: u64,
    pub delivered: u64,
    pub exhausted: u64,
    pub in_flight: u64,
}

impl ReplicationStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let tasks = self.tasks.load(Ordering::Relaxed);
        let delivered = self.delivered.load(Ordering::Relaxed);
        let exhausted = self.exhausted.load(Ordering::Relaxed);
        StatsSnapshot {
            operations: self.operations.load(Ordering::Relaxed),
            tasks,
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered,
            exhausted,
            in_flight: tasks.saturating_sub(delivered + exhausted),
        }
    }
}

/// Delivery state for one (operation, replica) pair
struct ReplicationTask {
    operation_id: Uuid,
    target: String,
    payload: Arc<ReplicationPayload>,
    attempt: u32,
    next_delay: Duration,
    outcome: TaskOutcome,
}

impl ReplicationTask {
    fn new(
        operation_id: Uuid,
        target: String,
        payload: Arc<ReplicationPayload>,
        policy: &RetryPolicy,
    ) -> Self {
        Self {
            operation_id,
            target,
            payload,
            attempt: 0,
            next_delay: policy.base_delay,
            outcome: TaskOutcome::Pending,
        }
    }

    /// Drive the task to Delivered or Exhausted
    async fn run(
        mut self,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        stats: Arc<ReplicationStats>,
    ) -> TaskReport {
        let mut delays = Vec::new();

        while self.outcome == TaskOutcome::Pending {
            self.attempt += 1;
            stats.attempts.fetch_add(1, Ordering::Relaxed);

            match transport.deliver(&self.target, &self.payload).await {
                Ok(()) => {
                    self.outcome = TaskOutcome::Delivered;
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        operation = %self.operation_id,
                        "Replication of {} to {} succeeded",
                        self.payload.kind(),
                        self.target
                    );
                }
                Err(e) if self.attempt >= policy.max_attempts => {
                    self.outcome = TaskOutcome::Exhausted;
                    stats.exhausted.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        operation = %self.operation_id,
                        "Failed to replicate {} to {} after {} attempts: {}",
                        self.payload.kind(),
                        self.target,
                        self.attempt,
                        e
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        operation = %self.operation_id,
                        "Attempt {} failed for {}, retrying in {:?}: {}",
                        self.attempt,
                        self.target,
                        self.next_delay,
                        e
                    );
                    tokio::time::sleep(self.next_delay).await;
                    delays.push(self.next_delay);
                    self.next_delay *= 2;
                }
            }
        }

        TaskReport {
            operation_id: self.operation_id,
            kind: self.payload.kind(),
            target: self.target,
            outcome: self.outcome,
            attempts: self.attempt,
            delays,
        }
    }
}

/// Handle on the tasks spawned for one operation.
///
/// Dropping the handle detaches the tasks; they keep running.
pub struct DispatchHandle {
    operation_id: Uuid,
    tasks: Vec<(String, JoinHandle<TaskReport>)>,
}

impl DispatchHandle {
    /// Identifier shared by every task of this operation
    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    /// Number of tasks spawned
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Targets in dispatch order
    pub fn targets(&self) -> Vec<String> {
        self.tasks.iter().map(|(target, _)| target.clone()).collect()
    }

    /// Whether every task has resolved
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|(_, task)| task.is_finished())
    }

    /// Wait for every task and collect the reports in dispatch order
    pub async fn wait(self) -> Result<Vec<TaskReport>> {
        let (targets, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        targets
            .into_iter()
            .zip(results)
            .map(|(target, result)| {
                result.map_err(|e| {
                    Error::Internal(format!("replication task for {} failed: {}", target, e))
                })
            })
            .collect()
    }
}

/// Replication dispatcher
pub struct ReplicationDispatcher {
    roster: Arc<ClusterRoster>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    stats: Arc<ReplicationStats>,
}

impl ReplicationDispatcher {
    /// Create a new dispatcher
    pub fn new(
        roster: Arc<ClusterRoster>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            roster,
            transport,
            policy,
            stats: Arc::new(ReplicationStats::default()),
        }
    }

    /// Replication counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Fan `payload` out to every replica.
    ///
    /// Returns immediately with a handle on the spawned tasks. Read
    /// operations are never replicated and yield an empty handle.
    pub fn replicate(&self, payload: ReplicationPayload) -> DispatchHandle {
        let operation_id = Uuid::new_v4();

        if !payload.kind().is_mutating() {
            return DispatchHandle {
                operation_id,
                tasks: Vec::new(),
            };
        }

        let replicas = self.roster.replica_addresses();
        self.stats.operations.fetch_add(1, Ordering::Relaxed);
        self.stats.tasks.fetch_add(replicas.len() as u64, Ordering::Relaxed);

        tracing::debug!(
            operation = %operation_id,
            "Dispatching {} to {} replicas",
            payload.kind(),
            replicas.len()
        );

        let payload = Arc::new(payload);
        let tasks = replicas
            .into_iter()
            .map(|target| {
                let task = ReplicationTask::new(
                    operation_id,
                    target.clone(),
                    Arc::clone(&payload),
                    &self.policy,
                );
                let handle = tokio::spawn(task.run(
                    Arc::clone(&self.transport),
                    self.policy,
                    Arc::clone(&self.stats),
                ));
                (target, handle)
            })
            .collect();

        DispatchHandle { operation_id, tasks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Transport that fails the first `failures[target]` attempts per target
    #[derive(Default)]
    struct ScriptedTransport {
        failures: HashMap<String, u32>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedTransport {
        fn failing(target: &str, failures: u32) -> Self {
            let mut map = HashMap::new();
            map.insert(target.to_string(), failures);
            Self {
                failures: map,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_to(&self, target: &str) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == target)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn deliver(&self, target: &str, _payload: &ReplicationPayload) -> Result<()> {
            let previous = {
                let mut calls = self.calls.lock().unwrap();
                let previous = calls.iter().filter(|(t, _)| t == target).count() as u32;
                calls.push((target.to_string(), Instant::now()));
                previous
            };
            if previous < self.failures.get(target).copied().unwrap_or(0) {
                Err(Error::Network(format!("connection refused: {}", target)))
            } else {
                Ok(())
            }
        }
    }

    /// Paused-clock timers fire on millisecond ticks
    fn assert_gap(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(5),
            "expected gap of {:?}, got {:?}",
            expected,
            actual
        );
    }

    fn roster() -> Arc<ClusterRoster> {
        Arc::new(ClusterRoster::new(
            "http://w:8001".to_string(),
            "http://w:8001".to_string(),
            vec!["http://r1:8002".to_string(), "http://r2:8003".to_string()],
        ))
    }

    fn insert_payload() -> ReplicationPayload {
        ReplicationPayload::post_json(
            OperationKind::Insert,
            &serde_json::json!({"dbname": "shop", "table": "orders", "values": "1, 'a'"}),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_task_per_replica_for_every_mutation() {
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = ReplicationDispatcher::new(
            roster(),
            transport,
            RetryPolicy::default(),
        );

        for kind in OperationKind::MUTATING {
            let handle = dispatcher.replicate(ReplicationPayload::get(kind, vec![]));
            assert_eq!(handle.len(), 2);
            assert_eq!(
                handle.targets(),
                vec!["http://r1:8002".to_string(), "http://r2:8003".to_string()]
            );
            let reports = handle.wait().await.unwrap();
            assert!(reports.iter().all(|r| r.outcome == TaskOutcome::Delivered && r.kind == kind));
        }
        assert_eq!(dispatcher.stats().operations, 6);
        assert_eq!(dispatcher.stats().tasks, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_are_not_replicated() {
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = ReplicationDispatcher::new(
            roster(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            RetryPolicy::default(),
        );

        let handle = dispatcher.replicate(ReplicationPayload::get(OperationKind::Select, vec![]));
        assert!(handle.is_empty());
        assert!(handle.wait().await.unwrap().is_empty());
        assert!(transport.calls.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().operations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_target_exhausts_after_three_attempts() {
        let transport = Arc::new(ScriptedTransport::failing("http://r1:8002", u32::MAX));
        let roster = Arc::new(ClusterRoster::new(
            "http://w:8001".to_string(),
            "http://w:8001".to_string(),
            vec!["http://r1:8002".to_string()],
        ));
        let dispatcher = ReplicationDispatcher::new(
            roster,
            Arc::clone(&transport) as Arc<dyn Transport>,
            RetryPolicy::default(),
        );

        let reports = dispatcher.replicate(insert_payload()).wait().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, TaskOutcome::Exhausted);
        assert_eq!(reports[0].attempts, 3);
        assert_eq!(reports[0].delays, vec![Duration::from_secs(2), Duration::from_secs(4)]);

        // Measured gaps between attempts
        let calls = transport.calls_to("http://r1:8002");
        assert_eq!(calls.len(), 3);
        assert_gap(calls[1] - calls[0], Duration::from_secs(2));
        assert_gap(calls[2] - calls[1], Duration::from_secs(4));

        let stats = dispatcher.stats();
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_attempt_k_stops_retrying() {
        for k in 1..=3u32 {
            let transport = Arc::new(ScriptedTransport::failing("http://r1:8002", k - 1));
            let dispatcher = ReplicationDispatcher::new(
                roster(),
                Arc::clone(&transport) as Arc<dyn Transport>,
                RetryPolicy::default(),
            );

            let reports = dispatcher.replicate(insert_payload()).wait().await.unwrap();
            let r1 = reports.iter().find(|r| r.target == "http://r1:8002").unwrap();
            assert_eq!(r1.outcome, TaskOutcome::Delivered);
            assert_eq!(r1.attempts, k);
            assert_eq!(transport.calls_to("http://r1:8002").len() as u32, k);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replicas_are_driven_independently() {
        let transport = Arc::new(ScriptedTransport::failing("http://r2:8003", u32::MAX));
        let dispatcher = ReplicationDispatcher::new(
            roster(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            RetryPolicy::default(),
        );

        let start = Instant::now();
        let reports = dispatcher.replicate(insert_payload()).wait().await.unwrap();

        let r1 = &reports[0];
        let r2 = &reports[1];
        assert_eq!(r1.outcome, TaskOutcome::Delivered);
        assert_eq!(r1.attempts, 1);
        assert_eq!(r2.outcome, TaskOutcome::Exhausted);
        assert_eq!(r2.attempts, 3);
        assert_eq!(r1.operation_id, r2.operation_id);

        // r1 was delivered at once, not held back by r2's retries
        assert_eq!(transport.calls_to("http://r1:8002")[0], start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replicate_returns_before_delivery() {
        let transport = Arc::new(ScriptedTransport::failing("http://r1:8002", 2));
        let dispatcher = ReplicationDispatcher::new(
            roster(),
            transport,
            RetryPolicy::default(),
        );

        let handle = dispatcher.replicate(insert_payload());
        assert!(!handle.is_finished());
        assert_eq!(dispatcher.stats().in_flight, 2);

        let reports = handle.wait().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(dispatcher.stats().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_survive_promotion() {
        let roster = Arc::new(ClusterRoster::new(
            "http://r1:8002".to_string(),
            "http://w:8001".to_string(),
            vec!["http://r2:8003".to_string()],
        ));
        let transport = Arc::new(ScriptedTransport::failing("http://r2:8003", 1));
        let dispatcher = ReplicationDispatcher::new(
            Arc::clone(&roster),
            transport,
            RetryPolicy::default(),
        );

        let handle = dispatcher.replicate(insert_payload());
        tokio::task::yield_now().await;
        roster.promote_self("http://r1:8002").await.unwrap();

        let reports = handle.wait().await.unwrap();
        assert_eq!(reports[0].outcome, TaskOutcome::Delivered);
        assert_eq!(reports[0].attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_after_lost_ack_duplicates_effect() {
        /// Applies every payload, but loses the acknowledgement of the first one
        #[derive(Default)]
        struct LossyAckReplica {
            applied: Mutex<u32>,
        }

        #[async_trait::async_trait]
        impl Transport for LossyAckReplica {
            async fn deliver(&self, target: &str, _payload: &ReplicationPayload) -> Result<()> {
                let mut applied = self.applied.lock().unwrap();
                *applied += 1;
                if *applied == 1 {
                    Err(Error::ConnectionTimeout(target.to_string()))
                } else {
                    Ok(())
                }
            }
        }

        let replica = Arc::new(LossyAckReplica::default());
        let roster = Arc::new(ClusterRoster::new(
            "http://w:8001".to_string(),
            "http://w:8001".to_string(),
            vec!["http://r1:8002".to_string()],
        ));
        let dispatcher = ReplicationDispatcher::new(
            roster,
            Arc::clone(&replica) as Arc<dyn Transport>,
            RetryPolicy::default(),
        );

        let reports = dispatcher.replicate(insert_payload()).wait().await.unwrap();
        assert_eq!(reports[0].outcome, TaskOutcome::Delivered);
        // No deduplication: the insert reached the replica twice
        assert_eq!(*replica.applied.lock().unwrap(), 2);
    }
}
