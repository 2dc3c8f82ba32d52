//! Writer Liveness Monitor
//!
//! Periodically probes the writer from a replica. A single failed probe is
//! treated as suspicion and handed straight to the failover coordinator:
//! there is no confirmation round, no flap damping and no back-off.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::replication::Prober;
use crate::state::{ClusterRoster, ElectionOutcome, FailoverCoordinator};
use crate::error::Result;

/// Result of one monitor tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// This node is the writer; nothing to probe
    Skipped,
    /// Writer answered
    Healthy,
    /// Writer did not answer and an election was attempted
    Suspected(ElectionOutcome),
}

/// Liveness monitor
pub struct LivenessMonitor {
    roster: Arc<ClusterRoster>,
    prober: Arc<dyn Prober>,
    coordinator: Arc<FailoverCoordinator>,
    interval: Duration,
    shutdown: RwLock<bool>,
}

impl LivenessMonitor {
    /// Create a new liveness monitor
    pub fn new(
        roster: Arc<ClusterRoster>,
        prober: Arc<dyn Prober>,
        coordinator: Arc<FailoverCoordinator>,
        interval: Duration,
    ) -> Self {
        Self {
            roster,
            prober,
            coordinator,
            interval,
            shutdown: RwLock::new(false),
        }
    }

    /// Probe the writer once, escalating to an election on failure
    pub async fn check_once(&self) -> Result<ProbeOutcome> {
        let (writer, is_writer) = self.roster.writer_view().await;
        if is_writer {
            return Ok(ProbeOutcome::Skipped);
        }

        match self.prober.probe(&writer).await {
            Ok(()) => {
                tracing::trace!("Writer {} is alive", writer);
                Ok(ProbeOutcome::Healthy)
            }
            Err(e) => {
                tracing::warn!("Writer {} is down: {}", writer, e);
                let outcome = self.coordinator.on_suspicion().await?;
                Ok(ProbeOutcome::Suspected(outcome))
            }
        }
    }

    /// Run the probe loop until [`stop`](Self::stop) is called.
    ///
    /// The first probe happens one interval after start.
    pub async fn run(&self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Liveness monitor started (interval {:?})", self.interval);

        loop {
            ticker.tick().await;

            if *self.shutdown.read().await {
                break;
            }

            if let Err(e) = self.check_once().await {
                tracing::error!("Failover attempt failed: {}", e);
            }
        }

        tracing::info!("Liveness monitor stopped");
    }

    /// Stop the probe loop at its next tick
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use crate::error::Error;
    use crate::state::PrimaryIdentityPolicy;

    /// Prober whose answer can be flipped at runtime
    struct SwitchProber {
        up: AtomicBool,
        probes: AtomicUsize,
    }

    impl SwitchProber {
        fn new(up: bool) -> Self {
            Self {
                up: AtomicBool::new(up),
                probes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Prober for SwitchProber {
        async fn probe(&self, target: &str) -> Result<()> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::Network(format!("connection refused: {}", target)))
            }
        }
    }

    fn monitor(
        self_address: &str,
        node_id: &str,
        prober: Arc<SwitchProber>,
    ) -> (Arc<ClusterRoster>, LivenessMonitor) {
        let roster = Arc::new(ClusterRoster::new(
            self_address.to_string(),
            "http://w:8001".to_string(),
            vec!["http://r1:8002".to_string(), "http://r2:8003".to_string()],
        ));
        let coordinator = Arc::new(FailoverCoordinator::new(
            node_id.to_string(),
            Arc::clone(&roster),
            Arc::new(PrimaryIdentityPolicy::new("node-r1")),
            Duration::from_secs(2),
        ));
        let monitor = LivenessMonitor::new(
            Arc::clone(&roster),
            prober,
            coordinator,
            Duration::from_secs(10),
        );
        (roster, monitor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_writer() {
        let prober = Arc::new(SwitchProber::new(true));
        let (roster, monitor) = monitor("http://r1:8002", "node-r1", Arc::clone(&prober));

        assert_eq!(monitor.check_once().await.unwrap(), ProbeOutcome::Healthy);
        assert!(!roster.is_writer().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_never_probes() {
        let prober = Arc::new(SwitchProber::new(false));
        let (roster, monitor) = monitor("http://r1:8002", "node-r1", Arc::clone(&prober));
        roster.promote_self("http://r1:8002").await.unwrap();

        assert_eq!(monitor.check_once().await.unwrap(), ProbeOutcome::Skipped);
        assert_eq!(prober.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failure_triggers_election() {
        let prober = Arc::new(SwitchProber::new(false));
        let (roster, monitor) = monitor("http://r1:8002", "node-r1", Arc::clone(&prober));

        assert_eq!(
            monitor.check_once().await.unwrap(),
            ProbeOutcome::Suspected(ElectionOutcome::PromotedSelf)
        );
        assert!(roster.is_writer().await);
        assert_eq!(prober.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_probes_on_interval_and_stops_after_promotion() {
        let prober = Arc::new(SwitchProber::new(true));
        let (roster, monitor) = monitor("http://r1:8002", "node-r1", Arc::clone(&prober));
        let monitor = Arc::new(monitor);

        let handle = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.run().await })
        };

        // No probe before the first interval elapses
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(prober.probes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(prober.probes.load(Ordering::SeqCst), 2);

        prober.up.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(13)).await;
        assert!(roster.is_writer().await);
        let probes = prober.probes.load(Ordering::SeqCst);

        // Once writer, ticks no longer probe
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(prober.probes.load(Ordering::SeqCst), probes);

        monitor.stop().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_hanging_writer_counts_as_down() {
        use axum::{routing::get, Router};
        use crate::replication::HttpTransport;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let writer = format!("http://{}", listener.local_addr().unwrap());
        let router = Router::new().route(
            "/ping",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "pong"
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let roster = Arc::new(ClusterRoster::new(
            "http://r1:8002".to_string(),
            writer,
            vec!["http://r1:8002".to_string()],
        ));
        let coordinator = Arc::new(FailoverCoordinator::new(
            "node-r1".to_string(),
            Arc::clone(&roster),
            Arc::new(PrimaryIdentityPolicy::new("node-r1")),
            Duration::from_millis(10),
        ));
        let transport = HttpTransport::new(Duration::from_millis(200), Duration::from_millis(200))
            .unwrap();
        let monitor = LivenessMonitor::new(
            Arc::clone(&roster),
            Arc::new(transport),
            coordinator,
            Duration::from_secs(10),
        );

        let started = std::time::Instant::now();
        assert_eq!(
            monitor.check_once().await.unwrap(),
            ProbeOutcome::Suspected(ElectionOutcome::PromotedSelf)
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(roster.is_writer().await);
    }
}
