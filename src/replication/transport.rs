//! Replication Transport
//!
//! One delivery attempt of one payload to one replica, and the writer
//! liveness probe. Neither retries: retry policy lives in the dispatcher.

use std::time::Duration;
use reqwest::header::CONTENT_TYPE;

use crate::replication::{ReplicationMethod, ReplicationPayload};
use crate::error::{Error, Result};

/// Delivers replication payloads
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `payload` to `target` once.
    ///
    /// Ok only if the call completed and the replica answered with a
    /// success status.
    async fn deliver(&self, target: &str, payload: &ReplicationPayload) -> Result<()>;
}

/// Probes a node for liveness
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Ok if `target` answered at all within the probe timeout
    async fn probe(&self, target: &str) -> Result<()>;
}

/// HTTP transport over a shared reqwest client
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(request_timeout: Duration, probe_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            request_timeout,
            probe_timeout,
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, target: &str, payload: &ReplicationPayload) -> Result<()> {
        let url = payload.url(target)?;

        let request = match payload.method() {
            ReplicationMethod::Get { query } => self.client.get(&url).query(query),
            ReplicationMethod::Post { body } => self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone()),
        };

        let response = request.timeout(self.request_timeout).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::DeliveryRejected {
                target: target.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait::async_trait]
impl Prober for HttpTransport {
    async fn probe(&self, target: &str) -> Result<()> {
        let url = format!("{}/ping", target.trim_end_matches('/'));
        // Any answer counts as alive; only errors and timeouts are failures
        self.client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await?;
        Ok(())
    }
}
