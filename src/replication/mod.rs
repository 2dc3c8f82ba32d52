//! Replication Module
//!
//! Best-effort asynchronous propagation of writer mutations to replicas.

mod payload;
mod transport;
mod dispatcher;

pub use payload::{OperationKind, ReplicationMethod, ReplicationPayload};
pub use transport::{HttpTransport, Prober, Transport};
pub use dispatcher::{
    DispatchHandle, ReplicationDispatcher, ReplicationStats, RetryPolicy, StatsSnapshot,
    TaskOutcome, TaskReport,
};
