//! Observer contract and the shared context every observer runs against (C7).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::dump::DumpWriter;
use crate::health::HealthReporter;
use crate::probes::{ClusterQueryClient, OsProbe};
use crate::sinks::{CsvSink, LogFileSink};
use crate::telemetry::TelemetrySink;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("cluster query failed: {0}")]
    ClusterQuery(#[from] crate::probes::ClusterQueryError),
    #[error("target process vanished: {0}")]
    TargetVanished(u32),
    #[error("probe call failed: {0}")]
    Probe(#[from] crate::probes::ProbeError),
    #[error("dump failed: {0}")]
    Dump(#[from] crate::dump::DumpError),
    #[error("observation cancelled")]
    Cancelled,
    #[error("fatal agent error: {0}")]
    Fatal(String),
}

/// Dependencies shared by every observer, assembled once at startup and
/// handed out by reference each iteration. Breaks the cyclic reference a
/// scheduler/observer pair would otherwise need.
pub struct AgentContext {
    pub node_name: String,
    pub config: Arc<AgentConfig>,
    pub cluster_query: Arc<dyn ClusterQueryClient>,
    pub os_probe: Arc<dyn OsProbe>,
    pub health_reporter: Arc<dyn HealthReporter>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub dump_writer: Arc<dyn DumpWriter>,
    pub csv_sink: Option<Arc<CsvSink>>,
    pub log_file_sink: Option<Arc<LogFileSink>>,
    pub cancellation: CancellationToken,
}

impl AgentContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// One monitoring component. The scheduler drives these sequentially, each
/// under its own timeout and all sharing one cancellation token.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Stable name used in health reports, logs, and the `--observers` filter.
    fn name(&self) -> &'static str;

    fn enabled(&self, ctx: &AgentContext) -> bool;

    /// How long to wait after a completed run before running again.
    fn run_interval(&self, ctx: &AgentContext) -> Duration;

    /// Samples and evaluates. Any error other than `Fatal` is caught by the
    /// scheduler, reported, and treated as a skipped iteration; `Fatal`
    /// propagates and stops the agent.
    async fn observe(&self, ctx: &AgentContext) -> Result<(), ObserverError>;
}
