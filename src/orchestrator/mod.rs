//! Concurrent agent run management.
//!
//! A run is one agent (policy + environment) driven by a dedicated tokio
//! task, either training against the simulator or making paced live
//! decisions from a checkpoint. The orchestrator owns the run table and
//! exposes start/stop/status; metrics flow through a pluggable sink.

pub mod manager;
pub mod metrics;
pub mod run;

pub use manager::{AgentRunOrchestrator, MarketFactory, OrchestratorConfig};
pub use metrics::{rolling_sharpe, InMemoryMetricSink, MetricRecord, MetricSink};
pub use run::{parse_run_mode, RunConfig, RunMode, RunRecord, RunState, RunStatus};
