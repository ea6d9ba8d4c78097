#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod ports;
pub mod readiness;
pub mod supervisor;
pub mod telemetry;

pub use config::{LogLevel, LoggingConfig, StackConfig, StackSummary, SupervisorConfig, TelemetryConfig, DEFAULT_CONFIG_FILE};
pub use ports::{port_is_free, KilledProcess, LsofInspector, PortInspector, PortReconciler, ReclaimReport};
pub use readiness::{body_matches, Probe, ReadinessGate, ReadinessOutcome};
pub use supervisor::{
    CancelHandle, CancellationToken, LogLine, LogStream, ProcessGraph, ProcessOutcome,
    ProcessStatus, Supervisor, SupervisorReport,
};
pub use telemetry::{
    ForwarderHandle, ForwarderStats, HttpExporter, StatsSnapshot, TelemetryForwarder,
};
