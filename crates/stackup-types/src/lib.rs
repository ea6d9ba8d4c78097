#![forbid(unsafe_code)]
#![warn(clippy::all)]

mod error;
mod process;
mod telemetry;

pub use error::{StackError, StackResult};
pub use process::{
    CompletionCondition, Dependency, HealthCheckSpec, PortBinding, ProcessSpec, Protocol,
};
pub use telemetry::{RecordBody, RecordSource, Signal, TelemetryRecord};

pub const DEFAULT_OTLP_GRPC_PORT: u16 = 4317;

pub const DEFAULT_OTLP_HTTP_PORT: u16 = 4318;

pub const DEFAULT_BACKEND_PORT: u16 = 7007;

pub const DEFAULT_FRONTEND_PORT: u16 = 3000;

pub const TUNNEL_OTLP_GRPC_PORT: u16 = 14317;

pub const TUNNEL_OTLP_HTTP_PORT: u16 = 14318;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

pub const DEFAULT_PORT_SETTLE_MS: u64 = 1000;

pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
