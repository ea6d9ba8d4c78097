mod cancellation;
mod child;
mod core;
mod graph;
mod types;


pub use cancellation::{CancelHandle, CancellationToken};
pub use core::Supervisor;
pub use graph::ProcessGraph;
pub use types::{LogLine, LogStream, ProcessOutcome, ProcessStatus, SupervisorReport};
