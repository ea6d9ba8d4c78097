mod batcher;
mod exporter;
mod framed;
mod forwarder;
mod http;

#[cfg(test)]
mod tests;

pub use batcher::Batcher;
pub use exporter::{DiagnosticSink, Exporter, HttpExporter, LogSink, DIAGNOSTIC_TARGET};
pub use framed::{decode_frame, encode_frame};
pub use forwarder::{ForwarderHandle, ForwarderStats, StatsSnapshot, TelemetryForwarder};
