use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use stackup_types::{Signal, StackError, StackResult, TelemetryRecord};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const DIAGNOSTIC_TARGET: &str = "stackup::telemetry::debug";

#[async_trait]
pub trait Exporter: Send + Sync {
    /// Delivers one batch of a single signal upstream.
    async fn export(&self, signal: Signal, records: &[TelemetryRecord]) -> StackResult<()>;
}

/// Local fallback for batches the upstream did not take.
pub trait DiagnosticSink: Send + Sync {
    fn mirror(&self, signal: Signal, records: &[TelemetryRecord], error: &StackError);
}

#[derive(Serialize)]
struct ExportEnvelope<'a> {
    resource: Resource<'a>,
    records: &'a [TelemetryRecord],
}

#[derive(Serialize)]
struct Resource<'a> {
    attributes: &'a BTreeMap<String, String>,
}

/// JSON over HTTP to `<upstream>/v1/<signal>`.
pub struct HttpExporter {
    client: Client,
    upstream: String,
    resource: BTreeMap<String, String>,
}

impl HttpExporter {
    pub fn new(
        upstream: &str,
        resource: BTreeMap<String, String>,
        timeout: Duration,
    ) -> StackResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| StackError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            upstream: upstream.trim_end_matches('/').to_string(),
            resource,
        })
    }

    pub fn endpoint(&self, signal: Signal) -> String {
        format!("{}{}", self.upstream, signal.export_path())
    }
}

#[async_trait]
impl Exporter for HttpExporter {
    async fn export(&self, signal: Signal, records: &[TelemetryRecord]) -> StackResult<()> {
        let url = self.endpoint(signal);
        debug!("Exporting {} {} records to {}", records.len(), signal, url);

        let envelope = ExportEnvelope {
            resource: Resource {
                attributes: &self.resource,
            },
            records,
        };

        let response = self
            .client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| StackError::Network(format!("Upstream {} unreachable: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StackError::Telemetry(format!(
                "Upstream {} rejected batch: HTTP {}",
                url,
                status.as_u16()
            )));
        }

        Ok(())
    }
}

/// Writes each record as JSON through `tracing` under [`DIAGNOSTIC_TARGET`].
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn mirror(&self, signal: Signal, records: &[TelemetryRecord], error: &StackError) {
        warn!(
            target: DIAGNOSTIC_TARGET,
            "Mirroring {} {} records locally: {}",
            records.len(),
            signal,
            error
        );
        for record in records {
            match serde_json::to_string(record) {
                Ok(json) => warn!(target: DIAGNOSTIC_TARGET, "{} {}", signal, json),
                Err(e) => warn!(target: DIAGNOSTIC_TARGET, "{} <unserializable record: {}>", signal, e),
            }
        }
    }
}
