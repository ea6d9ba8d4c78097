use serde::{Deserialize, Serialize};
use stackup_types::{
    PortBinding, StackError, StackResult, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT_SECS,
    DEFAULT_OTLP_GRPC_PORT, DEFAULT_OTLP_HTTP_PORT, TUNNEL_OTLP_HTTP_PORT,
};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub framed_listen: SocketAddr,
    pub http_listen: SocketAddr,
    /// Base URL of the collector as seen through the tunnel.
    pub upstream: String,
    pub batch_size: usize,
    pub batch_timeout_secs: u64,
    pub service_name: String,
    /// `key=value,key=value`, attached to every forwarded record.
    pub resource_attributes: String,
    pub protocol: String,
    pub max_body_bytes: usize,
    pub export_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            framed_listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_OTLP_GRPC_PORT)),
            http_listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_OTLP_HTTP_PORT)),
            upstream: format!("http://127.0.0.1:{}", TUNNEL_OTLP_HTTP_PORT),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout_secs: DEFAULT_BATCH_TIMEOUT_SECS,
            service_name: "developer-portal".to_string(),
            resource_attributes: "deployment.environment=local".to_string(),
            protocol: "http/json".to_string(),
            max_body_bytes: 4 * 1024 * 1024,
            export_timeout_secs: 10,
        }
    }
}

impl TelemetryConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    /// Fixed tags: the parsed resource attributes plus `service.name`.
    pub fn tags(&self) -> StackResult<BTreeMap<String, String>> {
        let mut tags = BTreeMap::new();
        for pair in self.resource_attributes.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                StackError::Config(format!(
                    "Invalid resource attribute '{}', expected key=value",
                    pair
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(StackError::Config(format!(
                    "Resource attribute '{}' has an empty key",
                    pair
                )));
            }
            tags.insert(key.to_string(), value.trim().to_string());
        }
        tags.insert("service.name".to_string(), self.service_name.clone());
        Ok(tags)
    }

    /// Environment handed to children that opt into telemetry.
    pub fn child_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "OTEL_EXPORTER_OTLP_ENDPOINT".to_string(),
            format!("http://{}", self.http_listen),
        );
        env.insert("OTEL_EXPORTER_OTLP_PROTOCOL".to_string(), self.protocol.clone());
        env.insert("OTEL_SERVICE_NAME".to_string(), self.service_name.clone());
        env.insert(
            "OTEL_RESOURCE_ATTRIBUTES".to_string(),
            self.resource_attributes.clone(),
        );
        env
    }

    /// Fixed TCP ports the forwarder listens on. Ephemeral (port 0) listeners are left out.
    pub fn listen_ports(&self) -> Vec<PortBinding> {
        let mut ports: Vec<PortBinding> = Vec::new();
        for addr in [self.framed_listen, self.http_listen] {
            let binding = PortBinding::tcp(addr.port());
            if addr.port() != 0 && !ports.contains(&binding) {
                ports.push(binding);
            }
        }
        ports
    }

    pub fn validate(&self) -> StackResult<()> {
        if self.batch_size == 0 {
            return Err(StackError::Config("telemetry.batch_size cannot be 0".into()));
        }

        if self.batch_timeout_secs == 0 {
            return Err(StackError::Config(
                "telemetry.batch_timeout_secs cannot be 0".into(),
            ));
        }

        if self.framed_listen.port() != 0 && self.framed_listen == self.http_listen {
            return Err(StackError::Config(
                "Framed and HTTP telemetry endpoints cannot share an address".into(),
            ));
        }

        if !self.upstream.starts_with("http://") && !self.upstream.starts_with("https://") {
            return Err(StackError::Config(format!(
                "telemetry.upstream must be an http(s) URL: {}",
                self.upstream
            )));
        }

        if self.service_name.trim().is_empty() {
            return Err(StackError::Config("telemetry.service_name cannot be empty".into()));
        }

        if self.max_body_bytes < 1024 {
            return Err(StackError::Config(
                "telemetry.max_body_bytes must be at least 1024 bytes".into(),
            ));
        }

        self.tags()?;
        Ok(())
    }
}
