use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::DEFAULT_POLL_INTERVAL_MS;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<HealthCheckSpec>,
    #[serde(default)]
    pub telemetry: bool,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            working_dir: None,
            env: BTreeMap::new(),
            depends_on: Vec::new(),
            ports: Vec::new(),
            readiness: None,
            telemetry: false,
        }
    }

    pub fn depends_on(mut self, name: impl Into<String>, condition: CompletionCondition) -> Self {
        self.depends_on.push(Dependency {
            name: name.into(),
            condition,
        });
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.ports.push(PortBinding::tcp(port));
        self
    }

    pub fn with_readiness(mut self, check: HealthCheckSpec) -> Self {
        self.readiness = Some(check);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_telemetry(mut self) -> Self {
        self.telemetry = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub condition: CompletionCondition,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionCondition {
    #[default]
    ProcessCompletedSuccessfully,
    ProcessCompleted,
    ProcessStarted,
    ProcessHealthy,
}

impl fmt::Display for CompletionCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionCondition::ProcessCompletedSuccessfully => {
                write!(f, "process_completed_successfully")
            }
            CompletionCondition::ProcessCompleted => write!(f, "process_completed"),
            CompletionCondition::ProcessStarted => write!(f, "process_started"),
            CompletionCondition::ProcessHealthy => write!(f, "process_healthy"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortBinding {
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortBinding {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }

    pub fn udp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Udp,
        }
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub url: String,
    /// Dot-separated path into the JSON response body.
    pub expected_field: String,
    pub expected_value: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl HealthCheckSpec {
    pub fn new(
        url: impl Into<String>,
        expected_field: impl Into<String>,
        expected_value: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            expected_field: expected_field.into(),
            expected_value: expected_value.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        // round up so a sub-millisecond interval never becomes 0
        self.poll_interval_ms = interval.as_micros().div_ceil(1000) as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
