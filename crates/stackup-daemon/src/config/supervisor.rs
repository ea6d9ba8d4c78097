use serde::{Deserialize, Serialize};
use stackup_types::{DEFAULT_PORT_SETTLE_MS, DEFAULT_SHUTDOWN_GRACE_SECS};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Time a child gets between SIGTERM and SIGKILL on shutdown.
    pub shutdown_grace_secs: u64,
    pub port_settle_ms: u64,
    pub shell: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            port_settle_ms: DEFAULT_PORT_SETTLE_MS,
            shell: "sh".to_string(),
        }
    }
}

impl SupervisorConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn port_settle(&self) -> Duration {
        Duration::from_millis(self.port_settle_ms)
    }
}
