use serde::Serialize;
use std::fmt;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ProcessStatus {
    Pending,
    Starting,
    Running,
    Completed,
    Failed { code: Option<i32> },
    Skipped { reason: String },
    Stopped,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed
                | ProcessStatus::Failed { .. }
                | ProcessStatus::Skipped { .. }
                | ProcessStatus::Stopped
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Pending => write!(f, "pending"),
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Completed => write!(f, "completed"),
            ProcessStatus::Failed { code: Some(code) } => write!(f, "failed (exit {})", code),
            ProcessStatus::Failed { code: None } => write!(f, "failed"),
            ProcessStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
            ProcessStatus::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProcessOutcome {
    pub name: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: Option<Instant>,
    pub exited_at: Option<Instant>,
    pub ready: bool,
    pub error: Option<String>,
}

impl ProcessOutcome {
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ProcessStatus::Pending,
            pid: None,
            started_at: None,
            exited_at: None,
            ready: false,
            error: None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ProcessStatus::Completed => Some(0),
            ProcessStatus::Failed { code } => code,
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug)]
pub struct LogLine {
    pub process: String,
    pub stream: LogStream,
    pub line: String,
}

#[derive(Clone, Debug)]
pub struct SupervisorReport {
    /// In start order.
    pub outcomes: Vec<ProcessOutcome>,
    pub cancelled: bool,
}

impl SupervisorReport {
    pub fn outcome(&self, name: &str) -> Option<&ProcessOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ProcessOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ProcessStatus::Failed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ProcessOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ProcessStatus::Skipped { .. }))
    }

    /// No failures, and nothing skipped unless the operator stopped the run.
    pub fn succeeded(&self) -> bool {
        self.failed().next().is_none() && (self.cancelled || self.skipped().next().is_none())
    }

    /// First non-zero exit code among failed processes.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            return 0;
        }
        self.failed()
            .find_map(|o| o.exit_code().filter(|&c| c != 0))
            .unwrap_or(1)
    }
}

#[derive(Debug)]
pub(crate) enum Event {
    Started { name: String, pid: Option<u32>, at: Instant },
    SpawnFailed { name: String, error: String },
    Exited { name: String, code: Option<i32>, at: Instant },
    Ready { name: String, attempts: u32 },
    GateCancelled { name: String },
}
