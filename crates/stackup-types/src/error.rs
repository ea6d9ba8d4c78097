use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dependency graph error: {0}")]
    Graph(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Port error: {0}")]
    Port(String),

    #[error("Readiness error: {0}")]
    Readiness(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Required tool '{tool}' not found. {hint}")]
    ToolMissing { tool: String, hint: String },

    #[error("Step '{step}' failed: {status}")]
    StepFailed {
        step: String,
        status: String,
        code: Option<i32>,
    },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StackError {
    pub fn tool_missing(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        StackError::ToolMissing {
            tool: tool.into(),
            hint: hint.into(),
        }
    }

    pub fn is_tool_missing(&self) -> bool {
        matches!(self, StackError::ToolMissing { .. })
    }

    /// Process exit code the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            StackError::Config(_) | StackError::Graph(_) => 1,
            StackError::ToolMissing { .. } => 127,
            StackError::StepFailed { code: Some(code), .. } if *code != 0 => *code,
            _ => 2,
        }
    }
}

pub type StackResult<T> = Result<T, StackError>;
