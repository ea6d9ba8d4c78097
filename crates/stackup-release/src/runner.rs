use async_trait::async_trait;
use stackup_types::{StackError, StackResult};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::tools::install_hint;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub cwd: Option<PathBuf>,
    /// Capture stdout instead of streaming it to the terminal.
    pub capture: bool,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            cwd: None,
            capture: false,
        }
    }

    pub fn shell(line: &str) -> Self {
        Self::new("sh", ["-c", line])
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn captured(mut self) -> Self {
        self.capture = true;
        self
    }

    /// The program a reader would recognize: the shell line for `sh -c`.
    pub fn display_name(&self) -> String {
        if self.program == "sh" && self.args.first().map(String::as_str) == Some("-c") {
            self.args.get(1).cloned().unwrap_or_default()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs to completion. A non-zero exit is an `Ok` output; only a
    /// failure to launch is an error.
    async fn run(&self, command: &CommandSpec) -> StackResult<CommandOutput>;
}

#[derive(Clone, Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> StackResult<CommandOutput> {
        debug!("exec: {}", spec);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::inherit() })
            .stdout(if spec.capture { Stdio::piped() } else { Stdio::inherit() })
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(ref dir) = spec.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StackError::tool_missing(&spec.program, install_hint(&spec.program))
            } else {
                StackError::Process(format!("Failed to launch '{}': {}", spec.program, e))
            }
        })?;

        if let Some(ref input) = spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await.map_err(|e| {
                    StackError::Io(format!("Failed to write stdin of '{}': {}", spec.program, e))
                })?;
                drop(stdin);
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            StackError::Process(format!("Failed to wait for '{}': {}", spec.program, e))
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }
}
