use stackup_types::{StackError, StackResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::TaskSpec;
use crate::runner::{CommandRunner, CommandSpec};

pub struct TaskRunner {
    tasks: BTreeMap<String, TaskSpec>,
    runner: Arc<dyn CommandRunner>,
    root_dir: Option<PathBuf>,
}

impl TaskRunner {
    pub fn new(tasks: BTreeMap<String, TaskSpec>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            tasks,
            runner,
            root_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.get(name)
    }

    /// Runs every command of the task in order, stopping at the first failure.
    pub async fn run(&self, name: &str) -> StackResult<()> {
        let task = self.tasks.get(name).ok_or_else(|| {
            StackError::Config(format!(
                "Unknown task '{}'. Available: {}",
                name,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;

        if task.commands.is_empty() {
            info!("Task '{}' has no commands", name);
            return Ok(());
        }

        info!("Running task '{}' ({} commands)", name, task.commands.len());
        for line in &task.commands {
            let mut cmd = CommandSpec::shell(line);
            if let Some(ref dir) = self.root_dir {
                cmd = cmd.in_dir(dir);
            }

            info!("  $ {}", line);
            let output = self.runner.run(&cmd).await?;
            if !output.success() {
                error!("Task '{}' stopped: '{}' exited with {}", name, line, output.status_text());
                return Err(StackError::StepFailed {
                    step: format!("{} ({})", name, line),
                    status: output.status_text(),
                    code: output.code,
                });
            }
        }

        info!("Task '{}' finished", name);
        Ok(())
    }
}
