use stackup_types::{StackError, StackResult};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{ReleaseConfig, ReleaseOptions};
use crate::runner::{CommandRunner, CommandSpec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Compile,
    BuildImage,
    Login,
    Push,
    TriggerKargo,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Compile => write!(f, "compile"),
            Step::BuildImage => write!(f, "build-image"),
            Step::Login => write!(f, "login"),
            Step::Push => write!(f, "push"),
            Step::TriggerKargo => write!(f, "trigger-kargo"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Skipped(String),
}

#[derive(Clone, Debug)]
pub struct StepReport {
    pub step: Step,
    pub outcome: StepOutcome,
    pub elapsed: Duration,
}

pub struct ReleasePipeline {
    config: ReleaseConfig,
    options: ReleaseOptions,
    runner: Arc<dyn CommandRunner>,
    root_dir: Option<PathBuf>,
}

impl ReleasePipeline {
    pub fn new(
        config: ReleaseConfig,
        options: ReleaseOptions,
        runner: Arc<dyn CommandRunner>,
    ) -> StackResult<Self> {
        config.validate()?;
        options.validate()?;
        Ok(Self {
            config,
            options,
            runner,
            root_dir: None,
        })
    }

    /// Working directory for compile, build and push commands.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    pub fn steps(&self) -> Vec<Step> {
        let mut steps = Vec::with_capacity(5);
        if !self.options.skip_build {
            steps.push(Step::Compile);
        }
        steps.push(Step::BuildImage);
        steps.push(Step::Login);
        steps.push(Step::Push);
        if self.options.trigger_kargo {
            steps.push(Step::TriggerKargo);
        }
        steps
    }

    pub fn short_tag(&self) -> String {
        self.config.short_tag(&self.options.version)
    }

    pub fn full_tag(&self) -> String {
        self.config.full_tag(&self.options.version)
    }

    pub async fn run(&self) -> StackResult<Vec<StepReport>> {
        let steps = self.steps();
        info!(
            "Releasing {} ({} steps: {})",
            self.full_tag(),
            steps.len(),
            steps.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" -> ")
        );

        let mut reports = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            info!("[{}/{}] {}", index + 1, steps.len(), step);
            let started = Instant::now();

            let outcome = match self.run_step(*step).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Step '{}' failed, aborting release: {}", step, e);
                    return Err(e);
                }
            };

            let elapsed = started.elapsed();
            match outcome {
                StepOutcome::Done => info!("[{}/{}] {} done in {:.1?}", index + 1, steps.len(), step, elapsed),
                StepOutcome::Skipped(ref reason) => {
                    warn!("[{}/{}] {} skipped: {}", index + 1, steps.len(), step, reason)
                }
            }
            reports.push(StepReport {
                step: *step,
                outcome,
                elapsed,
            });
        }

        info!("Release of {} complete", self.full_tag());
        Ok(reports)
    }

    async fn run_step(&self, step: Step) -> StackResult<StepOutcome> {
        match step {
            Step::Compile => {
                for line in &self.config.compile_commands {
                    self.exec(step, CommandSpec::shell(line)).await?;
                }
                Ok(StepOutcome::Done)
            }
            Step::BuildImage => {
                let cmd = CommandSpec::new(
                    "docker",
                    [
                        "image".to_string(),
                        "build".to_string(),
                        self.config.context.display().to_string(),
                        "--file".to_string(),
                        self.config.dockerfile.display().to_string(),
                        "--tag".to_string(),
                        self.short_tag(),
                        "--tag".to_string(),
                        self.full_tag(),
                    ],
                );
                self.exec(step, cmd).await?;
                Ok(StepOutcome::Done)
            }
            Step::Login => self.login().await,
            Step::Push => {
                self.exec(step, CommandSpec::new("docker", ["push".to_string(), self.full_tag()]))
                    .await?;
                Ok(StepOutcome::Done)
            }
            Step::TriggerKargo => {
                let cmd = CommandSpec::new(
                    "kargo",
                    [
                        "refresh",
                        "warehouse",
                        "--project",
                        self.config.namespace.as_str(),
                        self.config.warehouse.as_str(),
                    ],
                );
                self.exec(step, cmd).await?;
                Ok(StepOutcome::Done)
            }
        }
    }

    async fn login(&self) -> StackResult<StepOutcome> {
        let secret = match self.fetch_secret().await {
            Ok(secret) => secret,
            Err(reason) if !self.options.require_login => {
                warn!(
                    "Could not obtain registry credentials ({}); assuming an existing `docker login` session for {}",
                    reason, self.config.registry
                );
                return Ok(StepOutcome::Skipped(format!(
                    "no credentials ({}), relying on existing session",
                    reason
                )));
            }
            Err(reason) => {
                return Err(StackError::StepFailed {
                    step: Step::Login.to_string(),
                    status: format!("credentials required but unavailable: {}", reason),
                    code: None,
                });
            }
        };

        let cmd = CommandSpec::new(
            "docker",
            [
                "login",
                self.config.registry.as_str(),
                "--username",
                self.config.login_user(),
                "--password-stdin",
            ],
        )
        .with_stdin(secret);

        self.exec(Step::Login, cmd).await?;
        Ok(StepOutcome::Done)
    }

    async fn fetch_secret(&self) -> Result<String, String> {
        let (program, args) = match self.config.secret_command.split_first() {
            Some(parts) => parts,
            None => return Err("no secret_command configured".to_string()),
        };

        let cmd = CommandSpec::new(program, args.iter().cloned()).captured();
        match self.runner.run(&cmd).await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                Ok(output.stdout.trim().to_string())
            }
            Ok(output) if output.success() => Err(format!("'{}' printed no secret", program)),
            Ok(output) => Err(format!("'{}' failed with {}", program, output.status_text())),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn exec(&self, step: Step, mut cmd: CommandSpec) -> StackResult<()> {
        if let Some(ref dir) = self.root_dir {
            cmd = cmd.in_dir(dir);
        }
        info!("  $ {}", redact(&cmd));
        let output = self.runner.run(&cmd).await?;
        if output.success() {
            Ok(())
        } else {
            Err(StackError::StepFailed {
                step: format!("{} ({})", step, cmd.display_name()),
                status: output.status_text(),
                code: output.code,
            })
        }
    }
}

fn redact(cmd: &CommandSpec) -> String {
    if cmd.stdin.is_some() {
        format!("{} <<< [redacted]", cmd)
    } else {
        cmd.to_string()
    }
}
