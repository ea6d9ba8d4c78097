use serde::{Deserialize, Serialize};
use stackup_release::{ReleaseConfig, TaskSpec};
use stackup_types::{
    CompletionCondition, HealthCheckSpec, ProcessSpec, StackError, StackResult,
    DEFAULT_BACKEND_PORT, DEFAULT_FRONTEND_PORT, TUNNEL_OTLP_GRPC_PORT, TUNNEL_OTLP_HTTP_PORT,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::logging::{LogLevel, LoggingConfig};
use super::supervisor::SupervisorConfig;
use super::telemetry::TelemetryConfig;
use crate::supervisor::ProcessGraph;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub project: String,
    pub root_dir: PathBuf,
    pub logging: LoggingConfig,
    pub supervisor: SupervisorConfig,
    pub telemetry: TelemetryConfig,
    pub release: ReleaseConfig,
    pub tasks: BTreeMap<String, TaskSpec>,
    #[serde(rename = "process")]
    pub processes: Vec<ProcessSpec>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            project: "developer-portal".to_string(),
            root_dir: PathBuf::from("."),
            logging: LoggingConfig::default(),
            supervisor: SupervisorConfig::default(),
            telemetry: TelemetryConfig::default(),
            release: ReleaseConfig::default(),
            tasks: default_tasks(),
            processes: default_processes(),
        }
    }
}

fn default_processes() -> Vec<ProcessSpec> {
    vec![
        ProcessSpec::new(
            "otel-tunnel",
            format!(
                "kubectl port-forward -n observability svc/otel-collector {}:4317 {}:4318",
                TUNNEL_OTLP_GRPC_PORT, TUNNEL_OTLP_HTTP_PORT
            ),
        ),
        ProcessSpec::new("install", "yarn install --immutable"),
        ProcessSpec::new("backend", "yarn start-backend")
            .depends_on("install", CompletionCondition::ProcessCompletedSuccessfully)
            .with_port(DEFAULT_BACKEND_PORT)
            .with_readiness(HealthCheckSpec::new(
                format!(
                    "http://localhost:{}/.backstage/health/v1/readiness",
                    DEFAULT_BACKEND_PORT
                ),
                "status",
                "ok",
            ))
            .with_telemetry(),
        ProcessSpec::new("frontend", "yarn start")
            .depends_on("backend", CompletionCondition::ProcessHealthy)
            .with_port(DEFAULT_FRONTEND_PORT)
            .with_telemetry(),
    ]
}

fn default_tasks() -> BTreeMap<String, TaskSpec> {
    let mut tasks = BTreeMap::new();
    tasks.insert(
        "build".to_string(),
        TaskSpec::new(
            "Install dependencies, type-check and build every package",
            ["yarn install --immutable", "yarn tsc", "yarn build:all"],
        ),
    );
    tasks.insert(
        "build-backend".to_string(),
        TaskSpec::new(
            "Build the backend bundle",
            ["yarn install --immutable", "yarn tsc", "yarn build:backend"],
        ),
    );
    tasks.insert(
        "docker-build".to_string(),
        TaskSpec::new(
            "Build the backend image locally",
            [
                "yarn build:backend",
                "docker image build . -f packages/backend/Dockerfile --tag developer-portal:local",
            ],
        ),
    );
    tasks.insert(
        "docker-run".to_string(),
        TaskSpec::new(
            "Run the locally built image",
            [format!(
                "docker run --rm -it -p {0}:{0} developer-portal:local",
                DEFAULT_BACKEND_PORT
            )],
        ),
    );
    tasks.insert(
        "nx-graph".to_string(),
        TaskSpec::new("Open the workspace dependency graph", ["yarn nx graph"]),
    );
    tasks
}

impl StackConfig {
    pub fn load(path: impl AsRef<Path>) -> StackResult<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| StackError::Config(format!("Failed to read config: {}", e)))?;

            toml::from_str(&contents)
                .map_err(|e| StackError::Config(format!("Failed to parse config: {}", e)))?
        } else {
            info!("Config file {:?} not found, using the built-in stack", path);
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> StackResult<()> {
        let contents = self.to_toml()?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StackError::Config(format!("Failed to create config dir: {}", e))
                })?;
            }
        }

        std::fs::write(path.as_ref(), contents)
            .map_err(|e| StackError::Config(format!("Failed to write config: {}", e)))?;

        info!("Configuration saved to {:?}", path.as_ref());
        Ok(())
    }

    pub fn to_toml(&self) -> StackResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| StackError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("STACKUP_ROOT_DIR") {
            self.root_dir = PathBuf::from(dir);
        }

        if let Some(level) = lookup("STACKUP_LOG_LEVEL") {
            match LogLevel::parse(&level) {
                Some(level) => self.logging.level = level,
                None => warn!("Ignoring STACKUP_LOG_LEVEL={}: unknown level", level),
            }
        }

        if lookup("STACKUP_LOG_JSON").is_some() {
            self.logging.json = true;
        }

        if let Some(upstream) = lookup("STACKUP_OTLP_UPSTREAM") {
            self.telemetry.upstream = upstream;
        }

        if let Some(name) = lookup("STACKUP_SERVICE_NAME") {
            self.telemetry.service_name = name;
        }

        if let Some(attrs) = lookup("STACKUP_RESOURCE_ATTRIBUTES") {
            self.telemetry.resource_attributes = attrs;
        }

        if let Some(size) = lookup("STACKUP_BATCH_SIZE") {
            if let Ok(n) = size.parse() {
                self.telemetry.batch_size = n;
            }
        }

        if let Some(grace) = lookup("STACKUP_SHUTDOWN_GRACE_SECS") {
            if let Ok(secs) = grace.parse() {
                self.supervisor.shutdown_grace_secs = secs;
            }
        }

        if let Some(registry) = lookup("STACKUP_REGISTRY") {
            self.release.registry = registry;
        }

        if let Some(owner) = lookup("STACKUP_OWNER") {
            self.release.owner = owner;
        }
    }

    pub fn validate(&self) -> StackResult<()> {
        if self.project.trim().is_empty() {
            return Err(StackError::Config("project cannot be empty".into()));
        }

        if self.supervisor.shell.trim().is_empty() {
            return Err(StackError::Config("supervisor.shell cannot be empty".into()));
        }

        self.telemetry.validate()?;
        self.release.validate()?;
        ProcessGraph::new(self.processes.clone())?;

        let mut owners: HashMap<u16, &str> = HashMap::new();
        for spec in &self.processes {
            for binding in &spec.ports {
                if binding.port == 0 {
                    return Err(StackError::Config(format!(
                        "Process '{}' declares port 0",
                        spec.name
                    )));
                }
                if let Some(other) = owners.insert(binding.port, &spec.name) {
                    if other != spec.name {
                        warn!(
                            "Port {} is declared by both '{}' and '{}'; starting one reclaims it from the other",
                            binding.port, other, spec.name
                        );
                    }
                }
                if self.telemetry.enabled
                    && (binding.port == self.telemetry.framed_listen.port()
                        || binding.port == self.telemetry.http_listen.port())
                {
                    return Err(StackError::Config(format!(
                        "Process '{}' port {} collides with the telemetry forwarder",
                        spec.name, binding.port
                    )));
                }
            }
        }

        for (name, task) in &self.tasks {
            if task.commands.iter().any(|c| c.trim().is_empty()) {
                return Err(StackError::Config(format!(
                    "Task '{}' contains an empty command",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn summary(&self) -> StackSummary {
        StackSummary {
            project: self.project.clone(),
            root_dir: self.root_dir.clone(),
            processes: self
                .processes
                .iter()
                .map(|p| {
                    let deps = p
                        .depends_on
                        .iter()
                        .map(|d| format!("{} ({})", d.name, d.condition))
                        .collect::<Vec<_>>();
                    (p.name.clone(), deps)
                })
                .collect(),
            telemetry: self.telemetry.enabled.then(|| {
                (
                    self.telemetry.framed_listen.to_string(),
                    self.telemetry.http_listen.to_string(),
                    self.telemetry.upstream.clone(),
                )
            }),
            tasks: self.tasks.keys().cloned().collect(),
            image: self.release.full_tag("<version>"),
        }
    }
}

#[derive(Debug)]
pub struct StackSummary {
    pub project: String,
    pub root_dir: PathBuf,
    pub processes: Vec<(String, Vec<String>)>,
    pub telemetry: Option<(String, String, String)>,
    pub tasks: Vec<String>,
    pub image: String,
}

impl std::fmt::Display for StackSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Stack: {}", self.project)?;
        writeln!(f, "Root: {:?}", self.root_dir)?;
        writeln!(f, "Processes:")?;
        for (name, deps) in &self.processes {
            if deps.is_empty() {
                writeln!(f, "  {}", name)?;
            } else {
                writeln!(f, "  {} <- {}", name, deps.join(", "))?;
            }
        }
        match &self.telemetry {
            Some((framed, http, upstream)) => {
                writeln!(f, "Telemetry: framed {} / http {} -> {}", framed, http, upstream)?
            }
            None => writeln!(f, "Telemetry: OFF")?,
        }
        writeln!(f, "Tasks: {}", self.tasks.join(", "))?;
        writeln!(f, "Image: {}", self.image)?;
        Ok(())
    }
}
