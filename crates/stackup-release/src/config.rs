use serde::{Deserialize, Serialize};
use stackup_types::{StackError, StackResult};
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    pub registry: String,
    pub owner: String,
    pub image: String,
    pub warehouse: String,
    pub namespace: String,
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    pub compile_commands: Vec<String>,
    /// Command whose stdout is the registry password.
    pub secret_command: Vec<String>,
    pub registry_user: Option<String>,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            registry: "ghcr.io".to_string(),
            owner: "platform-engineering".to_string(),
            image: "developer-portal".to_string(),
            warehouse: "developer-portal".to_string(),
            namespace: "developer-portal".to_string(),
            dockerfile: PathBuf::from("packages/backend/Dockerfile"),
            context: PathBuf::from("."),
            compile_commands: vec![
                "yarn install --immutable".to_string(),
                "yarn tsc".to_string(),
                "yarn build:backend".to_string(),
            ],
            secret_command: vec!["gh".to_string(), "auth".to_string(), "token".to_string()],
            registry_user: None,
        }
    }
}

impl ReleaseConfig {
    pub fn short_tag(&self, version: &str) -> String {
        format!("{}:{}", self.image, version)
    }

    pub fn full_tag(&self, version: &str) -> String {
        format!("{}/{}/{}:{}", self.registry, self.owner, self.image, version)
    }

    pub fn login_user(&self) -> &str {
        self.registry_user.as_deref().unwrap_or(&self.owner)
    }

    pub fn validate(&self) -> StackResult<()> {
        for (field, value) in [
            ("registry", &self.registry),
            ("owner", &self.owner),
            ("image", &self.image),
            ("warehouse", &self.warehouse),
            ("namespace", &self.namespace),
        ] {
            if value.trim().is_empty() {
                return Err(StackError::Config(format!("release.{} cannot be empty", field)));
            }
            if value.chars().any(char::is_whitespace) {
                return Err(StackError::Config(format!(
                    "release.{} cannot contain whitespace: {:?}",
                    field, value
                )));
            }
        }

        if self.image.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(StackError::Config(format!(
                "Image name must be lowercase: {}",
                self.image
            )));
        }

        Ok(())
    }

    pub fn apply(&mut self, overrides: &ReleaseOverrides) {
        if let Some(ref registry) = overrides.registry {
            self.registry = registry.clone();
        }
        if let Some(ref owner) = overrides.owner {
            self.owner = owner.clone();
        }
        if let Some(ref image) = overrides.image {
            self.image = image.clone();
        }
        if let Some(ref warehouse) = overrides.warehouse {
            self.warehouse = warehouse.clone();
        }
        if let Some(ref namespace) = overrides.namespace {
            self.namespace = namespace.clone();
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ReleaseOverrides {
    pub registry: Option<String>,
    pub owner: Option<String>,
    pub image: Option<String>,
    pub warehouse: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ReleaseOptions {
    pub version: String,
    pub skip_build: bool,
    pub trigger_kargo: bool,
    pub require_login: bool,
}

impl ReleaseOptions {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            skip_build: false,
            trigger_kargo: false,
            require_login: false,
        }
    }

    pub fn validate(&self) -> StackResult<()> {
        let version = self.version.trim();
        if version.is_empty() {
            return Err(StackError::Config("VERSION is required".into()));
        }
        let valid = version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid || version.len() > 128 || version.starts_with(['.', '-']) {
            return Err(StackError::Config(format!(
                "Invalid image tag: {:?}",
                self.version
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub commands: Vec<String>,
}

impl TaskSpec {
    pub fn new<I, S>(description: &str, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            description: Some(description.to_string()),
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}
