mod logging;
mod stack;
mod supervisor;
mod telemetry;

pub use logging::{LogLevel, LoggingConfig};
pub use stack::{StackConfig, StackSummary};
pub use supervisor::SupervisorConfig;
pub use telemetry::TelemetryConfig;

pub const DEFAULT_CONFIG_FILE: &str = "stackup.toml";

#[cfg(test)]
mod tests {
    use super::*;
    use stackup_types::{CompletionCondition, StackError};
    use std::collections::HashMap;

    #[test]
    fn test_default_config_validation() {
        let config = StackConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processes.len(), 4);
        assert!(config.tasks.contains_key("nx-graph"));
    }

    #[test]
    fn test_default_stack_shape() {
        let config = StackConfig::default();
        let frontend = config.processes.iter().find(|p| p.name == "frontend").unwrap();
        assert_eq!(frontend.depends_on[0].name, "backend");
        assert_eq!(frontend.depends_on[0].condition, CompletionCondition::ProcessHealthy);

        let backend = config.processes.iter().find(|p| p.name == "backend").unwrap();
        assert!(backend.readiness.is_some());
        assert_eq!(backend.ports[0].port, 7007);
    }

    #[test]
    fn test_config_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stackup.toml");

        let config = StackConfig::default();
        config.save(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[[process]]"));

        let loaded = StackConfig::load(&path).unwrap();
        assert_eq!(loaded.processes, config.processes);
        assert_eq!(loaded.tasks, config.tasks);
        assert_eq!(loaded.release, config.release);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StackConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.project, "developer-portal");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackup.toml");
        std::fs::write(
            &path,
            r#"
project = "demo"

[telemetry]
enabled = false

[[process]]
name = "db"
command = "postgres -D data"
ports = [{ port = 5432 }]

[[process]]
name = "migrate"
command = "yarn migrate"
depends_on = [{ name = "db", condition = "process_started" }]
"#,
        )
        .unwrap();

        let config = StackConfig::load(&path).unwrap();
        assert_eq!(config.project, "demo");
        assert_eq!(config.processes.len(), 2);
        assert!(!config.telemetry.enabled);
        assert_eq!(config.telemetry.batch_size, 1000);
        assert_eq!(config.release.registry, "ghcr.io");
    }

    #[test]
    fn test_cycle_in_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackup.toml");
        std::fs::write(
            &path,
            r#"
[[process]]
name = "a"
command = "true"
depends_on = [{ name = "b" }]

[[process]]
name = "b"
command = "true"
depends_on = [{ name = "a" }]
"#,
        )
        .unwrap();

        let err = StackConfig::load(&path).unwrap_err();
        assert!(matches!(err, StackError::Graph(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackup.toml");
        std::fs::write(
            &path,
            r#"
[[process]]
name = "backend"
command = "yarn start"

[process.readiness]
url = "http://127.0.0.1:7007/ready"
expected_field = "status"
expected_value = "ok"
poll_interval_ms = 0
"#,
        )
        .unwrap();

        let err = StackConfig::load(&path).unwrap_err();
        assert!(matches!(err, StackError::Graph(ref m) if m.contains("poll interval")));
    }

    #[test]
    fn test_unparseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackup.toml");
        std::fs::write(&path, "project = [").unwrap();
        assert!(matches!(StackConfig::load(&path), Err(StackError::Config(_))));
    }

    #[test]
    fn test_port_colliding_with_forwarder() {
        let mut config = StackConfig::default();
        config.processes[2].ports[0].port = 4318;
        assert!(config.validate().is_err());

        config.telemetry.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STACKUP_LOG_LEVEL", "debug"),
            ("STACKUP_OTLP_UPSTREAM", "http://collector:4318"),
            ("STACKUP_BATCH_SIZE", "50"),
            ("STACKUP_OWNER", "acme"),
            ("STACKUP_LOG_JSON", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = StackConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(config.logging.json);
        assert_eq!(config.telemetry.upstream, "http://collector:4318");
        assert_eq!(config.telemetry.batch_size, 50);
        assert_eq!(config.release.owner, "acme");
    }

    #[test]
    fn test_telemetry_tags() {
        let mut telemetry = TelemetryConfig::default();
        telemetry.resource_attributes = "env=local, team = platform".to_string();
        let tags = telemetry.tags().unwrap();
        assert_eq!(tags["env"], "local");
        assert_eq!(tags["team"], "platform");
        assert_eq!(tags["service.name"], "developer-portal");

        telemetry.resource_attributes = "env".to_string();
        assert!(telemetry.tags().is_err());
        assert!(telemetry.validate().is_err());
    }

    #[test]
    fn test_forwarder_listen_ports() {
        let mut telemetry = TelemetryConfig::default();
        let ports: Vec<String> = telemetry.listen_ports().iter().map(|p| p.to_string()).collect();
        assert_eq!(ports, vec!["4317/tcp", "4318/tcp"]);

        telemetry.framed_listen.set_port(0);
        let ports: Vec<String> = telemetry.listen_ports().iter().map(|p| p.to_string()).collect();
        assert_eq!(ports, vec!["4318/tcp"]);
    }

    #[test]
    fn test_child_env() {
        let env = TelemetryConfig::default().child_env();
        assert_eq!(env["OTEL_EXPORTER_OTLP_ENDPOINT"], "http://127.0.0.1:4318");
        assert_eq!(env["OTEL_EXPORTER_OTLP_PROTOCOL"], "http/json");
        assert!(env.contains_key("OTEL_SERVICE_NAME"));
        assert!(env.contains_key("OTEL_RESOURCE_ATTRIBUTES"));
    }

    #[test]
    fn test_summary_display() {
        let summary = StackConfig::default().summary().to_string();
        assert!(summary.contains("frontend <- backend (process_healthy)"));
        assert!(summary.contains("ghcr.io/platform-engineering/developer-portal:<version>"));
    }
}
