use super::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use stackup_types::{StackError, StackResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Clone)]
enum Scripted {
    Exit(i32, &'static str),
    Missing,
}

/// Records every command and answers from a script keyed by the first
/// word of the command line. Unscripted commands succeed silently.
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    script: HashMap<String, Scripted>,
}

impl RecordingRunner {
    fn with(mut self, key: &str, answer: Scripted) -> Self {
        self.script.insert(key.to_string(), answer);
        self
    }

    fn lines(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.display_name()).collect()
    }

    fn call_for(&self, prefix: &str) -> Option<CommandSpec> {
        self.calls
            .lock()
            .iter()
            .find(|c| c.display_name().starts_with(prefix))
            .cloned()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandSpec) -> StackResult<CommandOutput> {
        self.calls.lock().push(command.clone());

        let line = command.display_name();
        let key = self
            .script
            .keys()
            .filter(|k| line.starts_with(k.as_str()))
            .max_by_key(|k| k.len());

        match key.and_then(|k| self.script.get(k)) {
            Some(Scripted::Missing) => Err(StackError::tool_missing(&command.program, "install it")),
            Some(Scripted::Exit(code, stdout)) => Ok(CommandOutput {
                code: Some(*code),
                stdout: stdout.to_string(),
            }),
            None => Ok(CommandOutput {
                code: Some(0),
                stdout: String::new(),
            }),
        }
    }
}

fn pipeline(options: ReleaseOptions, runner: Arc<RecordingRunner>) -> ReleasePipeline {
    ReleasePipeline::new(ReleaseConfig::default(), options, runner).unwrap()
}

fn token_runner() -> RecordingRunner {
    RecordingRunner::default().with("gh auth token", Scripted::Exit(0, "ghp_abc123\n"))
}

#[tokio::test]
async fn test_full_release_order() {
    let runner = Arc::new(token_runner());
    let reports = pipeline(ReleaseOptions::new("1.4.0"), runner.clone())
        .run()
        .await
        .unwrap();

    let steps: Vec<Step> = reports.iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![Step::Compile, Step::BuildImage, Step::Login, Step::Push]);
    assert!(reports.iter().all(|r| r.outcome == StepOutcome::Done));

    assert_eq!(
        runner.lines(),
        vec![
            "yarn install --immutable",
            "yarn tsc",
            "yarn build:backend",
            "docker image build . --file packages/backend/Dockerfile --tag developer-portal:1.4.0 --tag ghcr.io/platform-engineering/developer-portal:1.4.0",
            "gh auth token",
            "docker login ghcr.io --username platform-engineering --password-stdin",
            "docker push ghcr.io/platform-engineering/developer-portal:1.4.0",
        ]
    );

    let login = runner.call_for("docker login").unwrap();
    assert_eq!(login.stdin.as_deref(), Some("ghp_abc123"));
    assert!(!login.args.iter().any(|a| a.contains("ghp_abc123")));
}

#[tokio::test]
async fn test_skip_build_omits_compile() {
    let runner = Arc::new(token_runner());
    let mut options = ReleaseOptions::new("2.0.0");
    options.skip_build = true;

    let reports = pipeline(options, runner.clone()).run().await.unwrap();
    assert_eq!(reports.first().map(|r| r.step), Some(Step::BuildImage));
    assert!(runner.call_for("yarn").is_none());
}

#[tokio::test]
async fn test_build_failure_stops_before_login_and_push() {
    let runner = Arc::new(token_runner().with("docker image build", Scripted::Exit(17, "")));

    let err = pipeline(ReleaseOptions::new("1.0.0"), runner.clone())
        .run()
        .await
        .unwrap_err();

    match &err {
        StackError::StepFailed { code, .. } => assert_eq!(*code, Some(17)),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.exit_code(), 17);
    assert!(runner.call_for("gh").is_none());
    assert!(runner.call_for("docker login").is_none());
    assert!(runner.call_for("docker push").is_none());
}

#[tokio::test]
async fn test_compile_failure_is_fail_fast() {
    let runner = Arc::new(token_runner().with("yarn tsc", Scripted::Exit(2, "")));

    let err = pipeline(ReleaseOptions::new("1.0.0"), runner.clone())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, StackError::StepFailed { code: Some(2), .. }));
    assert!(runner.call_for("yarn build:backend").is_none());
    assert!(runner.call_for("docker").is_none());
}

#[tokio::test]
async fn test_missing_secret_tool_falls_back_to_existing_session() {
    let runner = Arc::new(RecordingRunner::default().with("gh", Scripted::Missing));

    let reports = pipeline(ReleaseOptions::new("1.0.0"), runner.clone())
        .run()
        .await
        .unwrap();

    let login = reports.iter().find(|r| r.step == Step::Login).unwrap();
    assert!(matches!(login.outcome, StepOutcome::Skipped(_)));
    assert!(runner.call_for("docker login").is_none());
    assert!(runner.call_for("docker push").is_some());
}

#[tokio::test]
async fn test_require_login_refuses_fallback() {
    let runner = Arc::new(RecordingRunner::default().with("gh auth token", Scripted::Exit(1, "")));
    let mut options = ReleaseOptions::new("1.0.0");
    options.require_login = true;

    let err = pipeline(options, runner.clone()).run().await.unwrap_err();
    assert!(matches!(err, StackError::StepFailed { ref step, .. } if step == "login"));
    assert!(runner.call_for("docker push").is_none());
}

#[tokio::test]
async fn test_rejected_login_is_fatal() {
    let runner = Arc::new(token_runner().with("docker login", Scripted::Exit(1, "")));

    let err = pipeline(ReleaseOptions::new("1.0.0"), runner.clone())
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, StackError::StepFailed { code: Some(1), .. }));
    assert!(runner.call_for("docker push").is_none());
}

#[tokio::test]
async fn test_trigger_kargo_refreshes_warehouse() {
    let runner = Arc::new(token_runner());
    let mut options = ReleaseOptions::new("1.0.0");
    options.skip_build = true;
    options.trigger_kargo = true;

    let reports = pipeline(options, runner.clone()).run().await.unwrap();
    assert_eq!(reports.last().map(|r| r.step), Some(Step::TriggerKargo));

    let kargo = runner.call_for("kargo").unwrap();
    assert_eq!(
        kargo.args,
        vec!["refresh", "warehouse", "--project", "developer-portal", "developer-portal"]
    );
}

#[test]
fn test_overrides_change_tags() {
    let mut config = ReleaseConfig::default();
    config.apply(&ReleaseOverrides {
        registry: Some("registry.example.com".into()),
        owner: Some("team".into()),
        image: Some("portal".into()),
        ..Default::default()
    });
    assert_eq!(config.short_tag("3.1"), "portal:3.1");
    assert_eq!(config.full_tag("3.1"), "registry.example.com/team/portal:3.1");
    assert_eq!(config.warehouse, "developer-portal");
}

#[test]
fn test_invalid_version_rejected() {
    let runner = Arc::new(RecordingRunner::default());
    for bad in ["", "  ", "1.0 beta", "-rc", "v1/2"] {
        let result = ReleasePipeline::new(
            ReleaseConfig::default(),
            ReleaseOptions::new(bad),
            runner.clone(),
        );
        assert!(matches!(result, Err(StackError::Config(_))), "accepted {bad:?}");
    }
}

#[test]
fn test_release_config_from_toml() {
    let config: ReleaseConfig = toml::from_str(
        r#"
        owner = "acme"
        registry_user = "bot"
        compile_commands = ["make"]
        "#,
    )
    .unwrap();
    assert_eq!(config.registry, "ghcr.io");
    assert_eq!(config.login_user(), "bot");
    assert_eq!(config.compile_commands, vec!["make"]);
}

#[tokio::test]
async fn test_task_runner_fail_fast() {
    let runner = Arc::new(RecordingRunner::default().with("yarn tsc", Scripted::Exit(1, "")));
    let mut tasks = BTreeMap::new();
    tasks.insert(
        "build".to_string(),
        TaskSpec::new("Compile everything", ["yarn install", "yarn tsc", "yarn build"]),
    );

    let tasks = TaskRunner::new(tasks, runner.clone()).in_dir("/tmp");
    let err = tasks.run("build").await.unwrap_err();

    assert!(matches!(err, StackError::StepFailed { code: Some(1), .. }));
    assert_eq!(runner.lines(), vec!["yarn install", "yarn tsc"]);
    assert!(runner
        .calls
        .lock()
        .iter()
        .all(|c| c.cwd.as_deref() == Some(std::path::Path::new("/tmp"))));
}

#[tokio::test]
async fn test_unknown_task_lists_available() {
    let mut tasks = BTreeMap::new();
    tasks.insert("nx-graph".to_string(), TaskSpec::new("Graph", ["yarn nx graph"]));
    let tasks = TaskRunner::new(tasks, Arc::new(RecordingRunner::default()));

    let err = tasks.run("deploy").await.unwrap_err();
    assert!(matches!(err, StackError::Config(ref msg) if msg.contains("nx-graph")));
}

#[tokio::test]
async fn test_pipeline_runs_in_root_dir() {
    let runner = Arc::new(token_runner());
    let mut options = ReleaseOptions::new("1.0.0");
    options.skip_build = true;

    pipeline(options, runner.clone())
        .in_dir("/srv/portal")
        .run()
        .await
        .unwrap();

    let build = runner.call_for("docker image build").unwrap();
    assert_eq!(build.cwd.as_deref(), Some(std::path::Path::new("/srv/portal")));
    // the credential lookup is not tied to the checkout
    assert!(runner.call_for("gh auth token").unwrap().cwd.is_none());
}
