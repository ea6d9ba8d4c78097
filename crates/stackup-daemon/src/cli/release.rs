use super::utils::{OK, WARN};
use stackup_daemon::StackConfig;
use stackup_release::{
    ProcessRunner, ReleaseOptions, ReleaseOverrides, ReleasePipeline, StepOutcome, TaskRunner,
};
use stackup_types::StackResult;
use std::sync::Arc;

pub async fn run_build_push(
    config: &StackConfig,
    overrides: ReleaseOverrides,
    options: ReleaseOptions,
) -> StackResult<()> {
    let mut release = config.release.clone();
    release.apply(&overrides);

    let pipeline = ReleasePipeline::new(release, options, Arc::new(ProcessRunner))?
        .in_dir(&config.root_dir);
    let reports = pipeline.run().await?;

    println!();
    for report in &reports {
        match report.outcome {
            StepOutcome::Done => {
                println!("{} {:<14} {:.1?}", OK, report.step.to_string(), report.elapsed)
            }
            StepOutcome::Skipped(ref reason) => {
                println!("{} {:<14} skipped: {}", WARN, report.step.to_string(), reason)
            }
        }
    }
    println!("Pushed {}", pipeline.full_tag());
    Ok(())
}

pub async fn run_task(config: &StackConfig, name: &str) -> StackResult<()> {
    TaskRunner::new(config.tasks.clone(), Arc::new(ProcessRunner))
        .in_dir(&config.root_dir)
        .run(name)
        .await
}
