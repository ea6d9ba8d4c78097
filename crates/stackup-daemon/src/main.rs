mod cli;

use clap::Parser;
use cli::{
    handle_config, init_logging, reclaim_ports, run_build_push, run_checks, run_forwarder,
    run_task, run_up, show_version, Cli, Commands,
};
use stackup_daemon::{LoggingConfig, StackConfig};
use stackup_release::{ReleaseOptions, ReleaseOverrides};
use stackup_types::StackResult;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    // Logging settings come from the stack file; a broken file is reported
    // by the command itself once logging is up.
    let loaded = StackConfig::load(&cli.config);
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_else(|_| LoggingConfig::default());
    init_logging(&cli, &logging);

    match execute(cli, loaded).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(exit_byte(code)),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(exit_byte(e.exit_code()))
        }
    }
}

fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).ok().filter(|&c| c != 0).unwrap_or(1)
}

async fn execute(cli: Cli, loaded: StackResult<StackConfig>) -> StackResult<i32> {
    match cli.command {
        Commands::Up { only, no_telemetry } => {
            return run_up(loaded?, only, no_telemetry).await;
        }
        Commands::Forward => {
            run_forwarder(loaded?).await?;
        }
        Commands::Build => run_task(&loaded?, "build").await?,
        Commands::BuildBackend => run_task(&loaded?, "build-backend").await?,
        Commands::DockerBuild => run_task(&loaded?, "docker-build").await?,
        Commands::DockerRun => run_task(&loaded?, "docker-run").await?,
        Commands::NxGraph => run_task(&loaded?, "nx-graph").await?,
        Commands::BuildPush {
            trigger_kargo,
            skip_build,
            require_login,
            registry,
            owner,
            image,
            warehouse,
            namespace,
            tag,
        } => {
            let overrides = ReleaseOverrides {
                registry,
                owner,
                image,
                warehouse,
                namespace,
            };
            let options = ReleaseOptions {
                version: tag,
                skip_build,
                trigger_kargo,
                require_login,
            };
            run_build_push(&loaded?, overrides, options).await?;
        }
        Commands::Reclaim { ports, udp } => {
            reclaim_ports(&loaded?, ports, udp).await?;
        }
        Commands::Check => {
            run_checks(&loaded?)?;
        }
        Commands::Config { action } => {
            handle_config(&cli.config, action)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(0)
}
