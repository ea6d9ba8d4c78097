use super::commands::Cli;
use stackup_daemon::{LoggingConfig, ProcessStatus, SupervisorReport};
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const OK: &str = "\x1b[38;5;46m[+]\x1b[0m";
pub const WARN: &str = "\x1b[38;5;226m[~]\x1b[0m";
pub const FAIL: &str = "\x1b[38;5;196m[-]\x1b[0m";

/// Filter directive for the CLI flags, falling back to the stack file level.
pub fn log_directive(cli: &Cli, config: &LoggingConfig) -> String {
    if cli.quiet {
        return "warn".to_string();
    }
    match cli.verbose {
        0 => config.level.to_string(),
        1 => "info,stackup_daemon=debug,stackup_release=debug".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

pub fn init_logging(cli: &Cli, config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(cli, config)));

    let json = cli.log_json || config.json;
    let file = cli
        .log_file
        .as_ref()
        .or(config.file.as_ref())
        .and_then(|path| {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    eprintln!("Failed to open log file {:?}, logging to stdout: {}", path, e);
                    None
                }
            }
        });

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match (file, json) {
        (Some(file), true) => fmt::layer().json().with_writer(Mutex::new(file)).boxed(),
        (Some(file), false) => fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .boxed(),
        (None, true) => fmt::layer().json().boxed(),
        (None, false) => fmt::layer().with_target(cli.verbose >= 2).boxed(),
    };

    tracing_subscriber::registry().with(layer).with(env_filter).init();
}

pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => { info!("Received SIGTERM"); }
                    _ = sigint.recv() => { info!("Received SIGINT"); }
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers, falling back to Ctrl+C: {}", e);
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

pub fn print_report(report: &SupervisorReport) {
    println!();
    println!("\x1b[38;5;245m{}\x1b[0m", "═".repeat(50));
    for outcome in &report.outcomes {
        let mark = match outcome.status {
            ProcessStatus::Completed | ProcessStatus::Stopped => OK,
            ProcessStatus::Skipped { .. } => WARN,
            _ => FAIL,
        };
        match outcome.error {
            Some(ref e) => println!("{} {:<16} {} ({})", mark, outcome.name, outcome.status, e),
            None => println!("{} {:<16} {}", mark, outcome.name, outcome.status),
        }
    }
    println!("\x1b[38;5;245m{}\x1b[0m", "═".repeat(50));
}

pub fn show_version() {
    println!("stackup {}", BUILD_VERSION);
    println!(
        "  telemetry ingest: framed :{} / http :{}",
        stackup_types::DEFAULT_OTLP_GRPC_PORT,
        stackup_types::DEFAULT_OTLP_HTTP_PORT
    );
}
