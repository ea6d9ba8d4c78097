use super::utils::{print_report, wait_for_shutdown};
use stackup_daemon::{
    CancellationToken, ForwarderHandle, PortReconciler, ProcessGraph, StackConfig, Supervisor,
    TelemetryConfig, TelemetryForwarder,
};
use stackup_types::StackResult;
use std::sync::Arc;
use tracing::info;

/// Runs the stack until every process has exited or the operator stops it.
/// Returns the process exit code to report.
pub async fn run_up(config: StackConfig, only: Vec<String>, no_telemetry: bool) -> StackResult<i32> {
    let mut graph = ProcessGraph::new(config.processes.clone())?;
    if !only.is_empty() {
        graph = graph.select(&only)?;
        info!(
            "Starting {} of {} processes",
            graph.len(),
            config.processes.len()
        );
    }

    let reconciler = Arc::new(PortReconciler::lsof().with_settle(config.supervisor.port_settle()));

    let telemetry = config.telemetry.enabled && !no_telemetry;
    let (forwarder_stop, forwarder_token) = CancellationToken::new();
    let forwarder = if telemetry {
        Some(start_forwarder(&config.telemetry, &reconciler, forwarder_token).await?)
    } else {
        info!("Telemetry forwarding disabled");
        None
    };

    let mut supervisor = Supervisor::new(graph, config.supervisor.clone())
        .with_root_dir(&config.root_dir)
        .with_port_reconciler(reconciler);

    if let Some(ref handle) = forwarder {
        let mut env = config.telemetry.child_env();
        env.insert(
            "OTEL_EXPORTER_OTLP_ENDPOINT".to_string(),
            format!("http://{}", handle.http_addr),
        );
        supervisor = supervisor.with_telemetry_env(env);
    }

    let (stop, stop_token) = CancellationToken::new();
    let signals = tokio::spawn(async move {
        wait_for_shutdown().await;
        stop.cancel();
    });

    let report = supervisor.run(stop_token).await;
    signals.abort();

    forwarder_stop.cancel();
    if let Some(handle) = forwarder {
        let stats = handle.join().await;
        info!(
            "Telemetry forwarder relayed {} records ({} mirrored locally, {} rejected)",
            stats.exported, stats.mirrored, stats.rejected
        );
    }

    print_report(&report);
    Ok(report.exit_code())
}

/// Frees the forwarder's listen ports from leftover holders, then binds them.
async fn start_forwarder(
    telemetry: &TelemetryConfig,
    reconciler: &PortReconciler,
    token: CancellationToken,
) -> StackResult<ForwarderHandle> {
    let ports = telemetry.listen_ports();
    if !ports.is_empty() {
        let report = reconciler.reclaim(&ports).await?;
        if report.killed() > 0 {
            info!("{}", report);
        }
    }

    TelemetryForwarder::new(telemetry.clone())?.start(token).await
}
