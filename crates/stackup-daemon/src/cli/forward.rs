use super::utils::wait_for_shutdown;
use stackup_daemon::{CancellationToken, StackConfig, TelemetryForwarder};
use stackup_types::{StackError, StackResult};
use tracing::info;

pub async fn run_forwarder(config: StackConfig) -> StackResult<()> {
    if !config.telemetry.enabled {
        return Err(StackError::Config(
            "Telemetry is disabled in the stack file ([telemetry] enabled = false)".into(),
        ));
    }

    let (stop, token) = CancellationToken::new();
    let handle = TelemetryForwarder::new(config.telemetry.clone())?
        .start(token)
        .await?;

    println!("Framed ingest: {}", handle.framed_addr);
    println!("HTTP ingest:   http://{}", handle.http_addr);
    println!("Upstream:      {}", config.telemetry.upstream);
    println!("Press Ctrl+C to stop");

    wait_for_shutdown().await;
    info!("Shutting down telemetry forwarder...");
    stop.cancel();

    let stats = handle.join().await;
    println!(
        "Received {}, exported {}, mirrored {}, rejected {} in {} batches",
        stats.received, stats.exported, stats.mirrored, stats.rejected, stats.batches
    );
    Ok(())
}
