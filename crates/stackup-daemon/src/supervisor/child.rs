use stackup_types::ProcessSpec;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::cancellation::CancellationToken;
use super::types::{Event, LogLine, LogStream};
use crate::ports::PortReconciler;

const LOG_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) struct ChildContext {
    pub spec: ProcessSpec,
    pub shell: String,
    pub env: BTreeMap<String, String>,
    pub root_dir: PathBuf,
    pub grace: Duration,
    pub reconciler: Option<Arc<PortReconciler>>,
    pub events: mpsc::UnboundedSender<Event>,
    pub logs: broadcast::Sender<LogLine>,
}

pub(crate) async fn run_child(ctx: ChildContext, mut stop: CancellationToken) {
    let name = ctx.spec.name.clone();

    if let Some(ref reconciler) = ctx.reconciler {
        if !ctx.spec.ports.is_empty() {
            match reconciler.reclaim(&ctx.spec.ports).await {
                Ok(report) if report.killed() > 0 => {
                    info!("[{}] reclaimed ports: {}", name, report)
                }
                Ok(_) => {}
                Err(e) => warn!("[{}] port reclaim failed, starting anyway: {}", name, e),
            }
        }
    }

    if stop.is_cancelled() {
        let _ = ctx.events.send(Event::SpawnFailed {
            name,
            error: "cancelled before start".to_string(),
        });
        return;
    }

    let mut child = match spawn(&ctx) {
        Ok(child) => child,
        Err(e) => {
            let _ = ctx.events.send(Event::SpawnFailed {
                name,
                error: format!("Failed to spawn '{}': {}", ctx.spec.command, e),
            });
            return;
        }
    };

    let pid = child.id();
    let _ = ctx.events.send(Event::Started {
        name: name.clone(),
        pid,
        at: Instant::now(),
    });

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(pump(name.clone(), LogStream::Stdout, stdout, ctx.logs.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(pump(name.clone(), LogStream::Stderr, stderr, ctx.logs.clone()));
    }

    let code = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("[{}] failed to wait for child: {}", name, e);
                None
            }
        },
        _ = stop.cancelled() => terminate(&name, &mut child, pid, ctx.grace).await,
    };

    let drained = tokio::time::timeout(LOG_DRAIN_TIMEOUT, futures::future::join_all(pumps)).await;
    if drained.is_err() {
        debug!("[{}] output still open after exit (background grandchild?)", name);
    }

    let _ = ctx.events.send(Event::Exited {
        name,
        code,
        at: Instant::now(),
    });
}

fn spawn(ctx: &ChildContext) -> std::io::Result<Child> {
    let mut command = Command::new(&ctx.shell);
    command
        .arg("-c")
        .arg(&ctx.spec.command)
        .envs(&ctx.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let dir = match ctx.spec.working_dir {
        Some(ref dir) if dir.is_absolute() => dir.clone(),
        Some(ref dir) => ctx.root_dir.join(dir),
        None => ctx.root_dir.clone(),
    };
    command.current_dir(dir);

    #[cfg(unix)]
    command.process_group(0);

    command.spawn()
}

fn pump<R>(
    process: String,
    stream: LogStream,
    reader: R,
    logs: broadcast::Sender<LogLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    match stream {
                        LogStream::Stdout => info!("[{}] {}", process, line),
                        LogStream::Stderr => info!("[{}!] {}", process, line),
                    }
                    let _ = logs.send(LogLine {
                        process: process.clone(),
                        stream,
                        line,
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("[{}] output stream closed: {}", process, e);
                    break;
                }
            }
        }
    })
}

/// SIGTERM to the child's process group, SIGKILL after `grace`.
async fn terminate(name: &str, child: &mut Child, pid: Option<u32>, grace: Duration) -> Option<i32> {
    info!("[{}] stopping", name);

    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("[{}] SIGTERM to group {} failed: {}", name, pid, e);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(e)) => {
            warn!("[{}] failed to wait for child: {}", name, e);
            None
        }
        Err(_) => {
            warn!("[{}] did not exit within {:?}, killing", name, grace);
            #[cfg(unix)]
            if let Some(pid) = pid {
                use nix::sys::signal::{killpg, Signal};
                use nix::unistd::Pid;
                let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
            if let Err(e) = child.kill().await {
                debug!("[{}] kill failed: {}", name, e);
            }
            None
        }
    }
}
