use async_trait::async_trait;
use stackup_release::install_hint;
use stackup_types::{PortBinding, Protocol, StackError, StackResult, DEFAULT_PORT_SETTLE_MS};
use std::fmt;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::process::Command;
use tracing::{debug, info, warn};

#[async_trait]
pub trait PortInspector: Send + Sync {
    /// PIDs currently bound to `binding`. An empty list is not an error.
    async fn pids_bound_to(&self, binding: &PortBinding) -> StackResult<Vec<u32>>;
}

/// Looks up listeners with `lsof -t`.
#[derive(Clone, Debug, Default)]
pub struct LsofInspector;

#[async_trait]
impl PortInspector for LsofInspector {
    async fn pids_bound_to(&self, binding: &PortBinding) -> StackResult<Vec<u32>> {
        let mut command = Command::new("lsof");
        command
            .arg("-t")
            .arg("-i")
            .arg(format!("{}:{}", binding.protocol, binding.port));
        if binding.protocol == Protocol::Tcp {
            command.arg("-sTCP:LISTEN");
        }

        let output = command.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StackError::tool_missing("lsof", install_hint("lsof"))
            } else {
                StackError::Port(format!("Failed to run lsof for {}: {}", binding, e))
            }
        })?;

        Ok(pids_from_output(binding, &output))
    }
}

/// lsof exits 1 both when nothing matches and when some lookups failed, so
/// whatever PIDs it printed are kept and the status is only logged.
fn pids_from_output(binding: &PortBinding, output: &Output) -> Vec<u32> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("lsof exited with {} for {}: {}", output.status, binding, stderr.trim());
        }
    }
    parse_pids(&String::from_utf8_lossy(&output.stdout))
}

fn parse_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KilledProcess {
    pub pid: u32,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ReclaimReport {
    pub ports: Vec<(PortBinding, Vec<KilledProcess>)>,
}

impl ReclaimReport {
    pub fn killed(&self) -> usize {
        self.ports.iter().map(|(_, killed)| killed.len()).sum()
    }
}

impl fmt::Display for ReclaimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (binding, killed) in &self.ports {
            if !first {
                write!(f, "; ")?;
            }
            first = false;

            if killed.is_empty() {
                write!(f, "{} free", binding)?;
                continue;
            }
            let names: Vec<String> = killed
                .iter()
                .map(|k| match k.name {
                    Some(ref name) => format!("{} ({})", k.pid, name),
                    None => k.pid.to_string(),
                })
                .collect();
            write!(f, "{} killed {}", binding, names.join(", "))?;
        }
        Ok(())
    }
}

/// Frees ports before a process binds them by killing whatever holds them.
pub struct PortReconciler {
    inspector: Arc<dyn PortInspector>,
    settle: Duration,
}

impl PortReconciler {
    pub fn new(inspector: Arc<dyn PortInspector>) -> Self {
        Self {
            inspector,
            settle: Duration::from_millis(DEFAULT_PORT_SETTLE_MS),
        }
    }

    pub fn lsof() -> Self {
        Self::new(Arc::new(LsofInspector))
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Best effort: lookup and kill failures are logged, never returned.
    pub async fn reclaim(&self, bindings: &[PortBinding]) -> StackResult<ReclaimReport> {
        let own_pid = std::process::id();
        let mut report = ReclaimReport::default();
        let mut system = System::new();

        for binding in bindings {
            let pids = match self.inspector.pids_bound_to(binding).await {
                Ok(pids) => pids,
                Err(e) if e.is_tool_missing() => {
                    warn!("{} Treating port {} as free.", e, binding);
                    report.ports.push((*binding, Vec::new()));
                    continue;
                }
                Err(e) => {
                    warn!("Could not inspect port {}: {}", binding, e);
                    report.ports.push((*binding, Vec::new()));
                    continue;
                }
            };

            let mut killed = Vec::new();
            for pid in pids {
                if pid == own_pid {
                    debug!("Port {} is held by this process, leaving it", binding);
                    continue;
                }

                let name = process_name(&mut system, pid);
                if kill_pid(pid, binding) {
                    info!(
                        "Killed pid {} ({}) holding port {}",
                        pid,
                        name.as_deref().unwrap_or("unknown"),
                        binding
                    );
                    killed.push(KilledProcess { pid, name });
                }
            }
            report.ports.push((*binding, killed));
        }

        if report.killed() > 0 && !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        Ok(report)
    }
}

fn process_name(system: &mut System, pid: u32) -> Option<String> {
    let pid = Pid::from_u32(pid);
    system.refresh_process(pid);
    system.process(pid).map(|p| p.name().to_string())
}

#[cfg(unix)]
fn kill_pid(pid: u32, binding: &PortBinding) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => true,
        Err(Errno::ESRCH) => {
            debug!("pid {} on {} already exited", pid, binding);
            false
        }
        Err(e) => {
            warn!("Failed to kill pid {} holding {}: {}", pid, binding, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_pid(pid: u32, binding: &PortBinding) -> bool {
    warn!("Cannot kill pid {} holding {} on this platform", pid, binding);
    false
}

/// True when nothing on this host is listening on the port.
pub fn port_is_free(binding: &PortBinding) -> bool {
    match binding.protocol {
        Protocol::Tcp => std::net::TcpListener::bind(("0.0.0.0", binding.port)).is_ok(),
        Protocol::Udp => std::net::UdpSocket::bind(("0.0.0.0", binding.port)).is_ok(),
    }
}
