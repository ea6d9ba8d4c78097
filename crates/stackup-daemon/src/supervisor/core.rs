use parking_lot::RwLock;
use stackup_types::{CompletionCondition, Dependency, ProcessSpec};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::cancellation::{CancelHandle, CancellationToken};
use super::child::{run_child, ChildContext};
use super::graph::ProcessGraph;
use super::types::*;
use crate::config::SupervisorConfig;
use crate::ports::PortReconciler;
use crate::readiness::{ReadinessGate, ReadinessOutcome};

const LOG_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Satisfied,
    Waiting,
    Unsatisfiable(String),
}

fn evaluate(dep: &Dependency, outcome: &ProcessOutcome) -> Verdict {
    let met = match dep.condition {
        CompletionCondition::ProcessCompletedSuccessfully => {
            outcome.status == ProcessStatus::Completed
        }
        CompletionCondition::ProcessCompleted => outcome.exited_at.is_some(),
        CompletionCondition::ProcessStarted => outcome.started_at.is_some(),
        CompletionCondition::ProcessHealthy => outcome.ready,
    };

    if met {
        Verdict::Satisfied
    } else if outcome.status.is_terminal() {
        Verdict::Unsatisfiable(format!(
            "dependency '{}' {} ({} required)",
            dep.name, outcome.status, dep.condition
        ))
    } else {
        Verdict::Waiting
    }
}

/// Runs a [`ProcessGraph`] to completion: starts each process once its
/// dependencies are satisfied, skips it when they never can be.
pub struct Supervisor {
    graph: ProcessGraph,
    config: SupervisorConfig,
    root_dir: PathBuf,
    telemetry_env: BTreeMap<String, String>,
    reconciler: Option<Arc<PortReconciler>>,
    outcomes: Arc<RwLock<HashMap<String, ProcessOutcome>>>,
    cancelled: AtomicBool,
    logs: broadcast::Sender<LogLine>,
}

struct RunState {
    events: mpsc::UnboundedSender<Event>,
    children: HashMap<String, CancelHandle>,
    gates: HashMap<String, CancelHandle>,
    shutting_down: bool,
}

impl RunState {
    fn in_flight(&self) -> bool {
        !self.children.is_empty() || !self.gates.is_empty()
    }
}

impl Supervisor {
    pub fn new(graph: ProcessGraph, config: SupervisorConfig) -> Self {
        let outcomes = graph
            .specs()
            .iter()
            .map(|s| (s.name.clone(), ProcessOutcome::pending(&s.name)))
            .collect();
        let (logs, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);

        Self {
            graph,
            config,
            root_dir: PathBuf::from("."),
            telemetry_env: BTreeMap::new(),
            reconciler: None,
            outcomes: Arc::new(RwLock::new(outcomes)),
            cancelled: AtomicBool::new(false),
            logs,
        }
    }

    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    /// Variables injected into every process with `telemetry = true`.
    pub fn with_telemetry_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.telemetry_env = env;
        self
    }

    pub fn with_port_reconciler(mut self, reconciler: Arc<PortReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn graph(&self) -> &ProcessGraph {
        &self.graph
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogLine> {
        self.logs.subscribe()
    }

    pub fn outcome(&self, name: &str) -> Option<ProcessOutcome> {
        self.outcomes.read().get(name).cloned()
    }

    pub fn report(&self) -> SupervisorReport {
        let outcomes = self.outcomes.read();
        SupervisorReport {
            outcomes: self
                .graph
                .start_order()
                .filter_map(|s| outcomes.get(&s.name).cloned())
                .collect(),
            cancelled: self.cancelled.load(Ordering::SeqCst),
        }
    }

    pub async fn run(&self, mut cancel: CancellationToken) -> SupervisorReport {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut state = RunState {
            events: events_tx,
            children: HashMap::new(),
            gates: HashMap::new(),
            shutting_down: false,
        };

        info!("Starting {} processes", self.graph.len());
        self.schedule(&mut state);

        while state.in_flight() {
            tokio::select! {
                _ = cancel.cancelled(), if !state.shutting_down => {
                    self.begin_shutdown(&mut state);
                }
                Some(event) = events.recv() => {
                    self.handle_event(event, &mut state);
                    if !state.shutting_down {
                        self.schedule(&mut state);
                    }
                }
            }
        }

        self.skip_pending("dependencies can no longer be satisfied");

        let report = self.report();
        info!(
            "Supervisor finished: {} ok, {} failed, {} skipped{}",
            report
                .outcomes
                .iter()
                .filter(|o| matches!(o.status, ProcessStatus::Completed | ProcessStatus::Stopped))
                .count(),
            report.failed().count(),
            report.skipped().count(),
            if report.cancelled { " (stopped by operator)" } else { "" }
        );
        report
    }

    fn begin_shutdown(&self, state: &mut RunState) {
        info!(
            "Shutdown requested, stopping {} running processes",
            state.children.len()
        );
        state.shutting_down = true;
        self.cancelled.store(true, Ordering::SeqCst);

        for handle in state.children.values().chain(state.gates.values()) {
            handle.cancel();
        }
        self.skip_pending("supervisor shutting down");
    }

    fn skip_pending(&self, reason: &str) {
        let mut outcomes = self.outcomes.write();
        for outcome in outcomes.values_mut() {
            if outcome.status == ProcessStatus::Pending {
                outcome.status = ProcessStatus::Skipped {
                    reason: reason.to_string(),
                };
            }
        }
    }

    fn handle_event(&self, event: Event, state: &mut RunState) {
        match event {
            Event::Started { name, pid, at } => {
                {
                    let mut outcomes = self.outcomes.write();
                    if let Some(outcome) = outcomes.get_mut(&name) {
                        outcome.status = ProcessStatus::Running;
                        outcome.pid = pid;
                        outcome.started_at = Some(at);
                    }
                }
                info!(
                    "Started '{}' (pid {})",
                    name,
                    pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into())
                );

                if !state.shutting_down {
                    if let Some(spec) = self.graph.spec(&name) {
                        if spec.readiness.is_some() {
                            self.spawn_gate(spec, state);
                        }
                    }
                }
            }
            Event::SpawnFailed { name, error } => {
                state.children.remove(&name);
                let mut outcomes = self.outcomes.write();
                if let Some(outcome) = outcomes.get_mut(&name) {
                    if state.shutting_down {
                        outcome.status = ProcessStatus::Skipped {
                            reason: "supervisor shutting down".to_string(),
                        };
                    } else {
                        error!("Process '{}' could not start: {}", name, error);
                        outcome.status = ProcessStatus::Failed { code: None };
                        outcome.error = Some(error);
                    }
                }
            }
            Event::Exited { name, code, at } => {
                state.children.remove(&name);
                if let Some(gate) = state.gates.get(&name) {
                    gate.cancel();
                }

                let mut outcomes = self.outcomes.write();
                if let Some(outcome) = outcomes.get_mut(&name) {
                    outcome.exited_at = Some(at);
                    outcome.status = if state.shutting_down {
                        info!("Process '{}' stopped", name);
                        ProcessStatus::Stopped
                    } else if code == Some(0) {
                        info!("Process '{}' completed successfully", name);
                        ProcessStatus::Completed
                    } else {
                        match code {
                            Some(code) => error!("Process '{}' exited with code {}", name, code),
                            None => error!("Process '{}' was terminated by a signal", name),
                        }
                        ProcessStatus::Failed { code }
                    };
                }
            }
            Event::Ready { name, attempts } => {
                state.gates.remove(&name);
                let mut outcomes = self.outcomes.write();
                if let Some(outcome) = outcomes.get_mut(&name) {
                    if outcome.exited_at.is_none() {
                        outcome.ready = true;
                        info!("Process '{}' is healthy after {} probes", name, attempts);
                    }
                }
            }
            Event::GateCancelled { name } => {
                state.gates.remove(&name);
                debug!("Readiness polling for '{}' stopped", name);
            }
        }
    }

    fn spawn_gate(&self, spec: &ProcessSpec, state: &mut RunState) {
        let Some(check) = spec.readiness.clone() else {
            return;
        };

        let (handle, token) = CancellationToken::new();
        let gate = ReadinessGate::new(&spec.name, check);
        let events = state.events.clone();
        let name = spec.name.clone();

        tokio::spawn(async move {
            let event = match gate.wait(token).await {
                ReadinessOutcome::Ready { attempts } => Event::Ready { name, attempts },
                ReadinessOutcome::Cancelled { .. } => Event::GateCancelled { name },
            };
            let _ = events.send(event);
        });

        state.gates.insert(spec.name.clone(), handle);
    }

    /// Walks the graph in start order so a skip cascades to later
    /// dependents within the same pass.
    fn schedule(&self, state: &mut RunState) {
        let mut to_start = Vec::new();

        {
            let mut outcomes = self.outcomes.write();
            for spec in self.graph.start_order() {
                let pending = outcomes
                    .get(&spec.name)
                    .map(|o| o.status == ProcessStatus::Pending)
                    .unwrap_or(false);
                if !pending {
                    continue;
                }

                let mut verdict = Verdict::Satisfied;
                for dep in &spec.depends_on {
                    let Some(dep_outcome) = outcomes.get(&dep.name) else {
                        continue;
                    };
                    match evaluate(dep, dep_outcome) {
                        Verdict::Satisfied => {}
                        Verdict::Waiting => verdict = Verdict::Waiting,
                        unsatisfiable => {
                            verdict = unsatisfiable;
                            break;
                        }
                    }
                }

                match verdict {
                    Verdict::Satisfied => {
                        if let Some(outcome) = outcomes.get_mut(&spec.name) {
                            outcome.status = ProcessStatus::Starting;
                        }
                        to_start.push(spec.clone());
                    }
                    Verdict::Waiting => {}
                    Verdict::Unsatisfiable(reason) => {
                        warn!("Not starting '{}': {}", spec.name, reason);
                        if let Some(outcome) = outcomes.get_mut(&spec.name) {
                            outcome.status = ProcessStatus::Skipped { reason };
                        }
                    }
                }
            }
        }

        for spec in to_start {
            self.start(spec, state);
        }
    }

    fn start(&self, spec: ProcessSpec, state: &mut RunState) {
        let mut env = BTreeMap::new();
        if spec.telemetry {
            env.extend(self.telemetry_env.clone());
        }
        env.extend(spec.env.clone());

        debug!("Launching '{}': {}", spec.name, spec.command);

        let (handle, token) = CancellationToken::new();
        state.children.insert(spec.name.clone(), handle);

        let ctx = ChildContext {
            spec,
            shell: self.config.shell.clone(),
            env,
            root_dir: self.root_dir.clone(),
            grace: self.config.shutdown_grace(),
            reconciler: self.reconciler.clone(),
            events: state.events.clone(),
            logs: self.logs.clone(),
        };
        tokio::spawn(run_child(ctx, token));
    }
}
