use serde::Serialize;
use stackup_types::{Signal, StackError, StackResult, TelemetryRecord};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::batcher::Batcher;
use super::exporter::{DiagnosticSink, Exporter, HttpExporter, LogSink};
use super::{framed, http};
use crate::config::TelemetryConfig;
use crate::supervisor::CancellationToken;

const CHANNEL_CAPACITY: usize = 8192;
const IDLE_WAKE: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
pub struct ForwarderStats {
    received: AtomicU64,
    rejected: AtomicU64,
    exported: AtomicU64,
    mirrored: AtomicU64,
    batches: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub exported: u64,
    pub mirrored: u64,
    pub batches: u64,
}

impl ForwarderStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            exported: self.exported.load(Ordering::Relaxed),
            mirrored: self.mirrored.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

/// Tags, batches and exports everything the endpoints hand it.
pub(crate) struct BatchPipeline {
    pub batcher: Batcher,
    pub tags: BTreeMap<String, String>,
    pub exporter: Arc<dyn Exporter>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
    pub stats: Arc<ForwarderStats>,
}

impl BatchPipeline {
    pub async fn run(mut self, mut records: mpsc::Receiver<TelemetryRecord>, mut cancel: CancellationToken) {
        loop {
            let wake = self
                .batcher
                .deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_WAKE);

            tokio::select! {
                received = records.recv() => match received {
                    Some(record) => self.accept(record).await,
                    None => break,
                },
                _ = tokio::time::sleep_until(wake), if self.batcher.deadline().is_some() => {
                    let batch = self.batcher.take();
                    debug!("Batch deadline reached with {} records", batch.len());
                    self.flush(batch).await;
                }
                _ = cancel.cancelled() => break,
            }
        }

        records.close();
        while let Ok(record) = records.try_recv() {
            self.accept(record).await;
        }
        if !self.batcher.is_empty() {
            info!("Flushing {} buffered records before shutdown", self.batcher.len());
            let batch = self.batcher.take();
            self.flush(batch).await;
        }
    }

    async fn accept(&mut self, mut record: TelemetryRecord) {
        record.apply_tags(&self.tags);
        if let Some(batch) = self.batcher.push(record) {
            debug!("Batch size limit reached ({} records)", batch.len());
            self.flush(batch).await;
        }
    }

    pub async fn flush(&self, batch: Vec<TelemetryRecord>) {
        if batch.is_empty() {
            return;
        }
        self.stats.batches.fetch_add(1, Ordering::Relaxed);

        let mut by_signal: BTreeMap<Signal, Vec<TelemetryRecord>> = BTreeMap::new();
        for record in batch {
            by_signal.entry(record.signal).or_default().push(record);
        }

        for (signal, records) in by_signal {
            match self.exporter.export(signal, &records).await {
                Ok(()) => {
                    self.stats
                        .exported
                        .fetch_add(records.len() as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Export of {} {} records failed: {}", records.len(), signal, e);
                    self.stats
                        .mirrored
                        .fetch_add(records.len() as u64, Ordering::Relaxed);
                    self.diagnostics.mirror(signal, &records, &e);
                }
            }
        }
    }
}

pub struct TelemetryForwarder {
    config: TelemetryConfig,
    tags: BTreeMap<String, String>,
    exporter: Arc<dyn Exporter>,
    diagnostics: Arc<dyn DiagnosticSink>,
    stats: Arc<ForwarderStats>,
}

impl TelemetryForwarder {
    pub fn new(config: TelemetryConfig) -> StackResult<Self> {
        config.validate()?;
        let tags = config.tags()?;
        let exporter = HttpExporter::new(&config.upstream, tags.clone(), config.export_timeout())?;

        Ok(Self {
            config,
            tags,
            exporter: Arc::new(exporter),
            diagnostics: Arc::new(LogSink),
            stats: Arc::new(ForwarderStats::default()),
        })
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn stats(&self) -> Arc<ForwarderStats> {
        self.stats.clone()
    }

    /// Binds both endpoints and starts relaying until `cancel` fires.
    pub async fn start(self, cancel: CancellationToken) -> StackResult<ForwarderHandle> {
        let framed_listener = TcpListener::bind(self.config.framed_listen)
            .await
            .map_err(|e| {
                StackError::Telemetry(format!(
                    "Failed to bind framed endpoint {}: {}",
                    self.config.framed_listen, e
                ))
            })?;
        let http_listener = TcpListener::bind(self.config.http_listen)
            .await
            .map_err(|e| {
                StackError::Telemetry(format!(
                    "Failed to bind HTTP endpoint {}: {}",
                    self.config.http_listen, e
                ))
            })?;

        let framed_addr = framed_listener
            .local_addr()
            .map_err(|e| StackError::Telemetry(format!("Failed to read framed address: {}", e)))?;
        let http_addr = http_listener
            .local_addr()
            .map_err(|e| StackError::Telemetry(format!("Failed to read HTTP address: {}", e)))?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut tasks = Vec::with_capacity(3);

        tasks.push(tokio::spawn(framed::serve(
            framed_listener,
            tx.clone(),
            self.stats.clone(),
            self.config.max_body_bytes,
            cancel.clone(),
        )));

        let app = http::router(
            http::IngestState {
                records: tx,
                stats: self.stats.clone(),
            },
            self.config.max_body_bytes,
        );
        let mut http_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let shutdown = async move { http_cancel.cancelled().await };
            if let Err(e) = axum::serve(http_listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("HTTP telemetry endpoint failed: {}", e);
            }
            info!("HTTP telemetry endpoint stopped");
        }));

        let pipeline = BatchPipeline {
            batcher: Batcher::new(self.config.batch_size, self.config.batch_timeout()),
            tags: self.tags.clone(),
            exporter: self.exporter.clone(),
            diagnostics: self.diagnostics.clone(),
            stats: self.stats.clone(),
        };
        tasks.push(tokio::spawn(pipeline.run(rx, cancel)));

        info!(
            "Telemetry forwarder listening on {} (framed) and {} (http), relaying to {}",
            framed_addr, http_addr, self.config.upstream
        );

        Ok(ForwarderHandle {
            framed_addr,
            http_addr,
            stats: self.stats,
            tasks,
        })
    }
}

pub struct ForwarderHandle {
    pub framed_addr: SocketAddr,
    pub http_addr: SocketAddr,
    stats: Arc<ForwarderStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl ForwarderHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Waits for the endpoints and the final flush after cancellation.
    pub async fn join(self) -> StatsSnapshot {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Telemetry task panicked: {}", e);
            }
        }
        self.stats.snapshot()
    }
}
