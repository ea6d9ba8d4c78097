use super::batcher::Batcher;
use super::forwarder::BatchPipeline;
use super::*;
use crate::config::TelemetryConfig;
use crate::supervisor::CancellationToken;
use async_trait::async_trait;
use futures::SinkExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use stackup_types::{RecordBody, RecordSource, Signal, StackError, StackResult, TelemetryRecord};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};

#[derive(Default)]
struct RecordingExporter {
    batches: Mutex<Vec<(Signal, Vec<TelemetryRecord>)>>,
    fail: bool,
}

impl RecordingExporter {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(|(_, r)| r.len()).collect()
    }

    fn records(&self) -> Vec<TelemetryRecord> {
        self.batches
            .lock()
            .iter()
            .flat_map(|(_, r)| r.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl Exporter for RecordingExporter {
    async fn export(&self, signal: Signal, records: &[TelemetryRecord]) -> StackResult<()> {
        if self.fail {
            return Err(StackError::Network("connection refused".into()));
        }
        self.batches.lock().push((signal, records.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    mirrored: Mutex<Vec<(Signal, usize)>>,
}

impl DiagnosticSink for RecordingSink {
    fn mirror(&self, signal: Signal, records: &[TelemetryRecord], _error: &StackError) {
        self.mirrored.lock().push((signal, records.len()));
    }
}

fn tags() -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("deployment.environment".to_string(), "local".to_string());
    tags.insert("service.name".to_string(), "developer-portal".to_string());
    tags
}

fn log_record(n: usize) -> TelemetryRecord {
    TelemetryRecord::new(
        Signal::Logs,
        RecordSource::Http,
        RecordBody::Json(json!({ "n": n })),
    )
}

struct Harness {
    tx: mpsc::Sender<TelemetryRecord>,
    exporter: Arc<RecordingExporter>,
    sink: Arc<RecordingSink>,
    stats: Arc<ForwarderStats>,
    cancel: crate::supervisor::CancelHandle,
    task: tokio::task::JoinHandle<()>,
}

fn pipeline(exporter: RecordingExporter) -> Harness {
    let exporter = Arc::new(exporter);
    let sink = Arc::new(RecordingSink::default());
    let stats = Arc::new(ForwarderStats::default());
    let (tx, rx) = mpsc::channel(4096);
    let (cancel, token) = CancellationToken::new();

    let pipeline = BatchPipeline {
        batcher: Batcher::new(1000, Duration::from_secs(5)),
        tags: tags(),
        exporter: exporter.clone(),
        diagnostics: sink.clone(),
        stats: stats.clone(),
    };
    let task = tokio::spawn(pipeline.run(rx, token));

    Harness {
        tx,
        exporter,
        sink,
        stats,
        cancel,
        task,
    }
}

#[tokio::test(start_paused = true)]
async fn test_size_threshold_flushes_immediately() {
    let h = pipeline(RecordingExporter::default());

    for n in 0..1001 {
        h.tx.send(log_record(n)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(h.exporter.batch_sizes(), vec![1000]);
    assert!(h.exporter.records().iter().all(|r| r.has_tags(&tags())));

    // the leftover record waits for its own deadline
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.exporter.batch_sizes(), vec![1000, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_time_threshold_flushes_partial_batch() {
    let h = pipeline(RecordingExporter::default());

    for n in 0..3 {
        h.tx.send(log_record(n)).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert!(h.exporter.batch_sizes().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.exporter.batch_sizes(), vec![3]);

    let records = h.exporter.records();
    assert!(records.iter().all(|r| r.has_tags(&tags())));
    assert_eq!(h.stats.snapshot().exported, 3);
}

#[tokio::test(start_paused = true)]
async fn test_batches_split_by_signal() {
    let h = pipeline(RecordingExporter::default());

    h.tx.send(log_record(0)).await.unwrap();
    h.tx
        .send(TelemetryRecord::new(
            Signal::Traces,
            RecordSource::Framed,
            RecordBody::Binary(vec![1, 2, 3]),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;

    let batches = h.exporter.batches.lock();
    let signals: Vec<Signal> = batches.iter().map(|(s, _)| *s).collect();
    assert_eq!(signals, vec![Signal::Traces, Signal::Logs]);
    assert_eq!(h.stats.snapshot().batches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_upstream_mirrors_locally() {
    let h = pipeline(RecordingExporter::failing());

    for n in 0..4 {
        h.tx.send(log_record(n)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(*h.sink.mirrored.lock(), vec![(Signal::Logs, 4)]);
    let stats = h.stats.snapshot();
    assert_eq!(stats.mirrored, 4);
    assert_eq!(stats.exported, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_buffer_once() {
    let h = pipeline(RecordingExporter::default());

    for n in 0..7 {
        h.tx.send(log_record(n)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.cancel.cancel();
    h.task.await.unwrap();

    assert_eq!(h.exporter.batch_sizes(), vec![7]);
}

#[test]
fn test_decode_frame() {
    let frame = encode_frame(Signal::Metrics, br#"{"name":"cpu"}"#);
    let record = assert_ok!(decode_frame(&frame));
    assert_eq!(record.signal, Signal::Metrics);
    assert_eq!(record.source, RecordSource::Framed);
    assert_eq!(record.body, RecordBody::Json(json!({ "name": "cpu" })));

    let raw = decode_frame(&encode_frame(Signal::Traces, &[0x0a, 0xff])).unwrap();
    assert_eq!(raw.body, RecordBody::Binary(vec![0x0a, 0xff]));

    assert_err!(decode_frame(&[]));
    assert_err!(decode_frame(&[9, b'{', b'}']));
}

fn local_config(batch_size: usize) -> TelemetryConfig {
    TelemetryConfig {
        framed_listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        http_listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        batch_size,
        batch_timeout_secs: 60,
        resource_attributes: "deployment.environment=local".to_string(),
        service_name: "developer-portal".to_string(),
        ..TelemetryConfig::default()
    }
}

async fn wait_for_records(exporter: &RecordingExporter, count: usize) -> Vec<TelemetryRecord> {
    for _ in 0..100 {
        let records = exporter.records();
        if records.len() >= count {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("expected {} exported records, got {}", count, exporter.records().len());
}

#[tokio::test]
async fn test_http_endpoint_end_to_end() {
    let exporter = Arc::new(RecordingExporter::default());
    let forwarder = TelemetryForwarder::new(local_config(3))
        .unwrap()
        .with_exporter(exporter.clone());
    let (cancel, token) = CancellationToken::new();
    let handle = forwarder.start(token).await.unwrap();
    let base = format!("http://{}", handle.http_addr);
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let response = client
        .post(format!("{}/v1/logs", base))
        .json(&json!([{ "body": "a" }, { "body": "b" }]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 202);
    let accepted: Value = response.json().await.unwrap();
    assert_eq!(accepted["accepted"], 2);

    let response = client
        .post(format!("{}/v1/traces", base))
        .json(&json!({ "spanId": "abc", "attributes": { "service.name": "spoofed" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 202);

    let unknown = client
        .post(format!("{}/v1/profiles", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status().as_u16(), 404);

    let invalid = client
        .post(format!("{}/v1/logs", base))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status().as_u16(), 400);

    let records = wait_for_records(&exporter, 3).await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.source == RecordSource::Http));
    assert!(records.iter().all(|r| r.has_tags(&tags())));

    cancel.cancel();
    let stats = handle.join().await;
    assert_eq!(stats.received, 3);
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn test_http_body_limit_follows_config() {
    let exporter = Arc::new(RecordingExporter::default());
    let config = local_config(1);
    let limit = config.max_body_bytes;
    let forwarder = TelemetryForwarder::new(config)
        .unwrap()
        .with_exporter(exporter.clone());
    let (cancel, token) = CancellationToken::new();
    let handle = forwarder.start(token).await.unwrap();
    let url = format!("http://{}/v1/logs", handle.http_addr);
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    // larger than axum's 2 MiB extractor default, under the configured 4 MiB
    let payload = serde_json::to_vec(&json!({ "body": "x".repeat(3 * 1024 * 1024) })).unwrap();
    assert!(payload.len() < limit);
    let response = client
        .post(&url)
        .header("content-type", "application/json")
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 202);

    let oversized = client
        .post(&url)
        .header("content-type", "application/json")
        .body(vec![b' '; limit + 1])
        .send()
        .await
        .unwrap();
    assert_eq!(oversized.status().as_u16(), 413);

    let records = wait_for_records(&exporter, 1).await;
    assert_eq!(records.len(), 1);

    cancel.cancel();
    let stats = handle.join().await;
    assert_eq!(stats.received, 1);
}

#[tokio::test]
async fn test_framed_endpoint_end_to_end() {
    let exporter = Arc::new(RecordingExporter::default());
    let forwarder = TelemetryForwarder::new(local_config(2))
        .unwrap()
        .with_exporter(exporter.clone());
    let (cancel, token) = CancellationToken::new();
    let handle = forwarder.start(token).await.unwrap();

    let stream = tokio::net::TcpStream::connect(handle.framed_addr).await.unwrap();
    let mut frames = FramedWrite::new(stream, LengthDelimitedCodec::new());

    frames
        .send(encode_frame(Signal::Traces, br#"{"traceId":"1"}"#))
        .await
        .unwrap();
    frames.send(bytes::Bytes::from_static(&[7, 1, 2])).await.unwrap();
    frames
        .send(encode_frame(Signal::Traces, &[0xde, 0xad]))
        .await
        .unwrap();

    let records = wait_for_records(&exporter, 2).await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.source == RecordSource::Framed));
    assert!(records.iter().all(|r| r.has_tags(&tags())));
    assert!(matches!(records[0].body, RecordBody::Json(_)));
    assert_eq!(records[1].body, RecordBody::Binary(vec![0xde, 0xad]));

    cancel.cancel();
    let stats = handle.join().await;
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn test_http_exporter_posts_envelope() {
    use axum::extract::{Path, State};
    use axum::routing::post;
    use axum::{Json, Router};

    let received: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
    let app = Router::new()
        .route(
            "/v1/:signal",
            post(
                |State(received): State<Arc<Mutex<Vec<(String, Value)>>>>,
                 Path(signal): Path<String>,
                 Json(body): Json<Value>| async move {
                    received.lock().push((signal, body));
                    "ok"
                },
            ),
        )
        .with_state(received.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let exporter =
        HttpExporter::new(&format!("http://{}/", addr), tags(), Duration::from_secs(5)).unwrap();
    assert_eq!(exporter.endpoint(Signal::Logs), format!("http://{}/v1/logs", addr));

    exporter
        .export(Signal::Metrics, &[log_record(1), log_record(2)])
        .await
        .unwrap();

    let received = received.lock();
    assert_eq!(received.len(), 1);
    let (signal, body) = &received[0];
    assert_eq!(signal, "metrics");
    assert_eq!(body["resource"]["attributes"]["service.name"], "developer-portal");
    assert_eq!(body["records"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_http_exporter_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let exporter = HttpExporter::new(
        &format!("http://127.0.0.1:{}", port),
        tags(),
        Duration::from_secs(2),
    )
    .unwrap();
    let err = exporter.export(Signal::Logs, &[log_record(0)]).await.unwrap_err();
    assert!(matches!(err, StackError::Network(_)));
}
