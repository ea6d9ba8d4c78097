use reqwest::Client;
use serde_json::Value;
use stackup_types::HealthCheckSpec;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::supervisor::CancellationToken;

const MIN_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Probe {
    Ready,
    /// The endpoint answered, but not with the expected value.
    NotReady(String),
    /// Nothing answered.
    ConnectionError(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Polls a health endpoint until its JSON body reports ready. Never gives
/// up on its own; only cancellation stops it.
pub struct ReadinessGate {
    name: String,
    spec: HealthCheckSpec,
    client: Client,
}

impl ReadinessGate {
    pub fn new(name: &str, spec: HealthCheckSpec) -> Self {
        let timeout = spec.poll_interval().max(MIN_PROBE_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .unwrap_or_default();

        Self {
            name: name.to_string(),
            spec,
            client,
        }
    }

    pub fn spec(&self) -> &HealthCheckSpec {
        &self.spec
    }

    pub async fn probe(&self) -> Probe {
        let response = match self.client.get(&self.spec.url).send().await {
            Ok(response) => response,
            Err(e) => return Probe::ConnectionError(e.to_string()),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Probe::ConnectionError(format!("failed reading body: {}", e)),
        };

        let value: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) => {
                return Probe::NotReady(format!("HTTP {} with non-JSON body", status.as_u16()))
            }
        };

        if body_matches(&value, &self.spec.expected_field, &self.spec.expected_value) {
            Probe::Ready
        } else {
            let actual = lookup(&value, &self.spec.expected_field)
                .map(render)
                .unwrap_or_else(|| "<missing>".to_string());
            Probe::NotReady(format!(
                "HTTP {}, {} = {}",
                status.as_u16(),
                self.spec.expected_field,
                actual
            ))
        }
    }

    /// First probe is immediate, later ones follow the poll interval.
    pub async fn wait(&self, mut cancel: CancellationToken) -> ReadinessOutcome {
        let interval = self.spec.poll_interval();
        let mut attempts = 0u32;

        info!(
            "Waiting for '{}' to report {} = {} at {}",
            self.name, self.spec.expected_field, self.spec.expected_value, self.spec.url
        );

        loop {
            if cancel.is_cancelled() {
                return ReadinessOutcome::Cancelled { attempts };
            }

            attempts += 1;
            let probe = tokio::select! {
                probe = self.probe() => probe,
                _ = cancel.cancelled() => return ReadinessOutcome::Cancelled { attempts },
            };

            match probe {
                Probe::Ready => {
                    info!("'{}' is ready (attempt {})", self.name, attempts);
                    return ReadinessOutcome::Ready { attempts };
                }
                Probe::NotReady(detail) => {
                    info!("'{}' not ready yet (attempt {}): {}", self.name, attempts, detail);
                }
                Probe::ConnectionError(detail) => {
                    if attempts == 1 {
                        debug!("'{}' not accepting connections yet: {}", self.name, detail);
                    } else {
                        warn!(
                            "'{}' health endpoint unreachable (attempt {}): {}",
                            self.name, attempts, detail
                        );
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return ReadinessOutcome::Cancelled { attempts },
            }
        }
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compares the value at a dot-separated path with `expected`. Non-string
/// values compare by their JSON text, so `true` matches "true".
pub fn body_matches(value: &Value, path: &str, expected: &str) -> bool {
    lookup(value, path).map(render).as_deref() == Some(expected)
}
