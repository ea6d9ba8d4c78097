use stackup_types::TelemetryRecord;
use std::time::Duration;
use tokio::time::Instant;

/// Size- and age-bounded buffer. The age deadline starts with the first
/// record of a batch, not with the previous flush.
#[derive(Debug)]
pub struct Batcher {
    max_records: usize,
    max_age: Duration,
    buffer: Vec<TelemetryRecord>,
    deadline: Option<Instant>,
}

impl Batcher {
    pub fn new(max_records: usize, max_age: Duration) -> Self {
        let max_records = max_records.max(1);
        Self {
            max_records,
            max_age,
            buffer: Vec::with_capacity(max_records.min(4096)),
            deadline: None,
        }
    }

    /// Returns a full batch once `max_records` is reached.
    pub fn push(&mut self, record: TelemetryRecord) -> Option<Vec<TelemetryRecord>> {
        if self.buffer.is_empty() {
            self.deadline = Some(Instant::now() + self.max_age);
        }
        self.buffer.push(record);

        if self.buffer.len() >= self.max_records {
            Some(self.take())
        } else {
            None
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    pub fn take(&mut self) -> Vec<TelemetryRecord> {
        self.deadline = None;
        std::mem::take(&mut self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
