//! In-process transport for tests and embedding

use super::{AggregatePublisher, DeadLetter, DeadLetterSink, SourceRecord, TradeSource, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Source fed through an mpsc channel; ends when every sender is dropped
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<u8>>,
    next_offset: u64,
    committed: u64,
}

impl ChannelSource {
    pub fn new(buffer: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            tx,
            Self {
                rx,
                next_offset: 0,
                committed: 0,
            },
        )
    }

    pub fn committed_offset(&self) -> u64 {
        self.committed
    }
}

#[async_trait]
impl TradeSource for ChannelSource {
    async fn next_record(&mut self) -> Result<Option<SourceRecord>, TransportError> {
        match self.rx.recv().await {
            Some(payload) => {
                let offset = self.next_offset;
                self.next_offset += 1;
                Ok(Some(SourceRecord { offset, payload }))
            }
            None => Ok(None),
        }
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        self.committed = self.next_offset;
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "channel"
    }
}

#[derive(Debug, Default)]
struct PublisherState {
    published: Vec<(String, Vec<u8>)>,
    failures_remaining: u32,
    attempts: u32,
}

/// Publisher that keeps everything in memory
///
/// `fail_next(n)` makes the next `n` publish calls fail with `Rejected`.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    state: Mutex<PublisherState>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, failures: u32) {
        self.state.lock().failures_remaining = failures;
    }

    /// Every successfully published `(key, payload)`, in order
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().published.clone()
    }

    /// Published payloads decoded as JSON values
    pub fn published_json(&self) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .published
            .iter()
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }

    /// Publish calls seen, including failed ones
    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }
}

#[async_trait]
impl AggregatePublisher for MemoryPublisher {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.attempts += 1;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(TransportError::Rejected("scripted failure".to_string()));
        }

        state.published.push((key.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn report(&self, letter: DeadLetter) -> Result<(), TransportError> {
        self.letters.lock().push(letter);
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
