//! Storage seam behind the logger-side transports.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::LogPayload;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("log store unavailable: {0}")]
    Unavailable(String),
}

/// Persists log entries received by an RPC, gRPC or HTTP logger endpoint.
#[async_trait]
pub trait LogSink: Send + Sync + 'static {
    async fn write(&self, entry: LogPayload) -> Result<(), SinkError>;
}

/// In-process sink that records every entry.
///
/// `fail_writes(true)` makes subsequent writes fail, for exercising error
/// replies.
#[derive(Clone, Default)]
pub struct MemoryLogSink {
    inner: Arc<Mutex<SinkState>>,
}

#[derive(Default)]
struct SinkState {
    entries: Vec<LogPayload>,
    failing: bool,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogPayload> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_writes(&self, failing: bool) {
        self.lock().failing = failing;
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn write(&self, entry: LogPayload) -> Result<(), SinkError> {
        let mut state = self.lock();
        if state.failing {
            return Err(SinkError::Unavailable("writes disabled".into()));
        }
        state.entries.push(entry);
        Ok(())
    }
}
