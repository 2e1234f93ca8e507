use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use ingest_api::{IngestError, WritePayload, WriteSink};

// ═══════════════════════════════════════════════════════════════
//  MemorySinkConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_writes() -> usize {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemorySinkConfig {
    #[serde(default = "default_max_writes")]
    pub max_writes: usize,
}

impl Default for MemorySinkConfig {
    fn default() -> Self {
        Self {
            max_writes: default_max_writes(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySink
// ═══════════════════════════════════════════════════════════════

/// One accepted write.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub bucket: String,
    pub payload: WritePayload,
}

/// In-memory ring buffer of writes. Used by `--dry-run` and by tests.
///
/// Clones share the same buffer, so a test can keep a handle while the
/// ingest loop owns the boxed sink.
#[derive(Clone)]
pub struct MemorySink {
    writes: Arc<RwLock<VecDeque<RecordedWrite>>>,
    max_writes: usize,
    failing_bucket: Option<String>,
    closed: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new(config: MemorySinkConfig) -> Self {
        Self {
            writes: Arc::new(RwLock::new(VecDeque::with_capacity(config.max_writes.min(65536)))),
            max_writes: config.max_writes,
            failing_bucket: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reject every write into `bucket` with a backend error.
    pub fn fail_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.failing_bucket = Some(bucket.into());
        self
    }

    /// Snapshot of the recorded writes, oldest first.
    pub async fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.read().await.iter().cloned().collect()
    }

    /// All recorded lines of `bucket`, in write order.
    pub async fn lines(&self, bucket: &str) -> Vec<String> {
        self.writes
            .read()
            .await
            .iter()
            .filter(|w| w.bucket == bucket)
            .flat_map(|w| w.payload.to_body().lines().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(MemorySinkConfig::default())
    }
}

impl WriteSink for MemorySink {
    fn write<'a>(
        &'a self,
        bucket: &'a str,
        payload: &'a WritePayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>> {
        Box::pin(async move {
            if self.failing_bucket.as_deref() == Some(bucket) {
                return Err(IngestError::write_backend(bucket, "rejected by memory sink"));
            }
            if self.is_closed() {
                return Err(IngestError::write_backend(bucket, "sink closed"));
            }
            let mut buf = self.writes.write().await;
            if buf.len() >= self.max_writes {
                buf.pop_front();
            }
            buf.push_back(RecordedWrite {
                bucket: bucket.to_string(),
                payload: payload.clone(),
            });
            tracing::debug!(bucket, lines = payload.line_count(), "memory sink write");
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
        })
    }
}
