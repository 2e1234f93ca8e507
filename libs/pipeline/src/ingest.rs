use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ingest_api::{IngestError, MessageSource, TransportMessage, WritePayload, WriteSink};

use crate::classify::classify;
use crate::config::BucketDefaults;
use crate::decode::decode;
use crate::encode::encode;
use crate::registry::DeviceRegistry;
use crate::topic::{DataKind, ParsedTopic, TopicRouter};

/// Everything the loop reads and never mutates, built once at startup.
#[derive(Debug)]
pub struct IngestContext {
    pub registry: DeviceRegistry,
    pub router: TopicRouter,
    pub buckets: BucketDefaults,
}

impl IngestContext {
    pub fn new(registry: DeviceRegistry, router: TopicRouter, buckets: BucketDefaults) -> Self {
        Self { registry, router, buckets }
    }
}

/// Counters reported when the loop terminates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Messages taken from the transport.
    pub received: u64,
    /// Messages dropped before classification (topic, device, decode).
    pub dropped: u64,
    /// Records or bulk elements rejected by the classifier.
    pub rejected: u64,
    /// Records that encoded to at least one line.
    pub records: u64,
    /// Records whose values were all elided.
    pub empty: u64,
    /// Sink writes, at most one per bucket and message.
    pub writes: u64,
    pub write_errors: u64,
    pub lines: u64,
    /// State the loop was in when it stopped.
    pub state: LoopState,
}

/// `Running` until cancellation is observed, `Draining` from then on. A
/// loop that stops because its source closed never leaves `Running`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Running,
    Draining,
}

/// Everything one message writes into one bucket.
struct Batch<'a> {
    bucket: &'a str,
    kinds: Vec<DataKind>,
    payload: WritePayload,
}

/// Single consumer: takes messages in arrival order and pushes each one
/// through route → decode → classify → encode → write. A failure anywhere
/// drops the message (or bulk element) and the loop carries on.
pub struct Ingestor {
    ctx: Arc<IngestContext>,
    sink: Box<dyn WriteSink>,
    stats: IngestStats,
}

impl Ingestor {
    pub fn new(ctx: Arc<IngestContext>, sink: Box<dyn WriteSink>) -> Self {
        Self {
            ctx,
            sink,
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Run until the token is cancelled or the source is exhausted.
    ///
    /// Cancellation is only observed between messages: a message that has
    /// been received is always processed to the end, including its writes.
    pub async fn run(mut self, source: &mut dyn MessageSource, token: CancellationToken) -> IngestStats {
        tracing::info!(devices = self.ctx.registry.len(), "ingest loop running");

        loop {
            if token.is_cancelled() {
                self.stats.state = LoopState::Draining;
                break;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.stats.state = LoopState::Draining;
                    break;
                }
                msg = source.recv() => {
                    match msg {
                        Some(msg) => self.handle_message(msg).await,
                        None => {
                            tracing::info!("message source closed");
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(state = ?self.stats.state, "shutting down");
        source.close().await;
        self.sink.close().await;

        let s = self.stats;
        tracing::info!(
            received = s.received,
            dropped = s.dropped,
            rejected = s.rejected,
            records = s.records,
            empty = s.empty,
            writes = s.writes,
            write_errors = s.write_errors,
            lines = s.lines,
            "ingest loop finished"
        );
        s
    }

    pub async fn handle_message(&mut self, msg: TransportMessage) {
        self.stats.received += 1;
        let ctx = Arc::clone(&self.ctx);

        let topic = match ctx.router.route(&msg.topic) {
            Ok(topic) => topic,
            Err(e) => {
                self.stats.dropped += 1;
                tracing::warn!(topic = %msg.topic, kind = e.kind(), error = %e, "dropping message");
                return;
            }
        };

        let Some(meta) = ctx.registry.get(&topic.device_id) else {
            self.stats.dropped += 1;
            let e = IngestError::UnconfiguredDevice(topic.device_id.clone());
            tracing::debug!(topic = %msg.topic, device = %topic.device_id, error = %e, "dropping message");
            return;
        };

        let value = match decode(&msg.payload, topic.encoding) {
            Ok(value) => value,
            Err(e) => {
                self.stats.dropped += 1;
                tracing::warn!(
                    device = %topic.device_id,
                    kind = %topic.data_kind,
                    error = %e,
                    "dropping message"
                );
                return;
            }
        };

        let tags = meta.location_tags();
        let mut batches: Vec<Batch<'_>> = Vec::new();
        for result in classify(topic.data_kind, value) {
            let record = match result {
                Ok(record) => record,
                Err(rejected) => {
                    self.stats.rejected += 1;
                    tracing::warn!(
                        device = %topic.device_id,
                        kind = rejected.kind_label(),
                        subtopic = ?rejected.subtopic,
                        error = %rejected.error,
                        "rejected record"
                    );
                    continue;
                }
            };

            let kind = record.kind();
            let Some(payload) = encode(&record, &tags) else {
                self.stats.empty += 1;
                tracing::debug!(device = %topic.device_id, %kind, "record has no writable values");
                continue;
            };
            self.stats.records += 1;

            let bucket = ctx.buckets.resolve(kind, meta);
            match batches.iter_mut().find(|batch| batch.bucket == bucket) {
                Some(batch) => {
                    if !batch.kinds.contains(&kind) {
                        batch.kinds.push(kind);
                    }
                    batch.payload.merge(payload);
                }
                None => batches.push(Batch { bucket, kinds: vec![kind], payload }),
            }
        }

        for batch in &batches {
            self.dispatch(&topic, batch).await;
        }
    }

    async fn dispatch(&mut self, topic: &ParsedTopic, batch: &Batch<'_>) {
        let Batch { bucket, kinds, payload } = batch;
        match self.sink.write(bucket, payload).await {
            Ok(()) => {
                self.stats.writes += 1;
                self.stats.lines += payload.line_count() as u64;
                tracing::trace!(device = %topic.device_id, ?kinds, bucket, lines = payload.line_count(), "written");
            }
            Err(e) => {
                self.stats.write_errors += 1;
                tracing::error!(
                    device = %topic.device_id,
                    ?kinds,
                    bucket,
                    lines = payload.line_count(),
                    error = %e,
                    "write failed"
                );
            }
        }
    }
}

/// Spawn the loop on its own task. The source moves into the task.
pub fn spawn_ingestor<S>(ingestor: Ingestor, mut source: S, token: CancellationToken) -> JoinHandle<IngestStats>
where
    S: MessageSource + 'static,
{
    tokio::spawn(async move { ingestor.run(&mut source, token).await })
}
