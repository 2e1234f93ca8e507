use std::collections::VecDeque;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ingest_api::{MessageSource, TransportMessage, WritePayload};
use pipeline::{BucketDefaults, DeviceRegistry, IngestContext, Ingestor, LoopState, TopicRouter, spawn_ingestor};
use storage_memory::MemorySink;

// ---- Fixtures ----

const DEVICES: &str = r#"{
    "dev-a": {"location_name": "lab", "location_lat": 47.5, "location_lon": 9.25},
    "dev-b": {"location_name": "roof", "location_lat": 1.0, "location_lon": 2.0,
              "db_aggregated_bucket": "dev_b_long", "db_event_bucket": ""}
}"#;

const LAB_TAGS: &str = "location_lat=47.5,location_lon=9.25,location_name=lab";

/// Replays a fixed list of messages. Once exhausted it either reports the
/// end of the stream or stays idle forever, like a quiet broker.
struct ScriptedSource {
    messages: VecDeque<TransportMessage>,
    hold_open: bool,
    closed: Arc<AtomicBool>,
}

impl ScriptedSource {
    fn new(messages: Vec<TransportMessage>) -> Self {
        Self {
            messages: messages.into(),
            hold_open: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn held_open(messages: Vec<TransportMessage>) -> Self {
        Self { hold_open: true, ..Self::new(messages) }
    }
}

impl MessageSource for ScriptedSource {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<TransportMessage>> + Send + '_>> {
        Box::pin(async move {
            match self.messages.pop_front() {
                Some(msg) => Some(msg),
                None if self.hold_open => std::future::pending().await,
                None => None,
            }
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
        })
    }
}

fn context() -> Arc<IngestContext> {
    Arc::new(IngestContext::new(
        DeviceRegistry::from_json(DEVICES).unwrap(),
        TopicRouter::from_filter("private/#"),
        BucketDefaults::default(),
    ))
}

fn msg(topic: &str, payload: impl Into<Vec<u8>>) -> TransportMessage {
    TransportMessage::new(topic, payload)
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn cbor(value: &serde_json::Value) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).unwrap();
    buf
}

async fn run_to_end(sink: &MemorySink, messages: Vec<TransportMessage>) -> pipeline::IngestStats {
    let mut source = ScriptedSource::new(messages);
    Ingestor::new(context(), Box::new(sink.clone()))
        .run(&mut source, CancellationToken::new())
        .await
}

// ---- Tests ----

#[tokio::test]
async fn test_dataseries_lands_in_default_bucket() {
    let sink = MemorySink::default();
    let stats = run_to_end(
        &sink,
        vec![msg(
            "private/dev-a/dataseries/json",
            r#"{"CH1": {"data": [1.0, 2.0], "timestamps": [0, 1]}}"#,
        )],
    )
    .await;

    assert_eq!(
        sink.lines("short_term").await,
        [
            format!("cycle-by-cycle,{LAB_TAGS} CH1=1.000000 0"),
            format!("cycle-by-cycle,{LAB_TAGS} CH1=2.000000 1000000"),
        ]
    );
    assert_eq!(stats.received, 1);
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.lines, 2);
    assert_eq!(stats.state, LoopState::Running);
    assert!(sink.is_closed());
}

#[tokio::test]
async fn test_device_bucket_override_and_empty_override() {
    let sink = MemorySink::default();
    run_to_end(
        &sink,
        vec![
            msg(
                "private/dev-b/agg_data/json",
                r#"{"interval_sec": 60, "timestamp": 10, "data": {"P": 5}}"#,
            ),
            msg(
                "private/dev-b/event/json",
                r#"{"event_type": "dip", "channel": "U1", "timestamp": 10, "data": {"depth": 0.5}}"#,
            ),
        ],
    )
    .await;

    let writes = sink.writes().await;
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].bucket, "dev_b_long");
    assert_eq!(writes[1].bucket, "events");
    assert!(matches!(writes[1].payload, WritePayload::Point(_)));
}

#[tokio::test]
async fn test_unconfigured_device_is_dropped_and_loop_continues() {
    let sink = MemorySink::default();
    let stats = run_to_end(
        &sink,
        vec![
            msg("private/ghost/agg_data/json", r#"{"interval_sec": 1, "timestamp": 1, "data": {"x": 1}}"#),
            msg("private/dev-a/agg_data/json", r#"{"interval_sec": 1, "timestamp": 1, "data": {"x": 1}}"#),
        ],
    )
    .await;

    assert_eq!(stats.received, 2);
    assert_eq!(stats.dropped, 1);
    assert_eq!(
        sink.lines("long_term").await,
        [format!("aggregated-data,interval_sec=1,{LAB_TAGS} x=1.000000 1000000000")]
    );
}

#[tokio::test]
async fn test_malformed_messages_never_write() {
    let sink = MemorySink::default();
    let stats = run_to_end(
        &sink,
        vec![
            msg("private/dev-a", "{}"),
            msg("private/dev-a/status/json", "{}"),
            msg("private/dev-a/event/xml", "{}"),
            msg("private/dev-a/event/json", "{not json"),
            msg("private/dev-a/event/gjson", "not gzip"),
            msg("private/dev-a/event/json", r#"{"channel": "U1", "timestamp": 1}"#),
        ],
    )
    .await;

    assert!(sink.writes().await.is_empty());
    assert_eq!(stats.received, 6);
    assert_eq!(stats.dropped, 5);
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn test_compressed_and_binary_encodings() {
    let sink = MemorySink::default();
    let agg = serde_json::json!({"interval_sec": 600, "timestamp": 2.0, "data": {"H": [1.0, null, 3.0]}});
    run_to_end(
        &sink,
        vec![
            msg("private/dev-a/agg_data/gjson", gzip(agg.to_string().as_bytes())),
            msg("private/dev-a/agg_data/cbor", cbor(&agg)),
        ],
    )
    .await;

    let expected = format!("aggregated-data,interval_sec=600,{LAB_TAGS} H_00=1.000000,H_02=3.000000 2000000000");
    assert_eq!(sink.lines("long_term").await, [expected.clone(), expected]);
}

#[tokio::test]
async fn test_bulk_envelope_isolates_broken_element() {
    let sink = MemorySink::default();
    let envelope = serde_json::json!([
        {"subtopic": "dev-a/agg_data/json", "payload": {"interval_sec": 1, "timestamp": 1, "data": {"a": 1}}},
        {"subtopic": "dev-a/agg_data/json", "payload": "{broken"},
        {"subtopic": "dev-a/dataseries/json", "payload": {"U": {"data": [3.0], "timestamps": [7]}}}
    ]);
    let stats = run_to_end(&sink, vec![msg("private/dev-a/agg_data/json", envelope.to_string())]).await;

    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.records, 2);
    assert_eq!(stats.writes, 2);
    assert_eq!(sink.lines("long_term").await.len(), 1);
    assert_eq!(
        sink.lines("short_term").await,
        [format!("cycle-by-cycle,{LAB_TAGS} U=3.000000 7000000")]
    );
}

#[tokio::test]
async fn test_bulk_envelope_writes_once_per_bucket() {
    let sink = MemorySink::default();
    let envelope = serde_json::json!([
        {"subtopic": "dev-a/agg_data/json", "payload": {"interval_sec": 1, "timestamp": 1, "data": {"a": 1}}},
        {"subtopic": "dev-a/dataseries/json", "payload": {"U": {"data": [3.0], "timestamps": [7]}}},
        {"subtopic": "dev-a/agg_data/json", "payload": {"interval_sec": 1, "timestamp": 2, "data": {"a": 2}}},
        {"subtopic": "dev-a/agg_data/json", "payload": {"interval_sec": 1, "timestamp": 3, "data": {"a": 3}}}
    ]);
    let stats = run_to_end(&sink, vec![msg("private/dev-a/agg_data/json", envelope.to_string())]).await;

    let writes = sink.writes().await;
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].bucket, "long_term");
    assert_eq!(writes[0].payload.line_count(), 3);
    assert_eq!(writes[1].bucket, "short_term");
    assert_eq!(
        sink.lines("long_term").await,
        [1, 2, 3].map(|ts| format!("aggregated-data,interval_sec=1,{LAB_TAGS} a={ts}.000000 {ts}000000000"))
    );
    assert_eq!(stats.records, 4);
    assert_eq!(stats.writes, 2);
    assert_eq!(stats.lines, 4);
}

#[tokio::test]
async fn test_bulk_events_share_one_write() {
    let sink = MemorySink::default();
    let envelope = serde_json::json!([
        {"subtopic": "dev-a/event/json", "payload": {"event_type": "dip", "channel": "U1", "timestamp": 1, "data": {"d": 1}}},
        {"subtopic": "dev-a/event/json", "payload": {"event_type": "swell", "channel": "U2", "timestamp": 2, "data": {"d": 2}}}
    ]);
    let stats = run_to_end(&sink, vec![msg("private/dev-a/event/json", envelope.to_string())]).await;

    let writes = sink.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].bucket, "events");
    assert!(matches!(&writes[0].payload, WritePayload::Lines(lines) if lines.len() == 2));
    assert_eq!(stats.lines, 2);
}

#[tokio::test]
async fn test_write_failure_does_not_stop_the_loop() {
    let sink = MemorySink::default().fail_bucket("long_term");
    let stats = run_to_end(
        &sink,
        vec![
            msg("private/dev-a/agg_data/json", r#"{"interval_sec": 1, "timestamp": 1, "data": {"a": 1}}"#),
            msg("private/dev-a/dataseries/json", r#"{"U": {"data": [1.0], "timestamps": [1]}}"#),
        ],
    )
    .await;

    assert_eq!(stats.write_errors, 1);
    assert_eq!(stats.writes, 1);
    assert_eq!(sink.lines("short_term").await.len(), 1);
}

#[tokio::test]
async fn test_fully_elided_record_is_not_written() {
    let sink = MemorySink::default();
    let stats = run_to_end(
        &sink,
        vec![msg(
            "private/dev-a/agg_data/json",
            r#"{"interval_sec": 1, "timestamp": 1, "data": {"a": NaN, "b": [null]}}"#,
        )],
    )
    .await;

    assert_eq!(stats.empty, 1);
    assert!(sink.writes().await.is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_idle_loop() {
    let sink = MemorySink::default();
    let source = ScriptedSource::held_open(vec![msg(
        "private/dev-a/dataseries/json",
        r#"{"U": {"data": [1.0], "timestamps": [1]}}"#,
    )]);
    let source_closed = source.closed.clone();
    let token = CancellationToken::new();

    let handle = spawn_ingestor(Ingestor::new(context(), Box::new(sink.clone())), source, token.clone());

    // Let the loop take the scripted message and go idle.
    for _ in 0..100 {
        if !sink.writes().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    token.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.state, LoopState::Draining);
    assert!(sink.is_closed());
    assert!(source_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cancelled_before_start_processes_nothing() {
    let sink = MemorySink::default();
    let token = CancellationToken::new();
    token.cancel();

    let ingestor = Ingestor::new(context(), Box::new(sink.clone()));
    let mut source = ScriptedSource::new(vec![msg("private/dev-a/dataseries/json", "{}")]);
    let stats = ingestor.run(&mut source, token).await;
    assert_eq!(stats.received, 0);
    assert_eq!(stats.state, LoopState::Draining);
    assert!(sink.writes().await.is_empty());
}
