//! Canonical records → line protocol.

use ingest_api::{FieldValue, LineBuilder, Point, TagSet, WritePayload};

use crate::classify::{AggregateValue, CanonicalRecord, Channel};
use crate::value::Value;

pub const DATASERIES_MEASUREMENT: &str = "cycle-by-cycle";
pub const AGGREGATE_MEASUREMENT: &str = "aggregated-data";
pub const EVENT_MEASUREMENT: &str = "event";

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Encode one record. `tags` are the device tags; record-specific tags
/// override them on key collision.
///
/// `None` when every value was elided and nothing is left to write.
pub fn encode(record: &CanonicalRecord, tags: &TagSet) -> Option<WritePayload> {
    match record {
        CanonicalRecord::Dataseries { channels } => encode_dataseries(channels, tags),
        CanonicalRecord::Aggregate { interval_sec, timestamp, fields } => {
            encode_aggregate(*interval_sec, *timestamp, fields, tags)
        }
        CanonicalRecord::Event { event_type, channel, timestamp, fields } => {
            encode_event(event_type, channel, *timestamp, fields, tags)
        }
    }
}

/// One line per (channel, sample), channel-major.
pub fn encode_dataseries(channels: &[(String, Channel)], tags: &TagSet) -> Option<WritePayload> {
    let mut lines = Vec::new();
    for (name, channel) in channels {
        for (ts_ms, value) in channel.timestamps.iter().zip(&channel.values) {
            let Some(ts_ns) = ts_ms.checked_mul(NANOS_PER_MILLI) else {
                continue;
            };
            let mut builder = LineBuilder::new(DATASERIES_MEASUREMENT, tags);
            builder.float(name, *value);
            if let Some(line) = builder.finish(ts_ns) {
                lines.push(line);
            }
        }
    }
    (!lines.is_empty()).then_some(WritePayload::Lines(lines))
}

pub fn encode_aggregate(
    interval_sec: i64,
    timestamp: f64,
    fields: &[(String, AggregateValue)],
    tags: &TagSet,
) -> Option<WritePayload> {
    let ts_ns = seconds_to_nanos(timestamp)?;

    let mut tags = tags.clone();
    tags.insert("interval_sec".to_string(), interval_sec.to_string());

    let mut builder = LineBuilder::new(AGGREGATE_MEASUREMENT, &tags);
    for (name, value) in fields {
        match value {
            AggregateValue::Scalar(v) => {
                builder.float(name, *v);
            }
            AggregateValue::Series(items) => push_series(&mut builder, name, items.iter().copied()),
        }
    }
    builder.finish(ts_ns).map(|line| WritePayload::Lines(vec![line]))
}

pub fn encode_event(
    event_type: &str,
    channel: &str,
    timestamp: f64,
    fields: &[(String, Value)],
    tags: &TagSet,
) -> Option<WritePayload> {
    let timestamp_ns = seconds_to_nanos(timestamp)?;

    let mut tags = tags.clone();
    tags.insert("event_type".to_string(), event_type.to_string());
    tags.insert("channel".to_string(), channel.to_string());

    let mut point_fields = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        match value {
            Value::Int(_) | Value::Float(_) => {
                let v = value.as_f64().unwrap_or(f64::NAN);
                if v.is_finite() {
                    point_fields.push((name.clone(), FieldValue::Float(v)));
                }
            }
            Value::Text(s) => point_fields.push((name.clone(), FieldValue::String(s.clone()))),
            Value::Bool(b) => point_fields.push((name.clone(), FieldValue::Boolean(*b))),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if let Some(v) = item.as_f64().filter(|v| v.is_finite()) {
                        point_fields.push((indexed(name, i), FieldValue::Float(v)));
                    }
                }
            }
            Value::Null | Value::Map(_) | Value::Bytes(_) => {}
        }
    }
    if point_fields.is_empty() {
        return None;
    }

    Some(WritePayload::Point(Point {
        measurement: EVENT_MEASUREMENT.to_string(),
        tags,
        fields: point_fields,
        timestamp_ns,
    }))
}

fn push_series(builder: &mut LineBuilder, name: &str, items: impl Iterator<Item = f64>) {
    for (i, v) in items.enumerate() {
        if v.is_finite() {
            builder.float(&indexed(name, i), v);
        }
    }
}

/// `name_00`, `name_01`, … The index keeps its source position even when
/// earlier elements were elided.
fn indexed(name: &str, i: usize) -> String {
    format!("{name}_{i:02}")
}

/// Epoch seconds → nanoseconds, rounded. `None` if not representable.
pub fn seconds_to_nanos(seconds: f64) -> Option<i64> {
    let ns = (seconds * 1e9).round();
    (ns.is_finite() && ns >= i64::MIN as f64 && ns < i64::MAX as f64).then_some(ns as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_record;
    use crate::topic::DataKind;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn record(kind: DataKind, json: &str) -> CanonicalRecord {
        let value = serde_json::from_str(json).unwrap();
        classify_record(kind, &value).unwrap()
    }

    fn lines(payload: Option<WritePayload>) -> Vec<String> {
        match payload {
            Some(WritePayload::Lines(lines)) => lines,
            other => panic!("expected lines, got {other:?}"),
        }
    }

    #[test]
    fn test_dataseries_one_line_per_sample() {
        let r = record(
            DataKind::Dataseries,
            r#"{"CH1": {"data": [1.0, 2.0], "timestamps": [0, 1]},
                "CH2": {"data": [6.0, 7.0], "timestamps": [0, 1]}}"#,
        );
        assert_eq!(
            lines(encode(&r, &tags(&[("tag1", "value1")]))),
            [
                "cycle-by-cycle,tag1=value1 CH1=1.000000 0",
                "cycle-by-cycle,tag1=value1 CH1=2.000000 1000000",
                "cycle-by-cycle,tag1=value1 CH2=6.000000 0",
                "cycle-by-cycle,tag1=value1 CH2=7.000000 1000000",
            ]
        );
    }

    #[test]
    fn test_dataseries_skips_missing_samples() {
        let r = record(
            DataKind::Dataseries,
            r#"{"U": {"data": [null, 2.0, null], "timestamps": [1, 2, 3]}}"#,
        );
        assert_eq!(lines(encode(&r, &TagSet::new())), ["cycle-by-cycle U=2.000000 2000000"]);

        let all_missing = record(DataKind::Dataseries, r#"{"U": {"data": [null], "timestamps": [1]}}"#);
        assert_eq!(encode(&all_missing, &TagSet::new()), None);
    }

    #[test]
    fn test_dataseries_skips_overflowing_timestamp() {
        let channels = vec![(
            "U".to_string(),
            Channel { timestamps: vec![i64::MAX, 5], values: vec![1.0, 2.0] },
        )];
        assert_eq!(
            lines(encode_dataseries(&channels, &TagSet::new())),
            ["cycle-by-cycle U=2.000000 5000000"]
        );
    }

    #[test]
    fn test_aggregate_expands_sequences() {
        let r = record(
            DataKind::Aggregate,
            r#"{"intervalSec": 1, "timestamp": 1.0, "data": {"CH1": 1.0, "CH2": [2.0, 3.0, 4.0]}}"#,
        );
        assert_eq!(
            lines(encode(&r, &TagSet::new())),
            ["aggregated-data,interval_sec=1 CH1=1.000000,CH2_00=2.000000,CH2_01=3.000000,CH2_02=4.000000 1000000000"]
        );
    }

    #[test]
    fn test_aggregate_elides_sentinels_without_dangling_separators() {
        let r = record(
            DataKind::Aggregate,
            r#"{"interval_sec": 600, "timestamp": 2.5,
                "data": {"A": null, "B": [null, 3.0, null], "C": 4}}"#,
        );
        assert_eq!(
            lines(encode(&r, &tags(&[("location_name", "lab")]))),
            ["aggregated-data,interval_sec=600,location_name=lab B_01=3.000000,C=4.000000 2500000000"]
        );

        let empty = record(
            DataKind::Aggregate,
            r#"{"interval_sec": 1, "timestamp": 1, "data": {"A": null, "B": [null]}}"#,
        );
        assert_eq!(encode(&empty, &TagSet::new()), None);
    }

    #[test]
    fn test_aggregate_interval_tag_wins_over_device_tag() {
        let r = record(
            DataKind::Aggregate,
            r#"{"interval_sec": 10, "timestamp": 0, "data": {"P": 1}}"#,
        );
        assert_eq!(
            lines(encode(&r, &tags(&[("interval_sec", "stale")]))),
            ["aggregated-data,interval_sec=10 P=1.000000 0"]
        );
    }

    #[test]
    fn test_event_is_structured_point() {
        let r = record(
            DataKind::Event,
            r#"{"eventType": "dip", "channel": "U1", "timestamp": 1.5,
                "data": {"depth": 0.25, "phases": [1, null, 3], "note": "x", "ok": true,
                         "none": null, "nested": {"a": 1}}}"#,
        );
        let Some(WritePayload::Point(point)) = encode(&r, &tags(&[("location_name", "lab")])) else {
            panic!("expected point");
        };
        assert_eq!(point.measurement, "event");
        assert_eq!(point.timestamp_ns, 1_500_000_000);
        assert_eq!(
            point.tags,
            tags(&[("channel", "U1"), ("event_type", "dip"), ("location_name", "lab")])
        );
        assert_eq!(
            point.to_line().as_deref(),
            Some(
                "event,channel=U1,event_type=dip,location_name=lab \
                 depth=0.250000,phases_00=1.000000,phases_02=3.000000,note=\"x\",ok=true 1500000000"
            )
        );
    }

    #[test]
    fn test_event_with_empty_channel_stays_well_formed() {
        let r = record(
            DataKind::Event,
            r#"{"event_type": "dip\\", "channel": "", "timestamp": 2, "data": {"depth": 0.5}}"#,
        );
        let Some(WritePayload::Point(point)) = encode(&r, &tags(&[("location_name", "lab")])) else {
            panic!("expected point");
        };
        assert_eq!(
            point.to_line().as_deref(),
            Some("event,event_type=dip,location_name=lab depth=0.500000 2000000000")
        );
    }

    #[test]
    fn test_event_without_fields_is_suppressed() {
        let r = record(
            DataKind::Event,
            r#"{"event_type": "x", "channel": "c", "timestamp": 1}"#,
        );
        assert_eq!(encode(&r, &TagSet::new()), None);
    }

    #[test]
    fn test_seconds_to_nanos() {
        assert_eq!(seconds_to_nanos(1.0), Some(1_000_000_000));
        assert_eq!(seconds_to_nanos(0.25), Some(250_000_000));
        assert_eq!(seconds_to_nanos(-1.0), Some(-1_000_000_000));
        assert_eq!(seconds_to_nanos(f64::NAN), None);
        assert_eq!(seconds_to_nanos(1e300), None);
    }
}
