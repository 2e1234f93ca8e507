//! Classification of decoded payloads into canonical records.

use base64::Engine;

use ingest_api::IngestError;

use crate::decode::decode;
use crate::topic::{DataKind, Encoding, parse_subtopic};
use crate::value::Value;

/// Aggregate keys starting with this character are device-internal.
pub const RESERVED_MARKER: char = '_';

/// Samples of one dataseries channel. Both vectors have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Epoch milliseconds, in received order.
    pub timestamps: Vec<i64>,
    /// NaN marks a missing sample.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateValue {
    Scalar(f64),
    Series(Vec<f64>),
}

/// Normalized record, independent of the wire encoding it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalRecord {
    Dataseries {
        channels: Vec<(String, Channel)>,
    },
    Aggregate {
        interval_sec: i64,
        /// Epoch seconds.
        timestamp: f64,
        fields: Vec<(String, AggregateValue)>,
    },
    Event {
        event_type: String,
        channel: String,
        /// Epoch seconds.
        timestamp: f64,
        fields: Vec<(String, Value)>,
    },
}

impl CanonicalRecord {
    pub fn kind(&self) -> DataKind {
        match self {
            CanonicalRecord::Dataseries { .. } => DataKind::Dataseries,
            CanonicalRecord::Aggregate { .. } => DataKind::Aggregate,
            CanonicalRecord::Event { .. } => DataKind::Event,
        }
    }
}

/// A record or bulk element the classifier refused.
#[derive(Debug)]
pub struct Rejection {
    /// Kind of the rejected record. `None` when a bulk element's subtopic
    /// could not be parsed.
    pub kind: Option<DataKind>,
    /// Set for bulk elements.
    pub subtopic: Option<String>,
    pub error: IngestError,
}

impl Rejection {
    pub fn kind_label(&self) -> &'static str {
        self.kind.map_or("unknown", |kind| kind.as_str())
    }
}

/// Classify one decoded message.
///
/// A top-level array is a bulk envelope: every element is decoded and
/// classified on its own, and yields its own entry in the result, so one
/// broken element never hides the others.
pub fn classify(kind: DataKind, value: Value) -> Vec<Result<CanonicalRecord, Rejection>> {
    match value {
        Value::Array(elements) => elements.iter().map(classify_element).collect(),
        other => vec![classify_record(kind, &other).map_err(|error| Rejection {
            kind: Some(kind),
            subtopic: None,
            error,
        })],
    }
}

/// Classify a single, non-bulk value of a known kind.
pub fn classify_record(kind: DataKind, value: &Value) -> Result<CanonicalRecord, IngestError> {
    match kind {
        DataKind::Dataseries => dataseries(value),
        DataKind::Aggregate => aggregate(value),
        DataKind::Event => event(value),
    }
}

fn classify_element(element: &Value) -> Result<CanonicalRecord, Rejection> {
    let subtopic = element.get("subtopic").and_then(Value::as_str);
    let mut kind = None;
    element_record(element, subtopic, &mut kind).map_err(|error| Rejection {
        kind,
        subtopic: subtopic.map(str::to_string),
        error,
    })
}

fn element_record(
    element: &Value,
    subtopic: Option<&str>,
    kind_out: &mut Option<DataKind>,
) -> Result<CanonicalRecord, IngestError> {
    let subtopic = subtopic.ok_or_else(|| IngestError::invalid("bulk", "element without 'subtopic'"))?;
    let (kind, encoding) = parse_subtopic(subtopic)?;
    *kind_out = Some(kind);
    let payload = element
        .get("payload")
        .ok_or_else(|| IngestError::invalid("bulk", format!("element '{subtopic}' without 'payload'")))?;

    let value = decode_element_payload(payload, encoding)?;
    if matches!(value, Value::Array(_)) {
        return Err(IngestError::invalid("bulk", format!("nested envelope in '{subtopic}'")));
    }
    classify_record(kind, &value)
}

/// Element payloads: raw bytes (CBOR envelopes), a string (JSON text, or
/// base64 for binary encodings inside JSON envelopes) or an inline value.
fn decode_element_payload(payload: &Value, encoding: Encoding) -> Result<Value, IngestError> {
    match (payload, encoding) {
        (Value::Bytes(bytes), _) => decode(bytes, encoding),
        (Value::Text(text), Encoding::Plain) => decode(text.as_bytes(), encoding),
        (Value::Text(text), _) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(text.trim())
                .map_err(|e| IngestError::decode(encoding.as_str(), format!("base64: {e}")))?;
            decode(&bytes, encoding)
        }
        (inline, Encoding::Plain) => Ok(inline.clone()),
        (other, _) => Err(IngestError::decode(
            encoding.as_str(),
            format!("element payload is {}, expected bytes or string", other.type_name()),
        )),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Dataseries
// ═══════════════════════════════════════════════════════════════

fn dataseries(value: &Value) -> Result<CanonicalRecord, IngestError> {
    const KIND: &str = "dataseries";

    // Devices wrap the channel map as {"data": {...}}.
    let channel_map = match value.get("data") {
        Some(Value::Map(inner)) => inner.as_slice(),
        _ => value
            .as_map()
            .ok_or_else(|| IngestError::invalid(KIND, format!("expected map, got {}", value.type_name())))?,
    };

    let mut channels = Vec::with_capacity(channel_map.len());
    for (name, entry) in channel_map {
        let data = entry
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| IngestError::invalid(KIND, format!("channel '{name}' without 'data' array")))?;
        let timestamps = entry
            .get("timestamps")
            .and_then(Value::as_array)
            .ok_or_else(|| IngestError::invalid(KIND, format!("channel '{name}' without 'timestamps' array")))?;
        if data.len() != timestamps.len() {
            return Err(IngestError::invalid(
                KIND,
                format!(
                    "channel '{name}': {} values but {} timestamps",
                    data.len(),
                    timestamps.len()
                ),
            ));
        }

        let values = data
            .iter()
            .map(|v| match v {
                Value::Null => Ok(f64::NAN),
                other => other.as_f64().ok_or_else(|| {
                    IngestError::invalid(KIND, format!("channel '{name}': non-numeric sample"))
                }),
            })
            .collect::<Result<Vec<f64>, _>>()?;
        let timestamps = timestamps
            .iter()
            .map(|t| {
                timestamp_ms(t).ok_or_else(|| {
                    IngestError::invalid(KIND, format!("channel '{name}': invalid timestamp"))
                })
            })
            .collect::<Result<Vec<i64>, _>>()?;

        channels.push((name.clone(), Channel { timestamps, values }));
    }

    Ok(CanonicalRecord::Dataseries { channels })
}

fn timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Int(ms) => Some(*ms),
        Value::Float(ms) if ms.is_finite() && ms.abs() < i64::MAX as f64 => Some(ms.round() as i64),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════
//  Aggregate
// ═══════════════════════════════════════════════════════════════

fn aggregate(value: &Value) -> Result<CanonicalRecord, IngestError> {
    const KIND: &str = "agg_data";

    let interval_sec = value
        .get_any(&["interval_sec", "intervalSec"])
        .and_then(Value::as_i64)
        .ok_or_else(|| IngestError::invalid(KIND, "missing integer 'interval_sec'"))?;
    let timestamp = timestamp_secs(value, KIND)?;
    let data = value
        .get("data")
        .and_then(Value::as_map)
        .ok_or_else(|| IngestError::invalid(KIND, "missing 'data' map"))?;

    let mut fields = Vec::with_capacity(data.len());
    for (name, field) in data {
        if name.starts_with(RESERVED_MARKER) {
            continue;
        }
        let field = match field {
            Value::Null => AggregateValue::Scalar(f64::NAN),
            Value::Int(_) | Value::Float(_) => AggregateValue::Scalar(field.as_f64().unwrap_or(f64::NAN)),
            Value::Array(items) => AggregateValue::Series(
                items.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect(),
            ),
            other => {
                tracing::debug!(field = %name, value_type = other.type_name(), "ignoring non-numeric aggregate field");
                continue;
            }
        };
        fields.push((name.clone(), field));
    }

    Ok(CanonicalRecord::Aggregate { interval_sec, timestamp, fields })
}

// ═══════════════════════════════════════════════════════════════
//  Event
// ═══════════════════════════════════════════════════════════════

fn event(value: &Value) -> Result<CanonicalRecord, IngestError> {
    const KIND: &str = "event";

    let event_type = value
        .get_any(&["event_type", "eventType"])
        .and_then(Value::as_str)
        .ok_or_else(|| IngestError::invalid(KIND, "missing 'event_type'"))?;
    let channel = value
        .get("channel")
        .and_then(Value::as_str)
        .ok_or_else(|| IngestError::invalid(KIND, "missing 'channel'"))?;
    let timestamp = timestamp_secs(value, KIND)?;
    let fields = match value.get("data") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Map(entries)) => entries.clone(),
        Some(other) => {
            return Err(IngestError::invalid(
                KIND,
                format!("'data' is {}, expected map", other.type_name()),
            ));
        }
    };

    Ok(CanonicalRecord::Event {
        event_type: event_type.to_string(),
        channel: channel.to_string(),
        timestamp,
        fields,
    })
}

fn timestamp_secs(value: &Value, kind: &'static str) -> Result<f64, IngestError> {
    value
        .get("timestamp")
        .and_then(Value::as_f64)
        .filter(|ts| ts.is_finite())
        .ok_or_else(|| IngestError::invalid(kind, "missing or non-finite 'timestamp'"))
}
