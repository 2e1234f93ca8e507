//! InfluxDB v2 line protocol.
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! Numeric fields are always written as floats with six decimal digits.
//! Non-finite floats never reach the output: the builder drops them before
//! deciding on a separator.

use std::collections::BTreeMap;
use std::fmt;

/// Tag set, kept sorted by key (canonical line-protocol order).
pub type TagSet = BTreeMap<String, String>;

/// A value that can be stored in an InfluxDB field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    String(String),
    Boolean(bool),
}

impl FieldValue {
    /// `false` for NaN and infinities, which line protocol cannot carry.
    pub fn is_writable(&self) -> bool {
        match self {
            FieldValue::Float(v) => v.is_finite(),
            _ => true,
        }
    }

    /// Format this value for line protocol.
    ///
    /// - Float: fixed six decimals (`3.140000`)
    /// - String: double-quoted, `\` and `"` escaped
    /// - Boolean: `true` / `false`
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{v:.6}"),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{escaped}\"")
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line_protocol())
    }
}

/// Builds a single line. Fields are appended one by one; a separator is
/// written only in front of a field that is actually kept, so skipped
/// values can never leave a dangling comma behind.
pub struct LineBuilder {
    line: String,
    fields: usize,
}

impl LineBuilder {
    /// Tags whose key or value is empty after sanitizing are left out:
    /// line protocol has no representation for an empty tag value.
    pub fn new(measurement: &str, tags: &TagSet) -> Self {
        let mut line = escape_measurement(&sanitize(measurement));
        for (key, value) in tags {
            let (key, value) = (sanitize(key), sanitize(value));
            if key.is_empty() || value.is_empty() {
                continue;
            }
            line.push(',');
            line.push_str(&escape_key(&key));
            line.push('=');
            line.push_str(&escape_key(&value));
        }
        Self { line, fields: 0 }
    }

    /// Append a field. Non-writable values and empty keys are skipped.
    pub fn field(&mut self, key: &str, value: &FieldValue) -> &mut Self {
        let key = sanitize(key);
        if key.is_empty() || !value.is_writable() {
            return self;
        }
        self.line.push(if self.fields == 0 { ' ' } else { ',' });
        self.line.push_str(&escape_key(&key));
        self.line.push('=');
        self.line.push_str(&value.to_line_protocol());
        self.fields += 1;
        self
    }

    pub fn float(&mut self, key: &str, value: f64) -> &mut Self {
        self.field(key, &FieldValue::Float(value))
    }

    pub fn field_count(&self) -> usize {
        self.fields
    }

    /// Terminate the line. `None` when no field was kept: a line without
    /// fields is rejected by the storage backend.
    pub fn finish(mut self, timestamp_ns: i64) -> Option<String> {
        if self.fields == 0 {
            return None;
        }
        self.line.push(' ');
        self.line.push_str(&timestamp_ns.to_string());
        Some(self.line)
    }
}

/// Structured point, serialized to line protocol by the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: TagSet,
    pub fields: Vec<(String, FieldValue)>,
    pub timestamp_ns: i64,
}

impl Point {
    pub fn to_line(&self) -> Option<String> {
        let mut builder = LineBuilder::new(&self.measurement, &self.tags);
        for (key, value) in &self.fields {
            builder.field(key, value);
        }
        builder.finish(self.timestamp_ns)
    }
}

/// What one sink write carries.
#[derive(Debug, Clone, PartialEq)]
pub enum WritePayload {
    Lines(Vec<String>),
    Point(Point),
}

impl WritePayload {
    pub fn line_count(&self) -> usize {
        match self {
            WritePayload::Lines(lines) => lines.len(),
            WritePayload::Point(point) => usize::from(point.to_line().is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.line_count() == 0
    }

    /// Request body for the write API: one line per row, `\n`-separated.
    pub fn to_body(&self) -> String {
        match self {
            WritePayload::Lines(lines) => lines.join("\n"),
            WritePayload::Point(point) => point.to_line().unwrap_or_default(),
        }
    }

    /// Render into plain lines, so payloads for one bucket can be merged.
    pub fn into_lines(self) -> Vec<String> {
        match self {
            WritePayload::Lines(lines) => lines,
            WritePayload::Point(point) => point.to_line().into_iter().collect(),
        }
    }

    /// Append `other` to this payload. The result is always `Lines`.
    pub fn merge(&mut self, other: WritePayload) {
        let mut lines = std::mem::replace(self, WritePayload::Lines(Vec::new())).into_lines();
        lines.extend(other.into_lines());
        *self = WritePayload::Lines(lines);
    }
}

/// Line breaks end a line and a trailing backslash would escape the
/// following separator; neither can be escaped in names or tag values.
fn sanitize(s: &str) -> String {
    s.replace(['\n', '\r'], " ").trim_end_matches('\\').to_string()
}

/// Spaces and commas must be escaped in measurement names.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys: commas, equals signs and spaces.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
