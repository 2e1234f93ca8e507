use std::fmt;

use ingest_api::IngestError;

/// Record family declared by the topic's data-kind segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Dataseries,
    Aggregate,
    Event,
}

impl DataKind {
    pub fn parse(segment: &str) -> Result<Self, IngestError> {
        match segment {
            "dataseries" => Ok(DataKind::Dataseries),
            "agg_data" => Ok(DataKind::Aggregate),
            "event" => Ok(DataKind::Event),
            other => Err(IngestError::UnsupportedDataKind(other.to_string())),
        }
    }

    /// Topic segment spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Dataseries => "dataseries",
            DataKind::Aggregate => "agg_data",
            DataKind::Event => "event",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content encoding declared by the topic's last segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// `json`
    Plain,
    /// `gjson`: gzip-compressed JSON.
    Compressed,
    /// `cbor`
    Binary,
}

impl Encoding {
    pub fn parse(segment: &str) -> Result<Self, IngestError> {
        match segment {
            "json" => Ok(Encoding::Plain),
            "gjson" => Ok(Encoding::Compressed),
            "cbor" => Ok(Encoding::Binary),
            other => Err(IngestError::decode(other, "unknown encoding")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Plain => "json",
            Encoding::Compressed => "gjson",
            Encoding::Binary => "cbor",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured address of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub device_id: String,
    pub data_kind: DataKind,
    pub encoding: Encoding,
}

/// Parses `{prefix.../}{device}/{kind}/{encoding}`.
///
/// Only the segment count is checked against the prefix; the prefix
/// content itself is whatever the subscription delivered, and deeper
/// prefixes are tolerated because addressing is taken from the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicRouter {
    prefix_segments: usize,
}

impl TopicRouter {
    pub fn new(prefix_segments: usize) -> Self {
        Self { prefix_segments }
    }

    /// Derive the prefix depth from the subscription filter.
    ///
    /// `private/#` → 1, `#` → 0. A filter without `#` spells out the
    /// address segments itself (`private/+/+/+` → 1).
    pub fn from_filter(filter: &str) -> Self {
        let segments: Vec<&str> = filter.split('/').collect();
        let prefix_segments = match segments.iter().position(|s| *s == "#") {
            Some(pos) => pos,
            None => segments.len().saturating_sub(3),
        };
        Self { prefix_segments }
    }

    pub fn prefix_segments(&self) -> usize {
        self.prefix_segments
    }

    pub fn route(&self, topic: &str) -> Result<ParsedTopic, IngestError> {
        let segments: Vec<&str> = topic.split('/').collect();
        let required = self.prefix_segments + 3;
        if segments.len() < required {
            return Err(IngestError::malformed_topic(
                topic,
                format!("{} segments, need at least {required}", segments.len()),
            ));
        }

        let n = segments.len();
        let (device_id, kind, encoding) = (segments[n - 3], segments[n - 2], segments[n - 1]);
        if device_id.is_empty() {
            return Err(IngestError::malformed_topic(topic, "empty device id"));
        }

        Ok(ParsedTopic {
            device_id: device_id.to_string(),
            data_kind: DataKind::parse(kind)?,
            encoding: Encoding::parse(encoding)?,
        })
    }
}

/// Kind and encoding of a bulk-envelope element: the last two segments of
/// its subtopic, same spelling as the top-level suffix.
pub fn parse_subtopic(subtopic: &str) -> Result<(DataKind, Encoding), IngestError> {
    let segments: Vec<&str> = subtopic.split('/').collect();
    if segments.len() < 2 {
        return Err(IngestError::malformed_topic(
            subtopic,
            "subtopic needs at least kind/encoding",
        ));
    }
    let n = segments.len();
    Ok((DataKind::parse(segments[n - 2])?, Encoding::parse(segments[n - 1])?))
}
