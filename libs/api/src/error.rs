/// Per-message failure taxonomy of the ingestion pipeline.
///
/// Every variant except `Config` and `Transport` is recovered inside the
/// ingest loop: the message (or bulk element) is logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Topic does not have enough segments, or the device segment is empty.
    #[error("malformed topic '{topic}': {reason}")]
    MalformedTopic { topic: String, reason: String },

    /// Device id absent from the registry. Expected noise, not a fault.
    #[error("device '{0}' is not configured")]
    UnconfiguredDevice(String),

    /// Unknown encoding, bad compression or unparsable bytes.
    #[error("payload decode ({encoding}): {detail}")]
    PayloadDecode { encoding: String, detail: String },

    #[error("unsupported data kind '{0}'")]
    UnsupportedDataKind(String),

    /// Payload decoded but does not have the shape its data kind requires.
    #[error("invalid {kind} payload: {detail}")]
    InvalidPayload { kind: &'static str, detail: String },

    /// Storage backend unreachable or rejected the write.
    #[error("write to bucket '{bucket}': {detail}")]
    WriteBackend { bucket: String, detail: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("config: {0}")]
    Config(String),
}

impl IngestError {
    pub fn malformed_topic(topic: &str, reason: impl Into<String>) -> Self {
        Self::MalformedTopic { topic: topic.to_string(), reason: reason.into() }
    }

    pub fn decode(encoding: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::PayloadDecode { encoding: encoding.into(), detail: detail.into() }
    }

    pub fn invalid(kind: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidPayload { kind, detail: detail.into() }
    }

    pub fn write_backend(bucket: &str, detail: impl Into<String>) -> Self {
        Self::WriteBackend { bucket: bucket.to_string(), detail: detail.into() }
    }

    /// Stable snake_case label, logged as a structured field.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::MalformedTopic { .. } => "malformed_topic",
            IngestError::UnconfiguredDevice(_) => "unconfigured_device",
            IngestError::PayloadDecode { .. } => "payload_decode",
            IngestError::UnsupportedDataKind(_) => "unsupported_data_kind",
            IngestError::InvalidPayload { .. } => "invalid_payload",
            IngestError::WriteBackend { .. } => "write_backend",
            IngestError::Transport(_) => "transport",
            IngestError::Config(_) => "config",
        }
    }
}
