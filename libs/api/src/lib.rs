//! Shared types of the ingestion service: the transport message, the
//! per-message error taxonomy, InfluxDB line-protocol primitives and the
//! source/sink traits the pipeline is wired through.

mod error;
mod line;
mod sink;
mod source;

pub use error::IngestError;
pub use line::{FieldValue, LineBuilder, Point, TagSet, WritePayload};
pub use sink::WriteSink;
pub use source::{MessageSource, TransportMessage};
