pub mod classify;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod topic;
pub mod value;

pub use classify::{AggregateValue, CanonicalRecord, Channel, Rejection, classify};
pub use config::BucketDefaults;
pub use decode::decode;
pub use encode::encode;
pub use error::PipelineError;
pub use ingest::{IngestContext, IngestStats, Ingestor, LoopState, spawn_ingestor};
pub use registry::{DeviceMeta, DeviceRegistry};
pub use topic::{DataKind, Encoding, ParsedTopic, TopicRouter};
pub use value::Value;
