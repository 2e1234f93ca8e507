use std::future::Future;
use std::pin::Pin;

use crate::{IngestError, WritePayload};

/// Storage backend receiving encoded writes.
///
/// Owned exclusively by the ingest loop; no retry or buffering is expected
/// from implementations. A failed write is reported and forgotten.
pub trait WriteSink: Send + Sync {
    /// Write one payload into `bucket`.
    fn write<'a>(
        &'a self,
        bucket: &'a str,
        payload: &'a WritePayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>>;

    /// Release the storage connection. Called once, after the last write.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
