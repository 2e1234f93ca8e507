use serde::Deserialize;

use crate::PipelineError;
use crate::registry::DeviceMeta;
use crate::topic::DataKind;

// ═══════════════════════════════════════════════════════════════
//  Bucket defaults
// ═══════════════════════════════════════════════════════════════

/// Process-wide destination bucket per record kind. A device entry may
/// override any of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BucketDefaults {
    #[serde(default = "default_dataseries_bucket")]
    pub dataseries: String,
    #[serde(default = "default_aggregate_bucket")]
    pub aggregate: String,
    #[serde(default = "default_event_bucket")]
    pub event: String,
}

impl Default for BucketDefaults {
    fn default() -> Self {
        Self {
            dataseries: default_dataseries_bucket(),
            aggregate: default_aggregate_bucket(),
            event: default_event_bucket(),
        }
    }
}

fn default_dataseries_bucket() -> String {
    "short_term".into()
}
fn default_aggregate_bucket() -> String {
    "long_term".into()
}
fn default_event_bucket() -> String {
    "events".into()
}

impl BucketDefaults {
    pub fn default_for(&self, kind: DataKind) -> &str {
        match kind {
            DataKind::Dataseries => &self.dataseries,
            DataKind::Aggregate => &self.aggregate,
            DataKind::Event => &self.event,
        }
    }

    /// Device override if present, process default otherwise.
    pub fn resolve<'a>(&'a self, kind: DataKind, device: &'a DeviceMeta) -> &'a str {
        device
            .bucket_override(kind)
            .unwrap_or_else(|| self.default_for(kind))
    }

    /// Every default must name a bucket, so a resolved bucket is never empty.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for kind in [DataKind::Dataseries, DataKind::Aggregate, DataKind::Event] {
            if self.default_for(kind).trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "buckets: default bucket for '{kind}' is empty"
                )));
            }
        }
        Ok(())
    }
}
