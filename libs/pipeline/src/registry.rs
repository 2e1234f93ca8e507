use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use ingest_api::TagSet;

use crate::PipelineError;
use crate::topic::DataKind;

/// Static metadata of one field device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceMeta {
    pub location_name: String,
    pub location_lat: f64,
    pub location_lon: f64,
    #[serde(default, rename = "db_dataseries_bucket")]
    pub dataseries_bucket: Option<String>,
    #[serde(default, rename = "db_aggregated_bucket")]
    pub aggregate_bucket: Option<String>,
    #[serde(default, rename = "db_event_bucket")]
    pub event_bucket: Option<String>,
}

impl DeviceMeta {
    pub fn new(location_name: impl Into<String>, location_lat: f64, location_lon: f64) -> Self {
        Self {
            location_name: location_name.into(),
            location_lat,
            location_lon,
            dataseries_bucket: None,
            aggregate_bucket: None,
            event_bucket: None,
        }
    }

    /// Device-level bucket for `kind`. Empty strings count as unset.
    pub fn bucket_override(&self, kind: DataKind) -> Option<&str> {
        let bucket = match kind {
            DataKind::Dataseries => &self.dataseries_bucket,
            DataKind::Aggregate => &self.aggregate_bucket,
            DataKind::Event => &self.event_bucket,
        };
        bucket.as_deref().filter(|b| !b.is_empty())
    }

    /// Location tags attached to every line written for this device.
    pub fn location_tags(&self) -> TagSet {
        TagSet::from([
            ("location_name".to_string(), self.location_name.clone()),
            ("location_lat".to_string(), self.location_lat.to_string()),
            ("location_lon".to_string(), self.location_lon.to_string()),
        ])
    }
}

/// Immutable device id → metadata map, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceMeta>,
}

impl DeviceRegistry {
    /// Load the JSON device file: `{ "<device id>": { "location_name": ..., ... } }`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::DeviceConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let devices: HashMap<String, DeviceMeta> = serde_json::from_str(json)?;
        Ok(Self { devices })
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceMeta> {
        self.devices.get(device_id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Device ids, sorted.
    pub fn device_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl FromIterator<(String, DeviceMeta)> for DeviceRegistry {
    fn from_iter<I: IntoIterator<Item = (String, DeviceMeta)>>(iter: I) -> Self {
        Self { devices: iter.into_iter().collect() }
    }
}
