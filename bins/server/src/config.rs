use std::path::Path;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use pipeline::{BucketDefaults, TopicRouter};
use storage_influxdb::InfluxDbConfig;
use transport_mqtt::MqttConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "ingest-server", about = "MQTT telemetry ingestion into InfluxDB")]
pub struct Cli {
    /// Log filter directives, e.g. `debug` or `pipeline=trace,info`
    #[arg(long, global = true, env = "RUST_LOG", default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe and ingest until interrupted
    Serve(ServeArgs),
    /// Validate config and device file, then exit
    Check(CheckArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Write into memory instead of InfluxDB
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Clone, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Config file path plus the settings that are usually injected through
/// the environment. Anything set here wins over the file.
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,

    /// Device configuration (JSON)
    #[arg(long, env = "PQOPEN_DEVICE_CONFIG")]
    pub devices: Option<String>,

    #[arg(long, env = "PQOPEN_MQTT_HOST")]
    pub mqtt_host: Option<String>,

    #[arg(long, env = "PQOPEN_MQTT_PORT")]
    pub mqtt_port: Option<u16>,

    #[arg(long, env = "PQOPEN_MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "PQOPEN_MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// Subscription filter
    #[arg(long, env = "PQOPEN_MQTT_TOPIC")]
    pub mqtt_topic: Option<String>,

    #[arg(long, env = "PQOPEN_INFLUXDB_URL")]
    pub influxdb_url: Option<String>,

    #[arg(long, env = "PQOPEN_INFLUXDB_TOKEN", hide_env_values = true)]
    pub influxdb_token: Option<String>,

    #[arg(long, env = "PQOPEN_INFLUXDB_ORG")]
    pub influxdb_org: Option<String>,
}

impl ConfigArgs {
    /// Load the file (defaults if it does not exist), apply overrides and
    /// validate the result.
    pub fn resolve(&self) -> Result<ServerConfig, ServerError> {
        let mut config = if Path::new(&self.config).exists() {
            ServerConfig::load(&self.config)?
        } else {
            tracing::info!(config = %self.config, "config file not found, using defaults");
            ServerConfig::default()
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut ServerConfig) {
        if let Some(v) = &self.devices {
            config.devices = v.clone();
        }
        if let Some(v) = &self.mqtt_host {
            config.mqtt.host = v.clone();
        }
        if let Some(v) = self.mqtt_port {
            config.mqtt.port = v;
        }
        if let Some(v) = &self.mqtt_username {
            config.mqtt.username = Some(v.clone());
        }
        if let Some(v) = &self.mqtt_password {
            config.mqtt.password = Some(v.clone());
        }
        if let Some(v) = &self.mqtt_topic {
            config.mqtt.topic = v.clone();
        }
        if let Some(v) = &self.influxdb_url {
            config.influxdb.url = v.clone();
        }
        if let Some(v) = &self.influxdb_token {
            config.influxdb.token = v.clone();
        }
        if let Some(v) = &self.influxdb_org {
            config.influxdb.org = v.clone();
        }
    }
}

// ---- TOML Config ----

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Path of the device configuration file.
    #[serde(default = "default_devices")]
    pub devices: String,
    /// How long the loop may take to finish after a shutdown signal.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub influxdb: InfluxDbConfig,
    #[serde(default)]
    pub buckets: BucketDefaults,
}

fn default_devices() -> String {
    "config/device_config.json".to_string()
}
fn default_drain_timeout_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            drain_timeout_secs: default_drain_timeout_secs(),
            mqtt: MqttConfig::default(),
            influxdb: InfluxDbConfig::default(),
            buckets: BucketDefaults::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.devices.trim().is_empty() {
            return Err(ServerError::invalid("devices path must not be empty"));
        }
        if self.drain_timeout_secs == 0 {
            return Err(ServerError::invalid("drain_timeout_secs must be > 0"));
        }
        self.mqtt.validate().map_err(ServerError::invalid)?;
        self.influxdb.validate().map_err(ServerError::invalid)?;
        self.buckets.validate()?;
        Ok(())
    }

    pub fn router(&self) -> TopicRouter {
        match self.mqtt.prefix_segments {
            Some(n) => TopicRouter::new(n),
            None => TopicRouter::from_filter(&self.mqtt.topic),
        }
    }
}
