use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use ingest_api::{IngestError, WritePayload, WriteSink};

// ═══════════════════════════════════════════════════════════════
//  InfluxDbConfig
// ═══════════════════════════════════════════════════════════════

fn default_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_org() -> String {
    "pqopen".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct InfluxDbConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_org")]
    pub org: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: String::new(),
            org: default_org(),
            timeout_secs: default_timeout_secs(),
            accept_invalid_certs: false,
        }
    }
}

impl InfluxDbConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(format!("influxdb url '{}' must start with http:// or https://", self.url));
        }
        if self.org.trim().is_empty() {
            return Err("influxdb org must not be empty".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("influxdb timeout_secs must be > 0".to_string());
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  InfluxDbSink
// ═══════════════════════════════════════════════════════════════

/// InfluxDB v2 write API client.
///
/// One HTTP request per write, nanosecond precision. The bucket is chosen
/// per call; org and token are fixed for the process.
pub struct InfluxDbSink {
    http: reqwest::Client,
    base_url: String,
    org: String,
    token: String,
}

impl InfluxDbSink {
    pub fn new(config: &InfluxDbConfig) -> Result<Self, IngestError> {
        config.validate().map_err(IngestError::Config)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| IngestError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            org: config.org.clone(),
            token: config.token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe `/health`. Ok(()) when the server reports itself ready.
    pub async fn health(&self) -> Result<(), IngestError> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| IngestError::Transport(format!("influxdb health: {e}")))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(IngestError::Transport(format!("influxdb health: {status}: {body}")))
        }
    }

    async fn post(&self, bucket: &str, body: String) -> Result<(), IngestError> {
        let resp = self
            .http
            .post(format!("{}/api/v2/write", self.base_url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", bucket),
                ("precision", "ns"),
            ])
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.token))
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| IngestError::write_backend(bucket, format!("request: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp
            .text()
            .await
            .map_err(|e| IngestError::write_backend(bucket, format!("read response: {e}")))?;
        Err(IngestError::write_backend(bucket, format!("{status}: {}", body.trim())))
    }
}

impl WriteSink for InfluxDbSink {
    fn write<'a>(
        &'a self,
        bucket: &'a str,
        payload: &'a WritePayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>> {
        Box::pin(async move {
            let body = payload.to_body();
            if body.is_empty() {
                return Ok(());
            }
            self.post(bucket, body).await
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // reqwest drops pooled connections with the client.
        Box::pin(async {
            tracing::debug!(url = %self.base_url, "influxdb sink closed");
        })
    }
}
