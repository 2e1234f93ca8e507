#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("device config read ({path}): {source}")]
    DeviceConfigRead { path: String, source: std::io::Error },

    #[error("device config parse: {0}")]
    DeviceConfigParse(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),
}
