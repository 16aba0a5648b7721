//! Error types for registry clients

/// Error type shared by all registry backends
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<config::ConfigError> for RegistryError {
    fn from(value: config::ConfigError) -> Self {
        RegistryError::Config(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
