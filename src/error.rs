use thiserror::Error;

/// Main error type for the hub
#[derive(Error, Debug)]
pub enum HubError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Missing required config: {0}")]
    MissingConfig(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Key/value store error: {0}")]
    Kv(#[from] redis::RedisError),

    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Webhook auth errors
    #[error("Signature error: {0}")]
    Signature(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for HubError
pub type Result<T> = std::result::Result<T, HubError>;
