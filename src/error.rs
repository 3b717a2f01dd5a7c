use thiserror::Error;

/// Boxed error returned by user-supplied middleware factories
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for the asset server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config file: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Middleware factory failed: {0}")]
    Middleware(BoxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ServerError>;
