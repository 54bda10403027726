use std::io;

/// Error type for proxy-vet operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The whole candidate aggregation failed, not just one source
    #[error("Aggregation failed: {0}")]
    Aggregation(String),

    #[error("Geolocation error: {0}")]
    Geo(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid stored value: {0}")]
    InvalidRecord(String),
}

/// Result type for proxy-vet operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<maxminddb::MaxMindDbError> for Error {
    fn from(err: maxminddb::MaxMindDbError) -> Self {
        Error::Geo(err.to_string())
    }
}
