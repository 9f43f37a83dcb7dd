use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Missing argument: {0}")]
    MissingArgument(String),
}

impl From<crate::config::ConfigError> for StartupError {
    fn from(e: crate::config::ConfigError) -> Self {
        StartupError::ConfigError(e.to_string())
    }
}

impl From<crate::server::persist::StoreError> for StartupError {
    fn from(e: crate::server::persist::StoreError) -> Self {
        StartupError::DatabaseError(e.to_string())
    }
}
