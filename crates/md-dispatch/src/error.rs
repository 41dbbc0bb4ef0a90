//! Error types for the dispatch engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Gateway rejected message: {0}")]
    Rejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for DispatchError {
    fn from(err: redis::RedisError) -> Self {
        DispatchError::Cache(err.to_string())
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::Gateway(err.to_string())
    }
}

#[cfg(any(feature = "mysql", feature = "sqlite"))]
impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        DispatchError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
