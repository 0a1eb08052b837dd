//! Error types for the shared infrastructure layer

use redis::RedisError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Errors raised while talking to PostgreSQL
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred while establishing the pool
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Schema could not be created or is not what we expect
    #[error("Database schema error: {0}")]
    Schema(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Errors raised while talking to Redis
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(#[source] RedisError),

    #[error("Redis command error: {0}")]
    Command(#[source] RedisError),

    #[error("Redis configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Type alias for Result with CacheError
pub type CacheResult<T> = Result<T, CacheError>;
