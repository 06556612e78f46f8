//! Error types for the fulfillment relay.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("External service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Webhook signature or signing headers rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A CRM entity required to create the job does not exist
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Fulfillment attempt failed and was recorded as `failed`.
    /// Details live in the stored record.
    #[error("Fulfillment failed for {0}")]
    FulfillmentFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Rate limit exceeded")]
    RateLimited,
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// Unique constraint violated (concurrent duplicate insert)
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(db_err.message().to_string())
            }
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Connection(err.to_string()),
            _ => Self::Query(err.to_string()),
        }
    }
}

/// Errors from payment gateway, CRM, email provider and processors
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Rate-limit responses persisted after the retry budget was spent
    #[error("Rate limited by {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Client misconfigured: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ExternalServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::ParseError(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Payload validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {0}")]
    Multiple(String),
}

/// Failure of the monitoring side channel.
///
/// Never converted into [`AppError`]; the forwarder logs it and drops it.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Chat channel rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Chat channel unreachable: {0}")]
    Transport(String),
}
