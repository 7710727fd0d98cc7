//! Error types for lpflow.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Intent classifier errors. Any of these triggers the deterministic fallback.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Classification timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Organization {org_id} has no deal {deal_id}")]
    DealNotFound { org_id: String, deal_id: String },

    #[error("Email not found: {0}")]
    EmailNotFound(String),

    #[error("Malformed inbound email: {0}")]
    MalformedEmail(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
