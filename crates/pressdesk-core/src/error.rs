//! Error types shared by every Pressdesk crate.

use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum PressdeskError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PressdeskError>;

/// Failure reported by a mail transport.
///
/// Transient failures are retried by the delivery loop; permanent ones
/// (malformed address, 5xx rejection) are not.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::Permanent(_))
    }
}

/// Failure reported by a template renderer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("render failed: {0}")]
    Failed(String),
}
