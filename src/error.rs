//! Library error type.
//!
//! Every fallible operation in the pipeline returns [`RagError`]. The
//! variants follow the failure classes the service distinguishes when it
//! builds a response: connectivity, malformed input, external-service
//! failures and schema mismatches. [`RagError::code`] gives the stable
//! machine-readable code used in HTTP error bodies.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    /// The request itself is malformed (empty text, unsupported upload, bad parameters).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The database could not be reached or the pool is gone.
    #[error("database unavailable: {0}")]
    Connectivity(String),

    #[error("database error: {0}")]
    Database(String),

    /// The database cannot hold the requested schema. `hint` tells the operator what to change.
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String, hint: String },

    /// An embedding or LLM service failed.
    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl RagError {
    pub fn invalid(message: impl Into<String>) -> Self {
        RagError::InvalidInput(message.into())
    }

    pub fn upstream(service: &'static str, message: impl std::fmt::Display) -> Self {
        RagError::Upstream {
            service,
            message: message.to_string(),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::InvalidInput(_) => "bad_request",
            RagError::NotFound(_) => "not_found",
            RagError::Connectivity(_) => "database_unavailable",
            RagError::Database(_) => "database_error",
            RagError::SchemaMismatch { .. } => "schema_mismatch",
            RagError::Upstream { .. } => "upstream_error",
            RagError::Config(_) => "config_error",
        }
    }

    /// Remediation hint, when the error carries one.
    pub fn hint(&self) -> Option<&str> {
        match self {
            RagError::SchemaMismatch { hint, .. } => Some(hint),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => RagError::Connectivity(err.to_string()),
            other => RagError::Database(other.to_string()),
        }
    }
}
