//! Error types for the authorization core

use thiserror::Error;

/// Authorization and data-access errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The active rule set denies the operation on this record.
    ///
    /// Deliberately carries no rule detail.
    #[error("Forbidden")]
    Forbidden,

    /// The record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller attributes could not be compiled into a rule set
    #[error("Policy construction failed: {0}")]
    PolicyConstruction(String),

    /// Invalid input (bad field names, malformed records)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The backend returned output that does not fit the operation
    #[error("Unexpected backend output for {0}")]
    UnexpectedOutput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
