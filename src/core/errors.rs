// src/core/errors.rs

//! Defines the primary error type for the entire wrapper.

use thiserror::Error;

/// The main error enum, representing all failure kinds the wrapper can surface.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
///
/// Classification of raw driver failures into these kinds is performed by the
/// active database dialect's error handler (SQLSTATE codes plus message
/// substrings), never by downcasting driver exception types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DroverError {
    /// Authentication against the database instance was rejected.
    #[error("Login error: {0}")]
    Login(String),

    /// The connection to the current instance was lost or timed out.
    #[error("Network error: {0}")]
    Network(String),

    /// The server rejected the operation for authorization reasons.
    #[error("Access error: {0}")]
    Access(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    /// A failover completed while a transaction was open. The session has a
    /// healthy target again, but the fate of the in-flight transaction is
    /// unknown; the caller must re-run it.
    #[error("Transaction resolution unknown: {0}")]
    TransactionResolutionUnknown(String),

    /// The session recovered onto a new target. The interrupted operation was
    /// not retried; the caller must re-issue it.
    #[error("The active connection has changed due to a failover. Retry the last operation. {0}")]
    FailoverSuccess(String),

    /// Failover exhausted its deadline without finding a usable target.
    #[error("Failover failed: {0}")]
    FailoverFailed(String),

    /// A host selection strategy name was requested that no selector accepts.
    #[error("Unsupported host selection strategy '{0}'")]
    UnsupportedStrategy(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DroverError {
    /// True for errors that should trigger the failover state machine.
    pub fn is_network(&self) -> bool {
        matches!(self, DroverError::Network(_))
    }

    /// True for errors eligible for the auth plugins' regenerate-once retry.
    pub fn is_login(&self) -> bool {
        matches!(self, DroverError::Login(_))
    }

    /// True for the three errors a caller may observe when the current target
    /// was swapped underneath an in-flight operation.
    pub fn is_failover_related(&self) -> bool {
        matches!(
            self,
            DroverError::FailoverSuccess(_)
                | DroverError::FailoverFailed(_)
                | DroverError::TransactionResolutionUnknown(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DroverError>;

// --- From trait implementations for easy error conversion ---

impl From<serde_json::Error> for DroverError {
    fn from(e: serde_json::Error) -> Self {
        DroverError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<url::ParseError> for DroverError {
    fn from(e: url::ParseError) -> Self {
        DroverError::Configuration(format!("Invalid connection URL: {e}"))
    }
}
