//! Error types for fare-crawler
//!
//! This module provides the crate-wide error type. Every variant maps to a
//! stable *error kind* string ([`Error::kind`]), which is what the retry
//! policy's `retry_on_errors` allow-list is matched against.

use thiserror::Error;

/// Result type alias for fare-crawler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fare-crawler
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "task.max_concurrent_tasks")
        key: Option<String>,
    },

    /// Transport-level failure talking to a remote endpoint
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote endpoint answered with a non-success status code
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code returned by the server
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration could not be parsed
    #[error("invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A search response document did not have the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// Task is missing the parameters it needs to run (never retried)
    #[error("task {task_id} is missing its request parameters")]
    MissingParameters {
        /// The task whose parameters are missing
        task_id: String,
    },

    /// Writing to a persistence sink failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Task id is not known to the task store
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Requested status change is not an edge of the task lifecycle
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The task that was being updated
        task_id: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// The acquisition callback panicked
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// Shutdown in progress - not admitting new work
    #[error("shutdown in progress: not admitting new tasks")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Persistence sink errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to open or migrate the tabular store
    #[error("failed to open fare table store: {0}")]
    ConnectionFailed(String),

    /// Failed to apply a schema migration
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Writing fare rows failed
    #[error("failed to write fare rows: {0}")]
    TableWrite(String),

    /// Writing a JSON blob failed
    #[error("failed to write blob {path}: {reason}")]
    BlobWrite {
        /// Blob path that could not be written
        path: String,
        /// Underlying failure
        reason: String,
    },
}

impl Error {
    /// Stable error-kind name, matched against `retry.retry_on_errors`
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config { .. } | Error::Yaml(_) => "ConfigError",
            Error::Network(e) => {
                if e.is_timeout() {
                    "Timeout"
                } else if e.is_connect() {
                    "ConnectionError"
                } else if e.is_decode() {
                    "JSONDecodeError"
                } else {
                    "RequestError"
                }
            }
            Error::Http { .. } => "HTTPError",
            Error::Serialization(_) => "JSONDecodeError",
            Error::Parse(_) => "ParseError",
            Error::MissingParameters { .. } => "MissingParameters",
            Error::Storage(_) => "StorageError",
            Error::Sqlx(_) => "DatabaseError",
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut => "Timeout",
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::BrokenPipe => "ConnectionError",
                _ => "IOError",
            },
            Error::TaskNotFound(_) => "TaskNotFound",
            Error::InvalidTransition { .. } => "InvalidTransition",
            Error::TaskPanicked(_) => "TaskPanicked",
            Error::ShuttingDown => "ShuttingDown",
            Error::Other(_) => "Other",
        }
    }

    /// Malformed-task faults are terminal no matter what the allow-list says
    pub fn is_malformed_task(&self) -> bool {
        matches!(self, Error::MissingParameters { .. })
    }

    /// Shorthand for a configuration error on a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
