use reqwest::StatusCode;
use sqlx::Error as SqlxError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error as ThisError;

/// SQLSTATE raised by `CREATE DATABASE` when the name is taken.
const DUPLICATE_DATABASE: &str = "42P04";

#[derive(Debug, ThisError)]
pub enum StackInitError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database configuration unavailable: {0}")]
    Unconfigured(String),

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    #[error("database \"{name}\" already exists")]
    DatabaseExists { name: String },

    #[error("Failed to read init script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Response URL rejected the response with status: {0}")]
    ResponseStatus(StatusCode),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("Response was not delivered before the invocation deadline")]
    ResponseDeadline,

    #[error("Unsupported request type: {0}")]
    UnsupportedRequestType(String),
}

impl From<figment::Error> for StackInitError {
    fn from(e: figment::Error) -> Self {
        StackInitError::Config(Box::new(e))
    }
}

impl StackInitError {
    /// Translate a `CREATE DATABASE` failure, singling out the duplicate-name case.
    pub fn from_create_database(e: SqlxError, name: &str) -> Self {
        match &e {
            SqlxError::Database(db_err) if db_err.code().as_deref() == Some(DUPLICATE_DATABASE) => {
                StackInitError::DatabaseExists {
                    name: name.to_string(),
                }
            }
            _ => StackInitError::Database(e),
        }
    }
}

/// Whether an operation that produced this error is worth attempting again.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for StackInitError {
    fn is_retryable(&self) -> bool {
        match self {
            StackInitError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StackInitError::ResponseStatus(code) => {
                code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
