//! Application-wide error types.

use backoff_engine::{ErrorClass, RetryError};
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}: {detail}")]
    BackendStatus { status: u16, detail: String },

    #[error("push channel error: {0}")]
    Push(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("referenced content not found: {0}")]
    ContentNotFound(String),

    #[error("no cached content available")]
    CacheEmpty,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("retry budget exhausted after {attempts} attempts: {source}")]
    RetryExhausted { attempts: u32, source: Box<Error> },

    #[error("circuit open, backend treated as unreachable")]
    CircuitOpen,

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Classify for the retry controller.
    ///
    /// Timeouts, connect errors and 5xx/429 statuses are transient; every
    /// other backend status (auth failures, not-found, validation) is
    /// permanent.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            Error::BackendStatus { status, .. } => {
                if *status >= 500 || *status == 429 {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            Error::Push(_) | Error::Io(_) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Whether this error means the backend could not be reached at all, so
    /// the caller should fall back to cached content.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Error::RetryExhausted { .. } | Error::CircuitOpen | Error::Cancelled
        )
    }
}

impl From<RetryError<Error>> for Error {
    fn from(err: RetryError<Error>) -> Self {
        match err {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { attempts, source } => Error::RetryExhausted {
                attempts,
                source: Box::new(source),
            },
            RetryError::CircuitOpen => Error::CircuitOpen,
            RetryError::Cancelled => Error::Cancelled,
        }
    }
}
