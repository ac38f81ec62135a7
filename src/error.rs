//! Unified error handling for the klassgram crate
//!
//! A single `Error` enum covers the whole pipeline, with classification
//! helpers that drive the retry loop (`is_transient`) and the process
//! exit status (`is_hard_failure`).
//!
//! Propagation policy: only `LockHeld`, `Auth` and `Config` abort a run.
//! Everything else is contained at the granularity of the unit it
//! affects (class, attachment, post) by the sync runner.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the klassgram crate
#[derive(Error, Debug)]
pub enum Error {
    /// Another sync run currently holds the run lock
    #[error("another sync run holds the lock")]
    LockHeld,

    /// Login to the content source failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Fetching posts for one class failed
    #[error("failed to fetch posts for '{klass}': {reason}")]
    Fetch { klass: String, reason: String },

    /// Downloading one attachment failed
    #[error("failed to materialize attachment '{name}': {reason}")]
    Attachment { name: String, reason: String },

    /// The messaging endpoint rejected a request
    #[error("delivery rejected with status {status}: {description}")]
    Delivery {
        status: u16,
        description: String,
        /// Server-suggested wait, from the endpoint's retry-after hint
        retry_after: Option<Duration>,
    },

    /// Transient delivery failures persisted through every retry attempt
    #[error("delivery gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// I/O errors (ledger, lock file, posts dump)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check whether this failure is worth retrying
    ///
    /// Retryable: rate-limit and server-busy statuses (408, 429, 5xx)
    /// plus network-level timeouts and connection failures. Client
    /// errors other than 429 are final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Delivery { status, .. } => is_retryable_status(*status),
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Server-suggested retry delay, if the endpoint provided one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Delivery { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Failures that abort the run before any delivery happened
    ///
    /// The caller (a scheduler, typically) should alert on these; a run
    /// that merely logged per-post failures is a soft success.
    pub fn is_hard_failure(&self) -> bool {
        matches!(self, Self::LockHeld | Self::Auth(_) | Self::Config(_))
    }
}

/// Status codes that signal a transient endpoint condition
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(408));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(504));

        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(403));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn test_delivery_transient() {
        let err = Error::Delivery {
            status: 429,
            description: "Too Many Requests".to_string(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        let err = Error::Delivery {
            status: 400,
            description: "Bad Request".to_string(),
            retry_after: None,
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_hard_failures() {
        assert!(Error::LockHeld.is_hard_failure());
        assert!(Error::Auth("bad password".to_string()).is_hard_failure());
        assert!(Error::config("missing token").is_hard_failure());

        let soft = Error::Fetch {
            klass: "CM2".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(!soft.is_hard_failure());
        assert!(!soft.is_transient());
    }
}
