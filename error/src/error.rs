use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-hinted wait, e.g. from an `x-ms-retry-after-ms` header.
        retry_after: Option<Duration>,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Terminal(String),
}

/// The retry classification of an error. Everything that is not rate limiting,
/// a timeout or a brief unavailability is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    Timeout,
    Unavailable,
    Other,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Other)
    }
}

impl TransferError {
    /// Builds the matching variant for an HTTP-style status code.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => TransferError::Auth(message),
            404 => TransferError::NotFound(message),
            408 => TransferError::Timeout(message),
            429 => TransferError::RateLimited {
                message,
                retry_after,
            },
            503 => TransferError::Unavailable(message),
            _ => TransferError::Terminal(format!("status {status}: {message}")),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::RateLimited { .. } => ErrorKind::RateLimited,
            TransferError::Timeout(_) => ErrorKind::Timeout,
            TransferError::Unavailable(_) => ErrorKind::Unavailable,
            TransferError::Terminal(msg) => classify_message(msg),
            _ => ErrorKind::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransferError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Classifies an opaque message by status substrings or their textual aliases.
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("too many requests") || lower.contains("request rate")
    {
        ErrorKind::RateLimited
    } else if lower.contains("408") || lower.contains("timeout") || lower.contains("timed out") {
        ErrorKind::Timeout
    } else if lower.contains("503") || lower.contains("service unavailable") {
        ErrorKind::Unavailable
    } else {
        ErrorKind::Other
    }
}

impl From<String> for TransferError {
    fn from(s: String) -> Self {
        TransferError::Terminal(s)
    }
}

impl From<&str> for TransferError {
    fn from(s: &str) -> Self {
        TransferError::Terminal(s.to_string())
    }
}
