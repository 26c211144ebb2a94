//! Error types.
//!
//! [`SourceError`] describes a failed unit of work inside a source (one
//! batch, one package query, one detail fetch). It never escapes a scan:
//! sources and the aggregator log it and carry on with partial results.
//!
//! [`ScanError`] covers faults detected before any I/O happens.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("failed to encode request body: {0}")]
    Encode(#[from] std::io::Error),
}

impl SourceError {
    /// Maps a transport error, keeping timeouts distinguishable.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_decode() {
            SourceError::Decode {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            SourceError::Network {
                url: url.to_string(),
                source: err,
            }
        }
    }

    pub fn decode(url: &str, message: impl Into<String>) -> Self {
        SourceError::Decode {
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// HTTP status of the failed response, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            SourceError::Status { status, .. } => Some(*status),
            SourceError::Network { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Default retry predicate.
    ///
    /// Client faults (400, 401, 403, 404) and malformed payloads are
    /// permanent; everything else (5xx, timeouts, resets) is retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Decode { .. } | SourceError::Encode(_) => false,
            _ => !matches!(self.status(), Some(400 | 401 | 403 | 404)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("at least one vulnerability source must be configured")]
    NoSources,

    #[error("failed to initialize source: {0}")]
    Source(#[from] SourceError),
}
