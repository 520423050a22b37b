//! Error types for influxdb2-client.

use thiserror::Error;

/// Error type for all client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport failed before a status code was received.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error while compressing or streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize the query request to JSON.
    #[error("failed to serialize request: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Server answered outside the 2xx range.
    ///
    /// `code` and `message` come from the JSON error envelope when the server
    /// sends one, otherwise from the raw status line and body. `retry_after`
    /// carries the `Retry-After` header in seconds when present.
    #[error("server returned {status}: {code}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Machine-readable error code.
        code: String,
        /// Human-readable error message.
        message: String,
        /// Seconds to wait before the next attempt, from `Retry-After`.
        retry_after: Option<u32>,
    },

    /// Failed to read a CSV row from the response stream.
    #[error("CSV read error: {0}")]
    Csv(String),

    /// Malformed annotated CSV or a value that does not match its declared type.
    #[error("parse error: {0}")]
    Parse(String),

    /// Unknown data type in a `#datatype` annotation.
    #[error("unknown data type: {0}")]
    UnknownDataType(String),

    /// Data row has a different number of columns than the table definition.
    #[error("row has different number of columns than table: {actual} vs {expected}")]
    ColumnMismatch {
        /// Column count declared by the annotations.
        expected: usize,
        /// Column count found in the row.
        actual: usize,
    },

    /// In-band error table returned by the server instead of results.
    ///
    /// Holds the message joined with the reference code when one was sent.
    #[error("{0}")]
    Query(String),

    /// The write pipeline has been closed; no further writes are accepted.
    #[error("write pipeline is closed")]
    Closed,
}

impl Error {
    /// True for server replies the write path is allowed to retry (429, 503).
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Server { status: 429 | 503, .. })
    }

    /// `Retry-After` seconds attached to a server error, if any.
    pub fn retry_after(&self) -> Option<u32> {
        match self {
            Error::Server { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
