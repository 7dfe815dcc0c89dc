//! Error types for thriftwire.

use thiserror::Error;

/// Main error type for all protocol, transport and connection operations.
///
/// The decode-time variants (`InvalidData`, `NegativeSize`, `SizeLimit`,
/// `BadVersion`, `DepthLimit`) are fatal to the current message only: every
/// message establishes a fresh framing context, so a decode failure never
/// poisons subsequent messages on the same connection.
#[derive(Debug, Error)]
pub enum ThriftError {
    /// I/O error from the underlying channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse/serialize error (JSON protocol only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Structurally invalid data on the wire (unknown type tag, truncated
    /// buffer, malformed varint).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A container or string size decoded as negative.
    #[error("negative size: {0}")]
    NegativeSize(String),

    /// A container or string exceeds a configured size cap.
    #[error("size limit exceeded: {0}")]
    SizeLimit(String),

    /// Version mismatch, or a missing version marker under strict read.
    #[error("bad version: {0}")]
    BadVersion(String),

    /// The protocol variant does not support the requested operation.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Nested structure exceeds the recursion cap during skip.
    #[error("depth limit exceeded: {0}")]
    DepthLimit(String),

    /// Transport misuse or failure (e.g. flush with no destination channel).
    #[error("transport error: {0}")]
    Transport(String),

    /// No processor registered for a multiplexed service name.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Connection closed while calls were pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// A pending call outlived its deadline and was evicted.
    #[error("call timed out: {0}")]
    Timeout(String),

    /// Anything that does not fit the categories above.
    #[error("unknown protocol error: {0}")]
    Unknown(String),
}

/// Result type alias using ThriftError.
pub type Result<T> = std::result::Result<T, ThriftError>;
