//! Error types for kestrel-client.
//!
//! This module defines domain-specific error types organized by functional area.

use std::fmt;
use thiserror::Error;

/// Top-level error type encompassing all possible errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection setup and configuration errors
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// RPC dispatch errors
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Query lifecycle errors
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Transport-level errors
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised while establishing or configuring a connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish a connection to the engine
    #[error("Failed to connect to {endpoint}: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    /// Authentication failure
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid connection parameters
    #[error("Invalid connection parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Connection string parsing error
    #[error("Failed to parse connection string: {0}")]
    ParseError(String),

    /// Connection timeout during the initial handshake
    #[error("Connection timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection is closed
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The server negotiated an unexpected protocol version
    #[error("Protocol version mismatch: client requires {expected}, server offered {actual}")]
    VersionMismatch { expected: String, actual: String },

    /// A required capability is unavailable in this build or configuration
    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// Errors raised by the RPC dispatcher.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The transport failed and retries (if any) were exhausted
    #[error("Disconnected from the engine: {0}")]
    Disconnected(String),

    /// The active query was cancelled while the call was in flight.
    ///
    /// Suppressed signal, not a true failure: raised in place of the
    /// underlying error when cancellation was requested before the
    /// failure was observed.
    #[error("Query cancelled")]
    Cancelled,

    /// The server does not implement the requested method
    #[error("Method '{method}' not found on the server; client and server versions may be incompatible")]
    MissingServerMethod { method: String },

    /// Structured application-level protocol failure
    #[error("RPC application error in {method}: {message}")]
    Application { method: String, message: String },

    /// The server reported an error status for the call
    #[error("Server error: {message}")]
    Server {
        message: String,
        sql_state: Option<String>,
    },
}

/// Errors raised by the query lifecycle state machine.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The query entered an error or unexpected state.
    ///
    /// The message carries the server-provided error log when one was
    /// accumulated (for example by `wait`).
    #[error("{message}")]
    State { message: String },

    /// An operation was attempted on a closed query handle
    #[error("Query handle is closed")]
    HandleClosed,

    /// The handle has no result set to fetch from
    #[error("Query has no result set: {0}")]
    NoResultSet(String),
}

/// Errors raised by the transport layer.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(String),

    /// TLS setup or handshake error
    #[error("TLS error: {0}")]
    Tls(String),

    /// SASL negotiation failure
    #[error("SASL negotiation failed: {0}")]
    Sasl(String),

    /// HTTP request failure
    #[error("HTTP transport error: {0}")]
    Http(String),

    /// The server answered with a non-success HTTP status
    #[error("HTTP status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Frame exceeded the configured maximum or was malformed
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Message encoding error
    #[error("Encode error: {0}")]
    Encode(String),

    /// Message decoding error
    #[error("Decode error: {0}")]
    Decode(String),

    /// The response was well-formed but not what the call expected
    #[error("Invalid server response: {0}")]
    InvalidResponse(String),
}

/// Coarse error kinds exposed to front ends.
///
/// Interactive shells branch on the kind rather than the full error
/// value, e.g. to report a cancel quietly and a disconnect loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unclassified failure
    Unknown,
    /// Connection setup or configuration failure
    Connection,
    /// The transport failed and the connection is gone
    Disconnected,
    /// Suppressed cancellation signal
    Cancelled,
    /// Protocol-level failure (missing method, application error)
    Protocol,
    /// Server-reported error status
    Server,
    /// Query lifecycle failure
    Query,
    /// Capability unavailable
    NotSupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Unknown => write!(f, "UNKNOWN"),
            ErrorKind::Connection => write!(f, "CONNECTION"),
            ErrorKind::Disconnected => write!(f, "DISCONNECTED"),
            ErrorKind::Cancelled => write!(f, "CANCELLED"),
            ErrorKind::Protocol => write!(f, "PROTOCOL"),
            ErrorKind::Server => write!(f, "SERVER"),
            ErrorKind::Query => write!(f, "QUERY"),
            ErrorKind::NotSupported => write!(f, "NOT_SUPPORTED"),
        }
    }
}

impl ClientError {
    /// Classify into a coarse [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connection(ConnectionError::NotSupported(_)) => ErrorKind::NotSupported,
            ClientError::Connection(_) => ErrorKind::Connection,
            ClientError::Rpc(e) => e.kind(),
            ClientError::Query(_) => ErrorKind::Query,
            ClientError::Transport(_) => ErrorKind::Connection,
        }
    }

    /// True when this error is the suppressed cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Rpc(RpcError::Cancelled))
    }
}

impl RpcError {
    /// Classify into a coarse [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Disconnected(_) => ErrorKind::Disconnected,
            RpcError::Cancelled => ErrorKind::Cancelled,
            RpcError::MissingServerMethod { .. } | RpcError::Application { .. } => {
                ErrorKind::Protocol
            }
            RpcError::Server { .. } => ErrorKind::Server,
        }
    }
}

// Conversions from external error types
impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for TransportError {
    fn from(err: bincode::error::EncodeError) -> Self {
        TransportError::Encode(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for TransportError {
    fn from(err: bincode::error::DecodeError) -> Self {
        TransportError::Decode(err.to_string())
    }
}
