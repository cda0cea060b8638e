//! Error types shared across the manifold workspace.

use std::io;
use thiserror::Error;

/// Main error type for manifold operations.
#[derive(Error, Debug)]
pub enum ManifoldError {
    /// Operation on a terminated object.
    #[error("object is closed")]
    Closed,

    /// A receive or send deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// Best-effort send could not be delivered.
    #[error("message dropped")]
    MsgDropped,

    /// A to-destination message addressed a pipe that is not open.
    #[error("bad destination")]
    BadDestination,

    /// No transport is registered for the address scheme.
    #[error("no transport for scheme: {0}")]
    BadTransport(String),

    /// The address string could not be parsed.
    #[error("bad address: {0}")]
    BadAddress(String),

    /// The remote endpoint refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// The local address is already in use.
    #[error("address in use")]
    AddressInUse,

    /// Accept was attempted on a listener that is not listening.
    #[error("not listening")]
    NotListening,

    /// An inbound frame exceeds the configured content limit.
    #[error("content too long: {length} bytes (max: {max})")]
    ContentTooLong { length: u32, max: u32 },

    /// A message carried an unsupported send type.
    #[error("invalid send type: {0}")]
    InvalidSendType(u8),

    /// IO error from the underlying transport.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for manifold operations.
pub type Result<T> = std::result::Result<T, ManifoldError>;
