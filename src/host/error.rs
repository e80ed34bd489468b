//! Host transport error types.
//!
//! These are the failures a host serial transport reports on its own. The
//! binding layer never rewrites them; it wraps them in
//! [`BindingError::Host`](crate::error::BindingError::Host) and hands them to
//! the caller unchanged.

use thiserror::Error;

/// Errors raised by a host serial transport.
#[derive(Debug, Error)]
pub enum HostError {
    /// The port handle is in the wrong state for the call (e.g. opening an
    /// already-open port or reading from a closed one).
    #[error("Invalid port state: {0}")]
    InvalidState(String),

    /// The readable or writable side is already locked by another reader or
    /// writer.
    #[error("The {0} stream is already locked")]
    Locked(&'static str),

    /// The host rejected the open options.
    #[error("Invalid open options: {0}")]
    InvalidOptions(String),

    /// The host does not provide the requested capability.
    #[error("Operation not supported by the host transport: {0}")]
    Unsupported(&'static str),

    /// The device backing the port handle could not be found.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred on the underlying device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl HostError {
    /// Create an InvalidState error from a message.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create an InvalidOptions error from a message.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions(message.into())
    }

    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }
}

/// Result type for host transport calls.
pub type HostResult<T> = Result<T, HostError>;
