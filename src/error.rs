//! Binding-level error types.
//!
//! Four kinds of failure reach callers: usage errors (wrong lifecycle state,
//! overlapping writes), unsupported features, cancellations caused by a
//! concurrent close, and host transport failures passed through verbatim.

use crate::host::HostError;
use thiserror::Error;

/// Errors returned by the binding and duplex adapters.
#[derive(Debug, Error)]
pub enum BindingError {
    /// `open` was called on a binding that is not closed.
    #[error("Open: binding is already open")]
    AlreadyOpen,

    /// The operation requires an open binding.
    #[error("Port is not open")]
    NotOpen,

    /// A write was issued while another write was still in flight.
    #[error("Overlapping writes are not supported and should be queued by the caller")]
    OverlappingWrite,

    /// `offset + length` does not fit in the destination buffer.
    #[error("Read range {offset}+{length} exceeds buffer of {capacity} bytes")]
    InvalidRange {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    /// Software flow control (xon/xoff/xany) was requested.
    #[error("Unsupported flow control setting: only none and hardware are available")]
    UnsupportedFlowControl,

    /// Changing options on an open connection is not available.
    #[error("update() is not supported by this binding")]
    UpdateNotSupported,

    /// The read was aborted because the binding closed.
    #[error("Read cancelled")]
    ReadCancelled,

    /// The write was aborted because the binding closed.
    #[error("Write cancelled")]
    WriteCancelled,

    /// The host transport failed.
    #[error(transparent)]
    Host(#[from] HostError),
}

impl BindingError {
    /// True for errors caused by a close racing the operation, as opposed to
    /// a transport fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::ReadCancelled | Self::WriteCancelled)
    }

    /// True for errors caused by how the binding was driven.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::AlreadyOpen | Self::NotOpen | Self::OverlappingWrite | Self::InvalidRange { .. }
        )
    }

    /// True for features the transport cannot provide.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFlowControl
                | Self::UpdateNotSupported
                | Self::Host(HostError::Unsupported(_))
        )
    }
}

/// Result type for binding operations.
pub type BindingResult<T> = Result<T, BindingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(BindingError::ReadCancelled.to_string(), "Read cancelled");
        assert_eq!(
            BindingError::InvalidRange {
                offset: 4,
                length: 8,
                capacity: 10
            }
            .to_string(),
            "Read range 4+8 exceeds buffer of 10 bytes"
        );
    }

    #[test]
    fn test_host_errors_are_transparent() {
        let err: BindingError = HostError::Locked("writable").into();
        assert_eq!(err.to_string(), "The writable stream is already locked");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_classification() {
        assert!(BindingError::ReadCancelled.is_cancelled());
        assert!(BindingError::WriteCancelled.is_cancelled());
        assert!(BindingError::OverlappingWrite.is_usage());
        assert!(BindingError::UpdateNotSupported.is_unsupported());
        assert!(BindingError::Host(HostError::Unsupported("signals")).is_unsupported());
        assert!(!BindingError::NotOpen.is_cancelled());
    }
}
