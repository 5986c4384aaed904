//! Canonical error and result types for the crate.
//!
//! [`TransportError`] is the single failure surface shared by buffers,
//! queues, links, workers and the server. Variants are grouped by how a
//! caller is expected to react:
//!
//! - [`TransportError::InvalidParam`]: caller bug, never retried.
//! - [`TransportError::AllocationFailed`]: resource exhaustion, recovered at
//!   the smallest scope possible.
//! - [`TransportError::QueueFull`]: backpressure. Defer the send or apply
//!   flow control upstream.
//! - [`TransportError::NotEstablished`]: use before `initialize` or after
//!   `uninitialize`.
//! - [`TransportError::Framing`]: malformed inbound frame. The link is torn
//!   down rather than resynchronised.
//! - [`TransportError::WorkerUnavailable`]: the owning worker no longer
//!   tracks the link.

use std::io;

use thiserror::Error;

use crate::handshake::HandshakeError;

/// Framing violations detected while reassembling inbound frames.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The header declared a body longer than [`crate::buffer::MAX_RECV_BODY_LEN`].
    #[error("declared body length {declared} exceeds maximum {max}")]
    OversizedBody {
        /// Body length carried by the header.
        declared: usize,
        /// Largest body the receiver accepts.
        max: usize,
    },

    /// The peer closed the stream part-way through a frame.
    #[error("peer closed mid-frame: {received} of {expected} bytes received")]
    PrematureEof {
        /// Bytes of the current frame (header included) already read.
        received: usize,
        /// Bytes the frame needs, or the header size while it is incomplete.
        expected: usize,
    },
}

/// Errors surfaced by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An argument was outside its permitted range.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// Reserving memory for the named resource failed.
    #[error("failed to allocate {resource}")]
    AllocationFailed {
        /// Resource that could not be allocated.
        resource: &'static str,
    },

    /// The send queue is at capacity.
    #[error("send queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The link is not in the `Established` state.
    #[error("link not established")]
    NotEstablished,

    /// An inbound frame violated the wire format.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The worker does not (or no longer) track the link.
    #[error("worker unavailable")]
    WorkerUnavailable,

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The connection handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}

impl TransportError {
    /// Returns `true` for backpressure signals a caller may retry later.
    #[must_use]
    pub fn is_backpressure(&self) -> bool { matches!(self, Self::QueueFull { .. }) }

    /// Returns `true` when the error leaves the link unusable.
    #[must_use]
    pub fn is_fatal_for_link(&self) -> bool {
        matches!(
            self,
            Self::Framing(_) | Self::Io(_) | Self::NotEstablished | Self::WorkerUnavailable
        )
    }
}

/// Canonical result alias used by `fabriclink` public APIs.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(TransportError::QueueFull { capacity: 4 }, true, false)]
    #[case(TransportError::NotEstablished, false, true)]
    #[case(TransportError::InvalidParam("capacity"), false, false)]
    #[case(
        TransportError::Framing(FramingError::OversizedBody { declared: 9, max: 8 }),
        false,
        true
    )]
    fn classifies_errors(
        #[case] error: TransportError,
        #[case] backpressure: bool,
        #[case] fatal: bool,
    ) {
        assert_eq!(error.is_backpressure(), backpressure);
        assert_eq!(error.is_fatal_for_link(), fatal);
    }

    #[test]
    fn framing_error_display_names_limits() {
        let err = TransportError::from(FramingError::OversizedBody {
            declared: 2048,
            max: 1024,
        });
        assert_eq!(
            err.to_string(),
            "framing error: declared body length 2048 exceeds maximum 1024"
        );
    }
}
