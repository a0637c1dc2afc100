//! Session and command error types.

use std::time::Duration;

use thiserror::Error;

use crate::event::EventKind;
use crate::transport::TransportError;

/// Why a submitted command did not complete.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No acknowledgement arrived before the command's deadline.
    #[error("no acknowledgement within {timeout:?}")]
    Timeout { timeout: Duration },

    /// The device answered and refused.
    #[error("device rejected the command (code {code})")]
    Rejected { code: u32 },

    /// The command was evicted to make room for a newer submission while
    /// disconnected.
    #[error("dropped from a full outbound queue")]
    QueueOverflow,

    /// Submitted while the session was deliberately disconnected.
    #[error("session is disconnected")]
    Disconnected,

    /// Rejected locally before reaching the wire.
    #[error(transparent)]
    Validation(#[from] tanklink_proto::ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The device acknowledged a query without the expected data payload.
    #[error("response carried no payload")]
    EmptyResponse,

    /// The session engine is gone.
    #[error("session closed")]
    SessionClosed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is already connected")]
    AlreadyConnected,

    #[error("session is not connected")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("timed out waiting for {}", kind.as_str())]
    WaitTimeout { kind: EventKind },

    /// The session engine is gone.
    #[error("session closed")]
    SessionClosed,
}
