//! Transport abstraction.
//!
//! The session engine drives any broker connection through this trait, so
//! the MQTT adapter and the test double plug in the same way. The transport
//! owns its own I/O task; it reports lifecycle changes and inbound frames
//! through the channel handed to [`Transport::connect`].

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

/// Push notification from the transport to the session engine.
#[derive(Debug)]
pub enum TransportEvent {
    /// One inbound message on a subscribed topic.
    Frame { topic: String, payload: Vec<u8> },
    /// The link dropped after having been up.
    Interrupted { reason: String },
    /// The link is up again after an interruption.
    Resumed { session_preserved: bool },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Transient failures are worth retrying; `Closed` is final.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Broker connection driven by the session engine.
///
/// Methods return boxed futures so the trait stays object-safe; the engine
/// holds an `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    /// Establish the initial connection. `events` stays with the transport
    /// for the lifetime of the session and carries frames and lifecycle
    /// notifications back to the engine.
    fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> BoxFuture<'_, Result<(), TransportError>>;

    /// One reconnection attempt after an interruption. Success is reported
    /// asynchronously via [`TransportEvent::Resumed`].
    fn reconnect(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Tear the connection down for good.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    fn publish(&self, topic: String, payload: Vec<u8>)
        -> BoxFuture<'_, Result<(), TransportError>>;

    fn subscribe(&self, filter: String) -> BoxFuture<'_, Result<(), TransportError>>;

    fn unsubscribe(&self, filter: String) -> BoxFuture<'_, Result<(), TransportError>>;
}
