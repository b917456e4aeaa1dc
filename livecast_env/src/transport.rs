//! Viewer transport abstraction for LiveCast sessions.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::EnvError;

/// Abstraction for pushing messages to one connected viewer.
///
/// # Implementations
///
/// - **Production**: WebSocket text frames (see `livecast_server::ws`)
/// - **Tests**: [`ChannelTransport`], an unbounded in-memory channel
///
/// # Message Flow
///
/// ```text
/// Session                  Transport                  Viewer
///   |                          |                         |
///   |-- send_json(static) ---->|------------------------>|
///   |-- send_json(step k) ---->|------------------------>|
///   |          ...             |                         |
///   |                          |<------- close ----------|
///   |<-- closed() resolves ----|                         |
/// ```
#[async_trait]
pub trait ViewerTransport: Send + Sync + 'static {
    /// Delivers one JSON message to the peer.
    ///
    /// # Returns
    /// * `Ok(())` - Message handed to the peer's connection
    /// * `Err(EnvError::Disconnected)` - The peer is gone; the session must end
    async fn send_json(&self, message: &Value) -> Result<(), EnvError>;

    /// Resolves once the peer has gone away.
    ///
    /// Transports that can only detect a disconnect on write keep the
    /// default, which never resolves.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }

    /// Human readable peer description (for logging).
    fn peer(&self) -> String;
}

#[async_trait]
impl<T: ViewerTransport> ViewerTransport for Arc<T> {
    async fn send_json(&self, message: &Value) -> Result<(), EnvError> {
        self.as_ref().send_json(message).await
    }

    async fn closed(&self) {
        self.as_ref().closed().await
    }

    fn peer(&self) -> String {
        self.as_ref().peer()
    }
}

/// In-memory transport: every message lands in an unbounded channel.
///
/// Dropping the receiving half simulates the viewer disconnecting.
pub struct ChannelTransport {
    label: String,
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelTransport {
    /// Creates a transport and the receiver observing what it delivers.
    pub fn new(label: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                label: label.into(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl ViewerTransport for ChannelTransport {
    async fn send_json(&self, message: &Value) -> Result<(), EnvError> {
        self.tx
            .send(message.clone())
            .map_err(|_| EnvError::disconnected(format!("{} receiver dropped", self.label)))
    }

    async fn closed(&self) {
        self.tx.closed().await
    }

    fn peer(&self) -> String {
        self.label.clone()
    }
}
