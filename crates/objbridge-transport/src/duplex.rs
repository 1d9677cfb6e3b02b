use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};

/// Sending half of a [`Duplex`].
///
/// Cheap to clone; every clone feeds the same outbound queue. Sending never
/// blocks, so it is safe to call from synchronous code running on a runtime
/// thread.
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl MessageSender {
    /// Queue one message for delivery to the peer.
    ///
    /// Returns [`TransportError::Shutdown`] once the peer side has gone away.
    pub fn send(&self, message: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(message.into())
            .map_err(|_| TransportError::Shutdown)
    }

    /// Whether the peer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a [`Duplex`].
#[derive(Debug)]
pub struct MessageReceiver {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MessageReceiver {
    /// Wait for the next inbound message.
    ///
    /// Returns `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

/// A connected, ordered, reliable message channel to one peer.
#[derive(Debug)]
pub struct Duplex {
    pub sender: MessageSender,
    pub receiver: MessageReceiver,
}

impl Duplex {
    /// Assemble a duplex from raw queue ends.
    ///
    /// `outbound` carries messages to the peer, `inbound` yields messages
    /// from it. Stream transports use this to plug their reader and writer
    /// tasks in.
    pub fn from_channels(
        outbound: mpsc::UnboundedSender<Bytes>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            sender: MessageSender { tx: outbound },
            receiver: MessageReceiver { rx: inbound },
        }
    }

    /// Split into the sending and receiving halves.
    pub fn split(self) -> (MessageSender, MessageReceiver) {
        (self.sender, self.receiver)
    }
}
