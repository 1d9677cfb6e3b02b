//! In-process transport: two duplex ends wired back to back.

use tokio::sync::mpsc;
use tracing::debug;

use crate::duplex::Duplex;

/// Create two connected duplex ends.
///
/// A message sent on one end is received, in order, on the other. Dropping
/// one end closes the other's receiver once queued messages are drained.
pub fn pair() -> (Duplex, Duplex) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();
    debug!("created in-memory duplex pair");
    (
        Duplex::from_channels(left_tx, left_rx),
        Duplex::from_channels(right_tx, right_rx),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[tokio::test]
    async fn test_messages_cross_in_order() {
        let (left, mut right) = pair();

        left.sender.send("one").unwrap();
        left.sender.send("two").unwrap();

        assert_eq!(right.receiver.recv().await.unwrap().as_ref(), b"one");
        assert_eq!(right.receiver.recv().await.unwrap().as_ref(), b"two");

        right.sender.send("back").unwrap();
        let (_, mut left_rx) = left.split();
        assert_eq!(left_rx.recv().await.unwrap().as_ref(), b"back");
    }

    #[tokio::test]
    async fn test_drop_closes_peer() {
        let (left, right) = pair();
        let (right_tx, mut right_rx) = right.split();

        left.sender.send("last").unwrap();
        drop(left);

        assert_eq!(right_rx.recv().await.unwrap().as_ref(), b"last");
        assert!(right_rx.recv().await.is_none());
        assert!(right_tx.is_closed());
        assert!(matches!(
            right_tx.send("nobody"),
            Err(TransportError::Shutdown)
        ));
    }

    #[test]
    fn test_try_recv_without_runtime() {
        let (left, mut right) = pair();
        assert!(right.receiver.try_recv().is_none());
        left.sender.send("ready").unwrap();
        assert_eq!(right.receiver.try_recv().unwrap().as_ref(), b"ready");
    }
}
