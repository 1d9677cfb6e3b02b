use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use objbridge_transport::Duplex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::codec::{FrameCodec, FrameConfig};

/// Turn an async byte stream into a message [`Duplex`].
///
/// Spawns two tasks on the current tokio runtime: a reader that decodes
/// frames into the duplex receiver, and a writer that frames every message
/// sent on the duplex sender. The reader stops on EOF or a framing error,
/// which closes the receiver. The writer stops, and shuts the stream down,
/// once every sender clone has been dropped.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn spawn_framed<S>(stream: S, config: FrameConfig) -> Duplex
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let codec = FrameCodec::new(config);
    let mut reader = FramedRead::new(read_half, codec.clone());
    let mut writer = FramedWrite::new(write_half, codec);

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();

    tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(message) => {
                    debug!(len = message.len(), "frame received");
                    if inbound_tx.send(message).is_err() {
                        debug!("duplex receiver dropped; stopping frame reader");
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "frame reader stopped");
                    break;
                }
            }
        }
        debug!("frame reader finished");
    });

    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(err) = writer.send(message).await {
                warn!(error = %err, "frame writer stopped");
                break;
            }
        }
        let _ = writer.close().await;
        debug!("frame writer finished");
    });

    Duplex::from_channels(outbound_tx, inbound_rx)
}
