//! Length-prefixed message framing for objbridge.
//!
//! Every message on a byte stream is framed with:
//! - A 2-byte magic number ("OB") for stream synchronization
//! - A 4-byte little-endian payload length
//!
//! [`spawn_framed`] runs a reader and a writer task over any async byte
//! stream and exposes the result as a message [`Duplex`](objbridge_transport::Duplex).

pub mod codec;
pub mod error;
pub mod stream;

pub use codec::{
    decode_frame, encode_frame, FrameCodec, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC,
};
pub use error::{FrameError, Result};
pub use stream::spawn_framed;
