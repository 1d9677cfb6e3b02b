//! Duplex message transport for objbridge.
//!
//! Everything above this crate talks to a peer through a [`Duplex`]: a
//! sender half that accepts whole messages and a receiver half that yields
//! them in order. Concrete transports only have to produce one:
//! - [`memory::pair`] for in-process peers and tests
//! - [`UnixDomainSocket`] streams, framed by `objbridge-frame`
//!
//! The channel is assumed reliable and ordered. Connection setup,
//! authentication and encryption are out of scope.

pub mod duplex;
pub mod error;
pub mod memory;

#[cfg(unix)]
pub mod uds;

pub use duplex::{Duplex, MessageReceiver, MessageSender};
pub use error::{Result, TransportError};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
