//! Remote objects across process boundaries.
//!
//! objbridge lets one process expose objects and another work with them
//! through proxies, over any reliable ordered message channel.
//!
//! # Crate Structure
//!
//! - [`transport`]: Message channels: in-memory pairs and Unix sockets
//! - [`frame`]: Length-prefixed framing for byte-stream transports
//! - [`rpc`]: Request/response correlation
//! - [`remote`]: Value model, codec, dispatcher and proxies
//! - [`demo`]: Sample objects served by `objbridge serve`

pub mod demo;

/// Re-export transport types.
pub mod transport {
    pub use objbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use objbridge_frame::*;
}

/// Re-export correlation types.
pub mod rpc {
    pub use objbridge_rpc::*;
}

/// Re-export remote object types.
pub mod remote {
    pub use objbridge_remote::*;
}
