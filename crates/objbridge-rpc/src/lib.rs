//! Request/response correlation over a duplex message channel.
//!
//! [`RpcApi`] turns a bare [`Duplex`](objbridge_transport::Duplex) into
//! call/await: every outbound call gets a fresh id, and the response carrying
//! that id resolves it, in whatever order responses arrive. Inbound requests
//! from the peer are handed out on the [`Requests`] stream and answered with
//! [`RpcApi::respond`].
//!
//! Messages are JSON:
//! - request: `{"id": 1, "method": "callMember", "params": [...]}`
//! - response: `{"id": 1, "result": ...}` or `{"id": 1, "error": {"message": ...}}`

pub mod api;
pub mod error;
pub mod message;

pub use api::{Requests, RpcApi, RpcConfig};
pub use error::{Result, RpcError};
pub use message::{classify, ErrorObject, RpcMessage, RpcRequest, RpcResponse};
