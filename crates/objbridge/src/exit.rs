use std::fmt;
use std::io;

use objbridge_remote::RemoteError;
use objbridge_rpc::RpcError;
use objbridge_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Transport(err) => transport_error(context, err),
        RpcError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RpcError::Closed(_) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        RpcError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        RpcError::Remote(_) => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn remote_error(context: &str, err: RemoteError) -> CliError {
    match err {
        RemoteError::Rpc(err) => rpc_error(context, err),
        RemoteError::Dispatch { .. } | RemoteError::NotCallable(_) | RemoteError::ReadOnly(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        RemoteError::Protocol(_) | RemoteError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        RemoteError::Thrown(_) | RemoteError::Invocation { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        RemoteError::MissingCapability(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objbridge_remote::Operation;
    use std::time::Duration;

    #[test]
    fn remote_errors_map_to_exit_codes() {
        let timeout = RemoteError::Rpc(RpcError::Timeout(Duration::from_secs(1)));
        assert_eq!(remote_error("call", timeout).code, TIMEOUT);

        let closed = RemoteError::Rpc(RpcError::Closed(3));
        assert_eq!(remote_error("call", closed).code, TRANSPORT_ERROR);

        let missing = RemoteError::dispatch(Operation::GetRemote, "nope", None);
        let err = remote_error("get failed", missing);
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("get failed: "));
    }

    #[test]
    fn io_errors_map_to_exit_codes() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        assert_eq!(io_error("bind", denied).code, PERMISSION_DENIED);
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(io_error("connect", missing).code, TRANSPORT_ERROR);
    }

    #[test]
    fn transport_errors_map_to_exit_codes() {
        let refused = TransportError::Connect {
            path: "/tmp/objbridge.sock".into(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(transport_error("connect", refused).code, TRANSPORT_ERROR);

        let denied = TransportError::Accept(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert_eq!(transport_error("accept", denied).code, PERMISSION_DENIED);

        let err = transport_error("send", TransportError::Shutdown);
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert_eq!(err.message, "send: transport shut down");
    }
}
