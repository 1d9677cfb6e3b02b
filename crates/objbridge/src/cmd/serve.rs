use crate::cmd::ServeArgs;
use crate::exit::{CliError, CliResult, USAGE};

#[cfg(unix)]
pub async fn run(args: ServeArgs) -> CliResult<i32> {
    use std::sync::Arc;

    use objbridge::demo;
    use objbridge_frame::{spawn_framed, FrameConfig};
    use objbridge_remote::RpcRemoteServer;
    use objbridge_transport::UnixDomainSocket;
    use tracing::info;

    use crate::exit::{transport_error, SUCCESS};

    let mode = parse_mode(&args.mode)?;
    let config = FrameConfig {
        max_payload_size: args.max_payload,
    };
    let listener = UnixDomainSocket::bind_with_mode(&args.path, mode)
        .map_err(|err| transport_error("bind failed", err))?;
    let server = demo::server();
    info!(
        path = %listener.path().display(),
        exposed = ?demo::EXPOSED,
        "serving demo objects"
    );

    let mut connections: u64 = 0;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let stream = accepted.map_err(|err| transport_error("accept failed", err))?;
                connections += 1;
                info!(connection = connections, "client connected");
                RpcRemoteServer::serve(spawn_framed(stream, config.clone()), Arc::clone(&server));
            }
            _ = tokio::signal::ctrl_c() => {
                info!(connections, "interrupted; shutting down");
                break;
            }
        }
    }

    Ok(SUCCESS)
}

#[cfg(not(unix))]
pub async fn run(args: ServeArgs) -> CliResult<i32> {
    parse_mode(&args.mode)?;
    Err(CliError::new(
        USAGE,
        format!(
            "{}: unix sockets are not available on this platform",
            args.path.display()
        ),
    ))
}

fn parse_mode(raw: &str) -> CliResult<u32> {
    let digits = raw.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o777)
        .ok_or_else(|| CliError::new(USAGE, format!("invalid socket mode: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mode_reads_octal() {
        assert_eq!(parse_mode("600").unwrap(), 0o600);
        assert_eq!(parse_mode("0o660").unwrap(), 0o660);
        assert!(parse_mode("999").is_err());
        assert!(parse_mode("1000").is_err());
    }
}
