use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use objbridge_remote::{RemoteClient, RemoteHandle, Value};

use crate::exit::{remote_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod get;
pub mod inspect;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Expose the demo objects on a socket.
    Serve(ServeArgs),
    /// Print the member table of an exposed object.
    Inspect(InspectArgs),
    /// Read a member of an exposed object.
    Get(GetArgs),
    /// Call a method of an exposed object and print the settled result.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args).await,
        Command::Inspect(args) => inspect::run(args, format).await,
        Command::Get(args) => get::run(args, format).await,
        Command::Call(args) => call::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Socket file permissions, in octal.
    #[arg(long, default_value = "600")]
    pub mode: String,
    /// Largest accepted message, in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub max_payload: usize,
}

/// Where to reach a server and how long to wait for it.
#[derive(Args, Debug)]
pub struct Target {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Name the object is exposed under.
    pub name: String,
    /// Connect and per-call timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub target: Target,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: Target,
    /// Member to read.
    pub member: String,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub target: Target,
    /// Method to call.
    pub method: String,
    /// Arguments as a JSON array.
    #[arg(long, default_value = "[]")]
    pub args: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Connect to `path`, retrying until `timeout` runs out. Calls made through
/// the returned client share the same timeout.
#[cfg(unix)]
pub async fn connect(path: &Path, timeout: Duration) -> CliResult<RemoteClient> {
    use objbridge_frame::{spawn_framed, FrameConfig};
    use objbridge_rpc::RpcConfig;
    use objbridge_transport::{TransportError, UnixDomainSocket};

    let start = tokio::time::Instant::now();
    let stream = loop {
        match UnixDomainSocket::connect(path).await {
            Ok(stream) => break stream,
            Err(err @ TransportError::PathTooLong { .. }) => {
                return Err(CliError::new(USAGE, err.to_string()));
            }
            Err(err) => {
                if start.elapsed() >= timeout {
                    return Err(CliError::new(
                        crate::exit::TIMEOUT,
                        format!("connect timed out after {timeout:?}: {err}"),
                    ));
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
    };
    tracing::debug!(path = %path.display(), "connected");

    let duplex = spawn_framed(stream, FrameConfig::default());
    Ok(RemoteClient::connect_with_config(
        duplex,
        RpcConfig {
            call_timeout: Some(timeout),
        },
    ))
}

#[cfg(not(unix))]
pub async fn connect(path: &Path, _timeout: Duration) -> CliResult<RemoteClient> {
    Err(CliError::new(
        USAGE,
        format!("{}: unix sockets are not available on this platform", path.display()),
    ))
}

/// Connect and fetch the exposed object `target.name`.
pub async fn open(target: &Target) -> CliResult<(RemoteClient, RemoteHandle)> {
    let timeout = parse_duration(&target.timeout)?;
    let client = connect(&target.path, timeout).await?;
    let root = client
        .get_remote(&target.name)
        .await
        .map_err(|err| remote_error("get failed", err))?;
    match root {
        Value::Remote(handle) => Ok((client, handle)),
        other => Err(CliError::new(
            DATA_INVALID,
            format!("'{}' is a {}, not an object", target.name, other.type_name()),
        )),
    }
}
