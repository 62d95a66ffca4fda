use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use pktwire_frame::DEFAULT_MAX_PACKET_SIZE;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and print every packet received.
    Serve(ServeArgs),
    /// Connect and send packets.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind: HOST:PORT for TCP/UDP, anything else is a Unix socket path.
    pub addr: String,
    /// Bind a UDP socket instead of a stream listener.
    #[arg(long)]
    pub udp: bool,
    /// Send every received packet back to its sender.
    #[arg(long)]
    pub echo: bool,
    /// Exit after receiving N packets.
    #[arg(long)]
    pub count: Option<usize>,
    /// How long each selector poll may block (e.g. 500ms, 1s).
    #[arg(long, default_value = "500ms")]
    pub poll_timeout: String,
    /// Reassembly buffer size per client, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    pub buffer_size: usize,
    /// Largest accepted packet, header included.
    #[arg(long, default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    pub max_packet_size: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Address to connect to: HOST:PORT for TCP/UDP, anything else is a Unix socket path.
    pub addr: String,
    /// Send datagrams instead of connecting a stream.
    #[arg(long)]
    pub udp: bool,
    /// Packet type tag.
    #[arg(long = "type", short = 't', default_value = "1")]
    pub kind: u16,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Send the packet N times.
    #[arg(long, default_value = "1")]
    pub repeat: usize,
    /// Wait for one reply packet and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Where a command binds or connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Tcp(SocketAddr),
    Udp(SocketAddr),
    Unix(PathBuf),
}

impl Target {
    /// Literal socket addresses are used as given. `HOST:PORT` without a `/`
    /// is resolved and the first address wins. Anything else is a Unix socket
    /// path, which `--udp` rejects.
    pub fn parse(addr: &str, udp: bool) -> CliResult<Self> {
        match (resolve(addr).transpose()?, udp) {
            (Some(addr), true) => Ok(Self::Udp(addr)),
            (Some(addr), false) => Ok(Self::Tcp(addr)),
            (None, true) => Err(CliError::new(
                USAGE,
                format!("--udp needs a HOST:PORT address, got {addr:?}"),
            )),
            (None, false) if addr.trim().is_empty() => {
                Err(CliError::new(USAGE, "address must not be empty"))
            }
            (None, false) => Ok(Self::Unix(PathBuf::from(addr))),
        }
    }
}

fn resolve(addr: &str) -> Option<CliResult<SocketAddr>> {
    if let Ok(literal) = addr.parse::<SocketAddr>() {
        return Some(Ok(literal));
    }
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() || host.contains('/') || port.parse::<u16>().is_err() {
        return None;
    }
    let resolved = addr
        .to_socket_addrs()
        .map_err(|err| CliError::new(USAGE, format!("cannot resolve {addr:?}: {err}")))
        .and_then(|mut addrs| {
            addrs
                .next()
                .ok_or_else(|| CliError::new(USAGE, format!("{addr:?} resolved to no addresses")))
        });
    Some(resolved)
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
