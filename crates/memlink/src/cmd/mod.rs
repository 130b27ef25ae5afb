use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use memlink::bridge::{Bridge, BridgeConfig};
use memlink::frame::FrameConfig;
use memlink::transport::{ProcessChannel, RawChannel};
use tracing::debug;

use crate::exit::{bridge_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;
use crate::parse::{parse_duration, parse_end, parse_u32, parse_u64};

pub mod peek;
pub mod ping;
pub mod poke;
pub mod read;
pub mod reset;
pub mod rtt;
pub mod serve;
pub mod version;
pub mod write;

/// A connected, pinged bridge.
pub type Link = Bridge<Box<dyn RawChannel>>;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the target answers.
    Ping(PingArgs),
    /// Pulse or hold the target's reset line.
    Reset(ResetArgs),
    /// Read a block of target memory.
    Read(ReadArgs),
    /// Write a file (or stdin) into target memory.
    Write(WriteArgs),
    /// Print target memory one word per line.
    Peek(PeekArgs),
    /// Write words to target memory.
    Poke(PokeArgs),
    /// Find the RTT control block and follow an up channel.
    Rtt(RttArgs),
    /// Act as a simulated target on stdin/stdout.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, link: &LinkArgs, format: Option<OutputFormat>) -> CliResult<i32> {
    let resolved = || format.unwrap_or_else(OutputFormat::default_for_stdout);
    match command {
        Command::Ping(args) => ping::run(args, link, resolved()),
        Command::Reset(args) => reset::run(args, link),
        Command::Read(args) => read::run(args, link, format),
        Command::Write(args) => write::run(args, link),
        Command::Peek(args) => peek::run(args, link, resolved()),
        Command::Poke(args) => poke::run(args, link),
        Command::Rtt(args) => rtt::run(args, link, format),
        Command::Serve(args) => serve::run(args, link),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the target. Shared by every command that talks to one.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Serial device, or with --sim the simulator executable.
    #[arg(short = 'p', long, env = "MEMLINK_PORT", global = true)]
    pub port: Option<PathBuf>,

    /// Spawn --port as a simulator and talk to it over stdin/stdout.
    #[arg(long, global = true)]
    pub sim: bool,

    /// Extra argument for the simulator (repeatable).
    #[arg(
        long = "sim-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        global = true
    )]
    pub sim_args: Vec<String>,

    /// Serial baud rate.
    #[arg(short = 'b', long, env = "MEMLINK_BAUD", default_value_t = 1_000_000, global = true)]
    pub baud: u32,

    /// Target bus word size in bytes (1, 2, 4 or 8).
    #[arg(long, default_value_t = 4, global = true)]
    pub word_size: usize,

    /// Give up on a response after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", value_parser = parse_duration, global = true)]
    pub timeout: Duration,
}

impl LinkArgs {
    fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            word_size: self.word_size,
            frame: FrameConfig {
                read_timeout: Some(self.timeout),
                ..FrameConfig::default()
            },
            ..BridgeConfig::default()
        }
    }
}

/// Open the link and ping the target.
pub fn connect(link: &LinkArgs) -> CliResult<Link> {
    let port = link
        .port
        .as_ref()
        .ok_or_else(|| CliError::new(USAGE, "no port given (use --port or MEMLINK_PORT)"))?;

    let channel: Box<dyn RawChannel> = if link.sim {
        Box::new(
            ProcessChannel::spawn(port, &link.sim_args)
                .map_err(|err| transport_error("simulator failed to start", err))?,
        )
    } else {
        open_serial(port, link.baud)?
    };

    let mut bridge = Bridge::with_config(channel, link.bridge_config())
        .map_err(|err| bridge_error("invalid link settings", err))?;
    bridge
        .ping()
        .map_err(|err| bridge_error("target did not answer ping", err))?;
    debug!(
        port = %port.display(),
        transport = bridge.channel().transport_name(),
        "connected"
    );
    Ok(bridge)
}

#[cfg(unix)]
fn open_serial(port: &std::path::Path, baud: u32) -> CliResult<Box<dyn RawChannel>> {
    let serial = memlink::transport::SerialPort::open(port, baud)
        .map_err(|err| transport_error("cannot open serial port", err))?;
    Ok(Box::new(serial))
}

#[cfg(not(unix))]
fn open_serial(_port: &std::path::Path, _baud: u32) -> CliResult<Box<dyn RawChannel>> {
    Err(CliError::new(
        USAGE,
        "serial ports are only supported on Unix; use --sim",
    ))
}

/// End of a `START [END] [-n LEN]` range, in bytes.
pub fn range_end(start: u32, end: Option<u64>, length: u64) -> CliResult<u64> {
    let end = end.unwrap_or(u64::from(start) + length);
    if end < u64::from(start) {
        return Err(CliError::new(
            USAGE,
            format!("end {end:#x} is before start {start:#010x}"),
        ));
    }
    Ok(end)
}

#[derive(Args, Debug, Default)]
pub struct PingArgs {}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Leave the target held in reset.
    #[arg(long)]
    pub hold: bool,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// First address.
    #[arg(value_parser = parse_u32)]
    pub start: u32,
    /// End address (exclusive).
    #[arg(value_parser = parse_end)]
    pub end: Option<u64>,
    /// Bytes to read when END is not given. Default: one word.
    #[arg(short = 'n', long, value_parser = parse_u64)]
    pub length: Option<u64>,
    /// Print a hex dump even when not writing to a terminal.
    #[arg(long)]
    pub hex: bool,
    /// Write to a file instead of stdout.
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// First address.
    #[arg(value_parser = parse_u32)]
    pub start: u32,
    /// File to write. Default: stdin.
    pub input: Option<PathBuf>,
    /// Hold the target in reset while writing.
    #[arg(short = 'r', long)]
    pub reset: bool,
}

#[derive(Args, Debug)]
pub struct PeekArgs {
    /// First address.
    #[arg(value_parser = parse_u32)]
    pub start: u32,
    /// End address (exclusive).
    #[arg(value_parser = parse_end)]
    pub end: Option<u64>,
    /// Words to print when END is not given.
    #[arg(short = 'n', long, default_value = "1", value_parser = parse_u64)]
    pub length: u64,
}

#[derive(Args, Debug)]
pub struct PokeArgs {
    /// First address.
    #[arg(value_parser = parse_u32)]
    pub start: u32,
    /// Word values, written at consecutive addresses.
    #[arg(required = true, value_parser = parse_u64)]
    pub words: Vec<u64>,
}

#[derive(Args, Debug)]
pub struct RttArgs {
    /// Control block address; skips the scan.
    #[arg(long, value_parser = parse_u32)]
    pub address: Option<u32>,
    /// Start of the scan.
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    pub start: u32,
    /// End of the scan (exclusive).
    #[arg(long, default_value = "0x1_0000_0000", value_parser = parse_end)]
    pub end: u64,
    /// Up channel to follow.
    #[arg(long, default_value = "Terminal")]
    pub channel: String,
    /// List the channels and exit.
    #[arg(long)]
    pub list: bool,
    /// Exit after this many bytes.
    #[arg(long, value_parser = parse_u64)]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Base address of the simulated memory.
    #[arg(long, default_value = "0x2000_0000", value_parser = parse_u32)]
    pub base: u32,
    /// Size of the simulated memory in bytes.
    #[arg(long, default_value = "0x1_0000", value_parser = parse_u64)]
    pub size: u64,
    /// Preload memory at the base address from a file.
    #[arg(long, value_name = "FILE")]
    pub load: Option<PathBuf>,
    /// Place an RTT control block whose "Terminal" up channel holds TEXT.
    #[arg(long, value_name = "TEXT")]
    pub rtt: Option<String>,
    /// Where to place the RTT control block. Default: the middle of memory.
    #[arg(long, value_parser = parse_u32)]
    pub rtt_address: Option<u32>,
    /// Unacknowledged bus polls before a request is abandoned.
    #[arg(long, default_value_t = 64)]
    pub ack_polls: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
