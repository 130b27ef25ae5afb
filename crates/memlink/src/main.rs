mod cmd;
mod exit;
mod logging;
mod output;
mod parse;

use clap::Parser;

use crate::cmd::{Command, LinkArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "memlink", version, about = "Target memory and RTT over a serial bridge")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(flatten)]
    link: LinkArgs,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let result = cmd::run(cli.command, &cli.link, cli.format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn parses_read_with_based_integers() {
        let cli = Cli::try_parse_from([
            "memlink",
            "--port",
            "/dev/ttyUSB0",
            "read",
            "0x2000_0000",
            "-n",
            "0b1000",
        ])
        .expect("read args should parse");

        assert_eq!(cli.link.port, Some(PathBuf::from("/dev/ttyUSB0")));
        match cli.command {
            Command::Read(args) => {
                assert_eq!(args.start, 0x2000_0000);
                assert_eq!(args.length, Some(8));
                assert_eq!(args.end, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn link_options_are_global() {
        let cli = Cli::try_parse_from([
            "memlink",
            "ping",
            "--sim",
            "-p",
            "./target-sim",
            "--sim-arg=--cycles",
            "--sim-arg",
            "1000",
            "--baud",
            "115200",
        ])
        .expect("global link args should parse after the subcommand");

        assert!(cli.link.sim);
        assert_eq!(cli.link.sim_args, vec!["--cycles", "1000"]);
        assert_eq!(cli.link.baud, 115_200);
        assert!(matches!(cli.command, Command::Ping(_)));
    }

    #[test]
    fn poke_takes_many_words() {
        let cli = Cli::try_parse_from(["memlink", "poke", "0x100", "1", "0xdead_beef", "0o17"])
            .expect("poke args should parse");
        match cli.command {
            Command::Poke(args) => assert_eq!(args.words, vec![1, 0xDEAD_BEEF, 0o17]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = Cli::try_parse_from(["memlink", "peek", "0xZZ"])
            .expect_err("bad address should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let err = Cli::try_parse_from(["memlink", "peek", "0x1_0000_0000"])
            .expect_err("address past 32 bits should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn rtt_defaults_scan_whole_address_space() {
        let cli = Cli::try_parse_from(["memlink", "rtt"]).expect("rtt args should parse");
        match cli.command {
            Command::Rtt(args) => {
                assert_eq!(args.address, None);
                assert_eq!(args.start, 0);
                assert_eq!(args.end, 1 << 32);
                assert_eq!(args.channel, "Terminal");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
