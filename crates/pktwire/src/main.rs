mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "pktwire", version, about = "Typed packet sockets CLI")]
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

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

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
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "pktwire",
            "send",
            "127.0.0.1:4000",
            "--type",
            "7",
            "--data",
            "hello",
            "--repeat",
            "3",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.kind, 7);
                assert_eq!(args.repeat, 3);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "pktwire",
            "send",
            "/tmp/test.sock",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_type_outside_u16() {
        let err = Cli::try_parse_from(["pktwire", "send", "127.0.0.1:1", "--type", "70000"])
            .expect_err("type must fit in 16 bits");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_serve_defaults() {
        let cli = Cli::try_parse_from(["pktwire", "serve", "0.0.0.0:4000", "--udp", "--echo"])
            .expect("serve args should parse");
        match cli.command {
            Command::Serve(args) => {
                assert!(args.udp && args.echo);
                assert_eq!(args.poll_timeout, "500ms");
                assert_eq!(args.buffer_size, 65535);
                assert_eq!(args.count, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
