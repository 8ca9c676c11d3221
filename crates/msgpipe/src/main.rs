mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "msgpipe", version, about = "Message pipe routing CLI")]
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

    /// Router settings as JSON (interface_version, connector limits).
    #[arg(long, value_name = "FILE", global = true, env = "MSGPIPE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, cli.config.as_deref(), format);

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
    fn parses_ping_subcommand() {
        let cli = Cli::try_parse_from(["msgpipe", "ping", "-n", "3", "--payload-size", "128"])
            .expect("ping args should parse");

        match cli.command {
            Command::Ping(args) => {
                assert_eq!(args.count, 3);
                assert_eq!(args.payload_size, 128);
                assert_eq!(args.timeout, "5s");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_negotiate_with_global_config() {
        let cli = Cli::try_parse_from([
            "msgpipe",
            "negotiate",
            "--require",
            "2",
            "--config",
            "/tmp/msgpipe.json",
        ])
        .expect("negotiate args should parse");

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/msgpipe.json")));
        assert!(matches!(
            cli.command,
            Command::Negotiate(cmd::NegotiateArgs {
                require: Some(2),
                server_version: None,
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_numeric_count() {
        let err = Cli::try_parse_from(["msgpipe", "ping", "--count", "many"])
            .expect_err("non-numeric count should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
