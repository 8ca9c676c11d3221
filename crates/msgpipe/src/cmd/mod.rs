use std::path::Path;
use std::time::Duration;

use clap::{Args, Subcommand};
use msgpipe_bindings::RouterConfig;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod blob;
pub mod negotiate;
pub mod ping;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show version information.
    Version(VersionArgs),
    /// Measure request/response round trips between two threads.
    Ping(PingArgs),
    /// Query and require interface versions against a local server.
    Negotiate(NegotiateArgs),
}

pub fn run(command: Command, config: Option<&Path>, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Ping(args) => ping::run(args, load_config(config)?, format),
        Command::Negotiate(args) => negotiate::run(args, load_config(config)?, format),
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Number of round trips.
    #[arg(long, short = 'n', default_value = "10")]
    pub count: usize,
    /// Payload bytes per request.
    #[arg(long, default_value = "64")]
    pub payload_size: usize,
    /// Maximum wait per round trip (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct NegotiateArgs {
    /// Interface version the local server implements. Overrides the config
    /// file.
    #[arg(long)]
    pub server_version: Option<u32>,
    /// Version the client requires before sending a probe call.
    #[arg(long)]
    pub require: Option<u32>,
    /// Maximum wait for the version query (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

/// Router settings from a JSON file, or defaults.
pub fn load_config(path: Option<&Path>) -> CliResult<RouterConfig> {
    let Some(path) = path else {
        return Ok(RouterConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("cannot read {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
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
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
