use std::fmt;
use std::io;

use msgpipe_bindings::ConnectionError;
use msgpipe_system::SystemError;
use msgpipe_wire::SerializationError;

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
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => USAGE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn system_error(context: &str, err: SystemError) -> CliError {
    let code = match err {
        SystemError::DeadlineExceeded | SystemError::ShouldWait => TIMEOUT,
        SystemError::InvalidArgument => USAGE,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn connection_error(context: &str, err: ConnectionError) -> CliError {
    match err {
        ConnectionError::Transport(err) => system_error(context, err),
        ConnectionError::Malformed(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ConnectionError::PeerClosed
        | ConnectionError::Protocol(_)
        | ConnectionError::ResponderDropped { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        ConnectionError::Receiver(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

pub fn serialization_error(context: &str, err: SerializationError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}
