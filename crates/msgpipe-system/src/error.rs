/// Result codes reported by message pipe operations.
///
/// Every variant carries the numeric code used by the transport ABI, see
/// [`SystemError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum SystemError {
    /// The operation was cancelled, e.g. a watch whose handle was closed.
    #[error("operation cancelled")]
    Cancelled,

    /// Unknown failure.
    #[error("unknown error")]
    Unknown,

    /// An argument was invalid (invalid handle, empty signal mask, ...).
    #[error("invalid argument")]
    InvalidArgument,

    /// A deadline expired before the operation could complete.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The requested entity was not found.
    #[error("not found")]
    NotFound,

    /// A message or resource limit was exceeded.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// The object is not in a state that permits the operation, usually
    /// because the peer endpoint was closed.
    #[error("failed precondition (peer closed)")]
    FailedPrecondition,

    /// The operation was aborted.
    #[error("operation aborted")]
    Aborted,

    /// The operation is not implemented by this transport.
    #[error("unimplemented")]
    Unimplemented,

    /// Internal invariant violation in the transport.
    #[error("internal transport error")]
    Internal,

    /// Nothing is available yet; retry once the handle becomes ready.
    #[error("should wait (nothing available)")]
    ShouldWait,
}

impl SystemError {
    /// Numeric result code.
    pub fn code(self) -> u32 {
        match self {
            SystemError::Cancelled => 1,
            SystemError::Unknown => 2,
            SystemError::InvalidArgument => 3,
            SystemError::DeadlineExceeded => 4,
            SystemError::NotFound => 5,
            SystemError::ResourceExhausted => 8,
            SystemError::FailedPrecondition => 9,
            SystemError::Aborted => 10,
            SystemError::Unimplemented => 12,
            SystemError::Internal => 13,
            SystemError::ShouldWait => 17,
        }
    }

    /// Map a numeric result code back to an error. `0` (OK) and unknown
    /// codes map to `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        let err = match code {
            1 => SystemError::Cancelled,
            2 => SystemError::Unknown,
            3 => SystemError::InvalidArgument,
            4 => SystemError::DeadlineExceeded,
            5 => SystemError::NotFound,
            8 => SystemError::ResourceExhausted,
            9 => SystemError::FailedPrecondition,
            10 => SystemError::Aborted,
            12 => SystemError::Unimplemented,
            13 => SystemError::Internal,
            17 => SystemError::ShouldWait,
            _ => return None,
        };
        Some(err)
    }

    /// True for conditions a reader should treat as "try again later".
    pub fn is_should_wait(self) -> bool {
        matches!(self, SystemError::ShouldWait)
    }
}

pub type Result<T> = std::result::Result<T, SystemError>;
