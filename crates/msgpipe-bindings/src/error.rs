use msgpipe_system::SystemError;
use msgpipe_wire::ValidationError;

/// Violations of the control-message protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The peer requires a newer interface version than this side supports.
    #[error("peer requires interface version {required}, supported up to {supported}")]
    UnsupportedVersion { required: u32, supported: u32 },

    /// A control message carried an input this side does not understand and
    /// cannot ignore.
    #[error("unknown control input tag {tag} for message type {message_type:#x}")]
    UnknownControlInput { message_type: u32, tag: u32 },

    /// A request arrived without a request id.
    #[error("request without request id (message type {0:#x})")]
    MissingRequestId(u32),
}

/// Error returned by a message receiver.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The message could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(#[from] ValidationError),

    /// The message broke the protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The receiver failed to handle a well-formed message.
    #[error("receiver failed: {0}")]
    Failed(String),
}

impl DispatchError {
    pub fn failed(reason: impl Into<String>) -> Self {
        DispatchError::Failed(reason.into())
    }

    /// Malformed input and protocol violations always close the connection;
    /// only receiver failures go through the fault handler.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, DispatchError::Failed(_))
    }
}

/// Why a connection was closed with an error. Passed to the error handler.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(#[from] SystemError),

    /// The peer endpoint was closed.
    #[error("peer closed")]
    PeerClosed,

    /// A received message failed validation.
    #[error("malformed message: {0}")]
    Malformed(#[from] ValidationError),

    /// The peer violated the protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The receiver failed and the fault handler chose to close.
    #[error("receiver error: {0}")]
    Receiver(DispatchError),

    /// A responder for an incoming request was dropped without responding.
    #[error("responder for request {request_id} dropped without a response")]
    ResponderDropped { request_id: u64 },
}

impl ConnectionError {
    /// Map a transport result, treating `FailedPrecondition` as peer closure.
    pub fn from_system(err: SystemError) -> Self {
        match err {
            SystemError::FailedPrecondition => ConnectionError::PeerClosed,
            other => ConnectionError::Transport(other),
        }
    }

    /// Numeric code for diagnostics: the transport code for transport
    /// errors, a fixed code per kind otherwise.
    pub fn code(&self) -> u32 {
        match self {
            ConnectionError::Transport(err) => err.code(),
            ConnectionError::PeerClosed => SystemError::FailedPrecondition.code(),
            ConnectionError::Malformed(_) => 100,
            ConnectionError::Protocol(_) => 101,
            ConnectionError::Receiver(_) => 102,
            ConnectionError::ResponderDropped { .. } => 103,
        }
    }
}

impl From<DispatchError> for ConnectionError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Malformed(err) => ConnectionError::Malformed(err),
            DispatchError::Protocol(err) => ConnectionError::Protocol(err),
            err @ DispatchError::Failed(_) => ConnectionError::Receiver(err),
        }
    }
}

/// Error returned by [`Router::call`](crate::Router::call).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// The request could not be sent.
    #[error("request could not be sent")]
    SendFailed,

    /// The connection closed before the response arrived.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
