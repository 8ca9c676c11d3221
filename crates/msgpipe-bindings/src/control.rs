//! Interface control messages.
//!
//! Two reserved message types sit at the top of the type space:
//! - [`RUN_MESSAGE_ID`]: request/response, used to query the peer's
//!   interface version or to flush the pipe in tests;
//! - [`RUN_OR_CLOSE_PIPE_MESSAGE_ID`]: one-way, used to require a minimum
//!   version. The receiver closes the pipe if it cannot comply.

use msgpipe_wire::{
    Decoder, Encoder, Field, Message, MessageHeader, SerializationError, ServiceMessage, Struct,
    Union, ValidationError,
};
use tracing::{debug, warn};

use crate::error::{DispatchError, ProtocolError};

/// Control request expecting a response.
pub const RUN_MESSAGE_ID: u32 = 0xFFFF_FFFF;

/// Control message that closes the pipe when it cannot be honored.
pub const RUN_OR_CLOSE_PIPE_MESSAGE_ID: u32 = 0xFFFF_FFFE;

const QUERY_VERSION_TAG: u32 = 0;
const FLUSH_FOR_TESTING_TAG: u32 = 1;
const QUERY_VERSION_RESULT_TAG: u32 = 0;
const REQUIRE_VERSION_TAG: u32 = 0;

/// Whether `message_type` is one of the reserved control types.
pub fn is_control_message(message_type: u32) -> bool {
    matches!(message_type, RUN_MESSAGE_ID | RUN_OR_CLOSE_PIPE_MESSAGE_ID)
}

/// How an inbound message is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Anything addressed to the application receiver.
    Application,
    /// A `Run` request: a version query or a test flush.
    QueryVersion,
    /// A `RunOrClosePipe` message; its only defined input requires a
    /// minimum interface version.
    RequireVersion,
}

impl MessageKind {
    /// Classify a non-response message.
    pub fn of(header: &MessageHeader) -> Self {
        match header.message_type {
            RUN_MESSAGE_ID => MessageKind::QueryVersion,
            RUN_OR_CLOSE_PIPE_MESSAGE_ID => MessageKind::RequireVersion,
            _ => MessageKind::Application,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryVersion;

impl Struct for QueryVersion {
    const DATA_SIZE: usize = 0;

    fn encode_fields(self, _: &mut Encoder, _: usize) -> Result<(), SerializationError> {
        Ok(())
    }

    fn decode_fields(_: &mut Decoder<'_>, _: usize) -> msgpipe_wire::Result<Self> {
        Ok(QueryVersion)
    }
}

/// Round-trip barrier: the callee answers with an empty output once every
/// earlier message on the pipe has been dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushForTesting;

impl Struct for FlushForTesting {
    const DATA_SIZE: usize = 0;

    fn encode_fields(self, _: &mut Encoder, _: usize) -> Result<(), SerializationError> {
        Ok(())
    }

    fn decode_fields(_: &mut Decoder<'_>, _: usize) -> msgpipe_wire::Result<Self> {
        Ok(FlushForTesting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryVersionResult {
    pub version: u32,
}

impl Struct for QueryVersionResult {
    const DATA_SIZE: usize = 8;

    fn encode_fields(self, encoder: &mut Encoder, base: usize) -> Result<(), SerializationError> {
        encoder.put_u32(base, self.version);
        Ok(())
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> msgpipe_wire::Result<Self> {
        Ok(QueryVersionResult {
            version: decoder.u32(base)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequireVersion {
    pub version: u32,
}

impl Struct for RequireVersion {
    const DATA_SIZE: usize = 8;

    fn encode_fields(self, encoder: &mut Encoder, base: usize) -> Result<(), SerializationError> {
        encoder.put_u32(base, self.version);
        Ok(())
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> msgpipe_wire::Result<Self> {
        Ok(RequireVersion {
            version: decoder.u32(base)?,
        })
    }
}

/// Decode the struct a union value slot points to. Union struct members are
/// never null.
fn decode_member<S: Struct>(
    decoder: &mut Decoder<'_>,
    at: usize,
    field: Field,
) -> msgpipe_wire::Result<S> {
    decoder
        .decode_struct_pointer(at, field)?
        .ok_or(ValidationError::UnexpectedNull(field.name))
}

const QUERY_VERSION: Field = Field::required("query_version");
const FLUSH_FOR_TESTING: Field = Field::required("flush_for_testing");
const QUERY_VERSION_RESULT: Field = Field::required("query_version_result");
const REQUIRE_VERSION: Field = Field::required("require_version");

/// Input of a `Run` request. Tags from newer peers decode as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunInput {
    QueryVersion(QueryVersion),
    FlushForTesting(FlushForTesting),
    Unknown(u32),
}

impl Union for RunInput {
    fn tag(&self) -> u32 {
        match self {
            RunInput::QueryVersion(_) => QUERY_VERSION_TAG,
            RunInput::FlushForTesting(_) => FLUSH_FOR_TESTING_TAG,
            RunInput::Unknown(tag) => *tag,
        }
    }

    fn encode_value(self, encoder: &mut Encoder, at: usize) -> Result<(), SerializationError> {
        match self {
            RunInput::QueryVersion(value) => {
                encoder.encode_struct_pointer(at, Some(value), QUERY_VERSION)
            }
            RunInput::FlushForTesting(value) => {
                encoder.encode_struct_pointer(at, Some(value), FLUSH_FOR_TESTING)
            }
            RunInput::Unknown(_) => Ok(()),
        }
    }

    fn decode_value(decoder: &mut Decoder<'_>, tag: u32, at: usize) -> msgpipe_wire::Result<Self> {
        match tag {
            QUERY_VERSION_TAG => {
                decode_member(decoder, at, QUERY_VERSION).map(RunInput::QueryVersion)
            }
            FLUSH_FOR_TESTING_TAG => {
                decode_member(decoder, at, FLUSH_FOR_TESTING).map(RunInput::FlushForTesting)
            }
            other => Ok(RunInput::Unknown(other)),
        }
    }
}

/// Output of a `Run` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutput {
    QueryVersionResult(QueryVersionResult),
    Unknown(u32),
}

impl Union for RunOutput {
    fn tag(&self) -> u32 {
        match self {
            RunOutput::QueryVersionResult(_) => QUERY_VERSION_RESULT_TAG,
            RunOutput::Unknown(tag) => *tag,
        }
    }

    fn encode_value(self, encoder: &mut Encoder, at: usize) -> Result<(), SerializationError> {
        match self {
            RunOutput::QueryVersionResult(value) => {
                encoder.encode_struct_pointer(at, Some(value), QUERY_VERSION_RESULT)
            }
            RunOutput::Unknown(_) => Ok(()),
        }
    }

    fn decode_value(decoder: &mut Decoder<'_>, tag: u32, at: usize) -> msgpipe_wire::Result<Self> {
        match tag {
            QUERY_VERSION_RESULT_TAG => {
                decode_member(decoder, at, QUERY_VERSION_RESULT).map(RunOutput::QueryVersionResult)
            }
            other => Ok(RunOutput::Unknown(other)),
        }
    }
}

/// Input of a `RunOrClosePipe` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOrClosePipeInput {
    RequireVersion(RequireVersion),
    Unknown(u32),
}

impl Union for RunOrClosePipeInput {
    fn tag(&self) -> u32 {
        match self {
            RunOrClosePipeInput::RequireVersion(_) => REQUIRE_VERSION_TAG,
            RunOrClosePipeInput::Unknown(tag) => *tag,
        }
    }

    fn encode_value(self, encoder: &mut Encoder, at: usize) -> Result<(), SerializationError> {
        match self {
            RunOrClosePipeInput::RequireVersion(value) => {
                encoder.encode_struct_pointer(at, Some(value), REQUIRE_VERSION)
            }
            RunOrClosePipeInput::Unknown(_) => Ok(()),
        }
    }

    fn decode_value(decoder: &mut Decoder<'_>, tag: u32, at: usize) -> msgpipe_wire::Result<Self> {
        match tag {
            REQUIRE_VERSION_TAG => {
                decode_member(decoder, at, REQUIRE_VERSION).map(RunOrClosePipeInput::RequireVersion)
            }
            other => Ok(RunOrClosePipeInput::Unknown(other)),
        }
    }
}

const INPUT: Field = Field::required("input");
const OUTPUT: Field = Field::nullable("output");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunMessageParams {
    pub input: RunInput,
}

impl Struct for RunMessageParams {
    const DATA_SIZE: usize = 16;

    fn encode_fields(self, encoder: &mut Encoder, base: usize) -> Result<(), SerializationError> {
        encoder.encode_union(base, Some(self.input), INPUT)
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> msgpipe_wire::Result<Self> {
        let input = decoder
            .decode_union(base, INPUT)?
            .ok_or(ValidationError::UnexpectedNull(INPUT.name))?;
        Ok(RunMessageParams { input })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResponseMessageParams {
    /// Empty when the request's input was not understood.
    pub output: Option<RunOutput>,
}

impl Struct for RunResponseMessageParams {
    const DATA_SIZE: usize = 16;

    fn encode_fields(self, encoder: &mut Encoder, base: usize) -> Result<(), SerializationError> {
        encoder.encode_union(base, self.output, OUTPUT)
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> msgpipe_wire::Result<Self> {
        Ok(RunResponseMessageParams {
            output: decoder.decode_union(base, OUTPUT)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOrClosePipeMessageParams {
    pub input: RunOrClosePipeInput,
}

impl Struct for RunOrClosePipeMessageParams {
    const DATA_SIZE: usize = 16;

    fn encode_fields(self, encoder: &mut Encoder, base: usize) -> Result<(), SerializationError> {
        encoder.encode_union(base, Some(self.input), INPUT)
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> msgpipe_wire::Result<Self> {
        let input = decoder
            .decode_union(base, INPUT)?
            .ok_or(ValidationError::UnexpectedNull(INPUT.name))?;
        Ok(RunOrClosePipeMessageParams { input })
    }
}

/// Build a version query. The router assigns the request id.
pub fn query_version_request() -> Result<Message, SerializationError> {
    Message::build(
        MessageHeader::request(RUN_MESSAGE_ID),
        RunMessageParams {
            input: RunInput::QueryVersion(QueryVersion),
        },
    )
}

/// Build a flush request. The router assigns the request id.
pub fn flush_for_testing_request() -> Result<Message, SerializationError> {
    Message::build(
        MessageHeader::request(RUN_MESSAGE_ID),
        RunMessageParams {
            input: RunInput::FlushForTesting(FlushForTesting),
        },
    )
}

/// Build a minimum-version requirement.
pub fn require_version_message(version: u32) -> Result<Message, SerializationError> {
    Message::build(
        MessageHeader::one_way(RUN_OR_CLOSE_PIPE_MESSAGE_ID),
        RunOrClosePipeMessageParams {
            input: RunOrClosePipeInput::RequireVersion(RequireVersion { version }),
        },
    )
}

/// Extract the version from a query response. Anything other than a
/// version result reads as version 0.
pub fn parse_query_version_response(response: ServiceMessage) -> Result<u32, DispatchError> {
    let params: RunResponseMessageParams = response.decode_as(RUN_MESSAGE_ID)?;
    Ok(match params.output {
        Some(RunOutput::QueryVersionResult(result)) => result.version,
        _ => 0,
    })
}

/// Callee side of the control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessageHandler {
    interface_version: u32,
}

impl ControlMessageHandler {
    pub fn new(interface_version: u32) -> Self {
        Self { interface_version }
    }

    pub fn interface_version(&self) -> u32 {
        self.interface_version
    }

    /// Answer a `Run` request. Flushes and unknown inputs get an empty
    /// output.
    pub fn handle_run(&self, message: ServiceMessage) -> Result<Message, DispatchError> {
        let message_type = message.message_type();
        if !message.header().expects_response() {
            return Err(ProtocolError::MissingRequestId(message_type).into());
        }
        let request_id = message.request_id();
        let params: RunMessageParams = message.decode_as(RUN_MESSAGE_ID)?;

        let output = match params.input {
            RunInput::QueryVersion(_) => Some(RunOutput::QueryVersionResult(QueryVersionResult {
                version: self.interface_version,
            })),
            RunInput::FlushForTesting(_) => None,
            RunInput::Unknown(tag) => {
                debug!(tag, "unknown run input, replying with empty output");
                None
            }
        };

        Message::build(
            MessageHeader::response(RUN_MESSAGE_ID, request_id),
            RunResponseMessageParams { output },
        )
        .map_err(|err| DispatchError::failed(err.to_string()))
    }

    /// Check a `RunOrClosePipe` message. An error means the pipe must close.
    pub fn handle_run_or_close_pipe(&self, message: ServiceMessage) -> Result<(), DispatchError> {
        let params: RunOrClosePipeMessageParams = message.decode_as(RUN_OR_CLOSE_PIPE_MESSAGE_ID)?;
        match params.input {
            RunOrClosePipeInput::RequireVersion(RequireVersion { version }) => {
                if version > self.interface_version {
                    warn!(
                        required = version,
                        supported = self.interface_version,
                        "peer requires unsupported interface version"
                    );
                    return Err(ProtocolError::UnsupportedVersion {
                        required: version,
                        supported: self.interface_version,
                    }
                    .into());
                }
                Ok(())
            }
            RunOrClosePipeInput::Unknown(tag) => Err(ProtocolError::UnknownControlInput {
                message_type: RUN_OR_CLOSE_PIPE_MESSAGE_ID,
                tag,
            }
            .into()),
        }
    }
}
