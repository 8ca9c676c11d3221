/// Errors raised while validating or decoding received bytes.
///
/// Any of these means the peer sent something malformed; the connection that
/// received it is expected to close.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The buffer ended before a complete object.
    #[error("message too short ({needed} bytes needed, {available} available)")]
    MessageTooShort { needed: usize, available: usize },

    /// The message exceeds the receiver's size limit.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The header size is not one of 8, 16 or 24.
    #[error("unexpected message header size {0}")]
    UnexpectedHeaderSize(u32),

    /// The header version does not match its size.
    #[error("header version {version} does not match size {size}")]
    HeaderVersionMismatch { size: u32, version: u32 },

    /// The header carries flag bits this implementation does not know.
    #[error("unknown message flags {0:#x}")]
    UnknownFlags(u32),

    /// Flags are inconsistent with each other or with the header size.
    #[error("invalid message flag combination {flags:#x} for header size {size}")]
    InvalidFlags { size: u32, flags: u32 },

    /// The header has no request id slot but one was required.
    #[error("message header has no request id")]
    MissingRequestId,

    /// An object does not start on an 8-byte boundary.
    #[error("misaligned object at offset {0}")]
    MisalignedObject(usize),

    /// An object extends past the end of the buffer.
    #[error("object at offset {offset} ({size} bytes) exceeds buffer of {len} bytes")]
    OutOfRange { offset: usize, size: usize, len: usize },

    /// An object overlaps memory already claimed by an earlier object, or a
    /// pointer points backwards.
    #[error("overlapping or backward object at offset {0}")]
    OverlappingObject(usize),

    /// A pointer offset overflows.
    #[error("illegal pointer at offset {0}")]
    IllegalPointer(usize),

    /// A struct header is too small for the expected fields.
    #[error("unexpected struct header ({num_bytes} bytes, need at least {expected})")]
    UnexpectedStructHeader { num_bytes: u32, expected: usize },

    /// An array header is inconsistent with its element count.
    #[error("unexpected array header ({num_bytes} bytes for {num_elements} elements)")]
    UnexpectedArrayHeader { num_bytes: u32, num_elements: u32 },

    /// A fixed-size array has the wrong number of elements.
    #[error("field `{field}` has {actual} elements, expected {expected}")]
    FixedArrayLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A non-nullable pointer or union is null.
    #[error("unexpected null in field `{0}`")]
    UnexpectedNull(&'static str),

    /// A non-nullable handle is invalid.
    #[error("unexpected invalid handle in field `{0}`")]
    UnexpectedInvalidHandle(&'static str),

    /// A handle index is out of range or not strictly increasing.
    #[error("illegal handle index {0}")]
    IllegalHandle(u32),

    /// A union's inline size is neither 0 nor 16.
    #[error("invalid union size {0}")]
    InvalidUnionSize(u32),

    /// A union tag that this type does not define.
    #[error("unknown union tag {0}")]
    UnknownUnionTag(u32),

    /// A string field is not valid UTF-8.
    #[error("field `{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// The message is not of the expected type.
    #[error("unexpected message type {actual:#x} (expected {expected:#x})")]
    UnexpectedMessageType { expected: u32, actual: u32 },
}

/// Errors raised while encoding a value.
///
/// These are reported to the caller synchronously; nothing is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializationError {
    /// A non-nullable struct, array, string or union field is unset.
    #[error("required field `{0}` is not set")]
    MissingField(&'static str),

    /// A non-nullable handle field holds the invalid handle.
    #[error("required handle field `{0}` is invalid")]
    InvalidHandle(&'static str),

    /// A fixed-size array field has the wrong length.
    #[error("field `{field}` has {actual} elements, expected {expected}")]
    FixedArrayLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The value contains handles but there is no handle channel.
    #[error("value contains handles and cannot be serialized without a message")]
    HandlesNotSupported,

    /// An object is too large for its 32-bit size field.
    #[error("object too large ({0} bytes)")]
    TooLarge(usize),
}

pub type Result<T> = std::result::Result<T, ValidationError>;
