use bytes::{BufMut, BytesMut};

use crate::error::{Result, ValidationError};

/// The message expects a response carrying the same request id.
pub const EXPECTS_RESPONSE: u32 = 1 << 0;

/// The message is a response to the request with the same request id.
pub const IS_RESPONSE: u32 = 1 << 1;

const KNOWN_FLAGS: u32 = EXPECTS_RESPONSE | IS_RESPONSE;

/// Header without a request id.
pub const HEADER_SIZE_V0: u32 = 8;
/// Header with a request id.
pub const HEADER_SIZE_V1: u32 = 16;
/// Header with a request id and a reserved extension word.
pub const HEADER_SIZE_V2: u32 = 24;

/// Header block prefix: `[size u32][version u32]`.
pub const HEADER_PREFIX_SIZE: usize = 8;

/// Decoded message header.
///
/// Wire format (little-endian):
/// ```text
/// ┌────────────┬─────────────┬──────────┬──────────┬──────────────────┬───────────────┐
/// │ size (4B)  │ version (4B)│ type (4B)│ flags(4B)│ request_id (8B)  │ reserved (8B) │
/// │ 8|16|24    │ 0|1|2       │          │          │ size >= 16       │ size == 24    │
/// └────────────┴─────────────┴──────────┴──────────┴──────────────────┴───────────────┘
/// ```
/// The block occupies `8 + size` bytes; the payload follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Field-area length: 8, 16 or 24.
    pub size: u32,
    pub message_type: u32,
    pub flags: u32,
    /// Meaningful only when `size >= 16`.
    pub request_id: u64,
}

impl MessageHeader {
    /// One-way message with no request id slot.
    pub fn one_way(message_type: u32) -> Self {
        Self {
            size: HEADER_SIZE_V0,
            message_type,
            flags: 0,
            request_id: 0,
        }
    }

    /// Request expecting a response. The request id is assigned by the
    /// router when the message is sent.
    pub fn request(message_type: u32) -> Self {
        Self {
            size: HEADER_SIZE_V1,
            message_type,
            flags: EXPECTS_RESPONSE,
            request_id: 0,
        }
    }

    /// Response to the request with `request_id`.
    pub fn response(message_type: u32, request_id: u64) -> Self {
        Self {
            size: HEADER_SIZE_V1,
            message_type,
            flags: IS_RESPONSE,
            request_id,
        }
    }

    /// Header version implied by `size`.
    pub fn version(&self) -> u32 {
        match self.size {
            HEADER_SIZE_V1 => 1,
            HEADER_SIZE_V2 => 2,
            _ => 0,
        }
    }

    pub fn has_request_id(&self) -> bool {
        self.size >= HEADER_SIZE_V1
    }

    pub fn expects_response(&self) -> bool {
        self.flags & EXPECTS_RESPONSE != 0
    }

    pub fn is_response(&self) -> bool {
        self.flags & IS_RESPONSE != 0
    }

    /// Bytes the header block occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_PREFIX_SIZE + self.size as usize
    }

    /// Check size, version and flag rules.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.size, HEADER_SIZE_V0 | HEADER_SIZE_V1 | HEADER_SIZE_V2) {
            return Err(ValidationError::UnexpectedHeaderSize(self.size));
        }
        if self.flags & !KNOWN_FLAGS != 0 {
            return Err(ValidationError::UnknownFlags(self.flags));
        }

        let expects = self.expects_response();
        let is_response = self.is_response();
        let consistent = if self.has_request_id() {
            expects != is_response
        } else {
            !expects && !is_response
        };
        if !consistent {
            return Err(ValidationError::InvalidFlags {
                size: self.size,
                flags: self.flags,
            });
        }
        Ok(())
    }

    /// Append the header block to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u32_le(self.size);
        dst.put_u32_le(self.version());
        dst.put_u32_le(self.message_type);
        dst.put_u32_le(self.flags);
        if self.has_request_id() {
            dst.put_u64_le(self.request_id);
        }
        if self.size == HEADER_SIZE_V2 {
            dst.put_u64_le(0);
        }
    }

    /// Parse and validate the header block at the start of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let size = read_u32(data, 0)?;
        let version = read_u32(data, 4)?;
        let header = Self {
            size,
            message_type: read_u32(data, 8)?,
            flags: read_u32(data, 12)?,
            request_id: 0,
        };
        header.validate()?;
        if version != header.version() {
            return Err(ValidationError::HeaderVersionMismatch { size, version });
        }
        if data.len() < header.encoded_len() {
            return Err(ValidationError::MessageTooShort {
                needed: header.encoded_len(),
                available: data.len(),
            });
        }

        let request_id = if header.has_request_id() {
            read_u64(data, 16)?
        } else {
            0
        };
        Ok(Self {
            request_id,
            ..header
        })
    }
}

/// Byte offset of the flags word inside the header block.
pub(crate) const FLAGS_OFFSET: usize = 12;
/// Byte offset of the request id inside the header block.
pub(crate) const REQUEST_ID_OFFSET: usize = 16;

fn read_u32(data: &[u8], at: usize) -> Result<u32> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(slice(data, at, 4)?);
    Ok(u32::from_le_bytes(raw))
}

fn read_u64(data: &[u8], at: usize) -> Result<u64> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(slice(data, at, 8)?);
    Ok(u64::from_le_bytes(raw))
}

fn slice(data: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    data.get(at..at + len)
        .ok_or(ValidationError::MessageTooShort {
            needed: at + len,
            available: data.len(),
        })
}
