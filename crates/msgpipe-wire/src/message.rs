use bytes::BytesMut;
use msgpipe_system::{RawMessage, UntypedHandle};

use crate::codec::Struct;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{Result, SerializationError, ValidationError};
use crate::header::{MessageHeader, FLAGS_OFFSET, REQUEST_ID_OFFSET};

/// Bytes plus the handles that travel with them.
///
/// Writing a message to a pipe transfers ownership of its handles to the
/// reader. The only mutation after construction is header stamping.
#[derive(Debug, Default)]
pub struct Message {
    data: BytesMut,
    handles: Vec<UntypedHandle>,
}

impl Message {
    pub fn new(data: BytesMut, handles: Vec<UntypedHandle>) -> Self {
        Self { data, handles }
    }

    /// A message consisting of `header` followed by `params`.
    pub fn build<S: Struct>(
        header: MessageHeader,
        params: S,
    ) -> std::result::Result<Self, SerializationError> {
        let mut encoder = Encoder::for_message(&header);
        encoder.encode_struct(params)?;
        Ok(encoder.into_message())
    }

    pub fn from_raw(raw: RawMessage) -> Self {
        Self {
            data: BytesMut::from(raw.bytes.as_ref()),
            handles: raw.handles,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn handles(&self) -> &[UntypedHandle] {
        &self.handles
    }

    /// Parse the header without consuming the message.
    pub fn header(&self) -> Result<MessageHeader> {
        MessageHeader::decode(&self.data)
    }

    /// Overwrite the flags and request id of a header that has a request id
    /// slot.
    pub fn stamp(&mut self, flags: u32, request_id: u64) -> Result<()> {
        let header = MessageHeader {
            flags,
            request_id,
            ..self.header()?
        };
        if !header.has_request_id() {
            return Err(ValidationError::MissingRequestId);
        }
        header.validate()?;
        self.data[FLAGS_OFFSET..FLAGS_OFFSET + 4].copy_from_slice(&flags.to_le_bytes());
        self.data[REQUEST_ID_OFFSET..REQUEST_ID_OFFSET + 8]
            .copy_from_slice(&request_id.to_le_bytes());
        Ok(())
    }

    /// Validate the header, yielding a [`ServiceMessage`].
    pub fn into_service_message(self) -> Result<ServiceMessage> {
        let header = self.header()?;
        Ok(ServiceMessage {
            message: self,
            header,
        })
    }

    pub fn into_parts(self) -> (BytesMut, Vec<UntypedHandle>) {
        (self.data, self.handles)
    }
}

/// A message whose header has been validated.
#[derive(Debug)]
pub struct ServiceMessage {
    message: Message,
    header: MessageHeader,
}

impl ServiceMessage {
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// The body after the header block.
    pub fn payload(&self) -> &[u8] {
        &self.message.data[self.header.encoded_len()..]
    }

    pub fn message_type(&self) -> u32 {
        self.header.message_type
    }

    pub fn request_id(&self) -> u64 {
        self.header.request_id
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    /// Decode the payload as `S`, taking ownership of the message handles.
    ///
    /// Handles not referenced by the payload are closed.
    pub fn decode_payload<S: Struct>(self) -> Result<S> {
        let prefix = self.header.encoded_len();
        let Message { data, handles } = self.message;
        let mut decoder = Decoder::with_prefix(&data, handles, prefix);
        decoder.decode_struct(prefix)
    }

    /// Decode after checking the message type.
    pub fn decode_as<S: Struct>(self, expected_type: u32) -> Result<S> {
        if self.header.message_type != expected_type {
            return Err(ValidationError::UnexpectedMessageType {
                expected: expected_type,
                actual: self.header.message_type,
            });
        }
        self.decode_payload()
    }
}
