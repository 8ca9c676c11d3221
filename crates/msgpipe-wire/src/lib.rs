//! Message format and struct encoding for msgpipe.
//!
//! Every message starts with a header block:
//! - `size`/`version` prefix (field area of 8, 16 or 24 bytes)
//! - message type and flags (`EXPECTS_RESPONSE`, `IS_RESPONSE`)
//! - a request id when the header is 16 bytes or larger
//!
//! The payload is a struct block encoded with [`Encoder`] and read back by
//! the validating [`Decoder`]. All integers are little-endian and every
//! block is 8-byte aligned.

pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod header;
pub mod layout;
pub mod message;

pub use codec::{deserialize_from_bytes, serialize_to_bytes, ArrayElement, Field, Struct, Union};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{Result, SerializationError, ValidationError};
pub use header::{MessageHeader, EXPECTS_RESPONSE, IS_RESPONSE};
pub use layout::{align, utf8_length};
pub use message::{Message, ServiceMessage};
