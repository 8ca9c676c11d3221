//! Payload used by the ping and negotiate commands.

use msgpipe_wire::{Decoder, Encoder, Field, SerializationError, Struct, ValidationError};

pub const ECHO: u32 = 1;
pub const PROBE: u32 = 2;

const DATA: Field = Field::required("data");

/// `struct Blob { array<uint8> data; };`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    /// `size` bytes of a repeating pattern, so corruption shows up.
    pub fn patterned(size: usize) -> Self {
        Self {
            data: (0..size).map(|i| (i % 251) as u8).collect(),
        }
    }
}

impl Struct for Blob {
    const DATA_SIZE: usize = 8;

    fn encode_fields(self, encoder: &mut Encoder, base: usize) -> Result<(), SerializationError> {
        encoder.encode_array(base, Some(self.data.as_slice()), DATA)
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> msgpipe_wire::Result<Self> {
        let data = decoder
            .decode_array(base, DATA)?
            .ok_or(ValidationError::UnexpectedNull(DATA.name))?;
        Ok(Blob { data })
    }
}
