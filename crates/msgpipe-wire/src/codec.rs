use bytes::Bytes;

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{Result, SerializationError};

/// Name and nullability of an encoded field, used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub nullable: bool,
    /// Declared length of a fixed-size array field.
    pub fixed_len: Option<usize>,
}

impl Field {
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            nullable: false,
            fixed_len: None,
        }
    }

    pub const fn nullable(name: &'static str) -> Self {
        Self {
            name,
            nullable: true,
            fixed_len: None,
        }
    }

    /// Mark the field as a fixed-size array of `len` elements.
    pub const fn fixed(self, len: usize) -> Self {
        Self {
            fixed_len: Some(len),
            ..self
        }
    }
}

/// A struct with a known encoded layout.
///
/// `encode_fields` writes the field area starting at `base` (just past the
/// struct header); `decode_fields` reads it back. Field offsets are fixed per
/// type, and out-of-line children are appended through the encoder.
pub trait Struct: Sized {
    /// Size of the packed field area, excluding the 8-byte struct header.
    const DATA_SIZE: usize;
    const VERSION: u32 = 0;
    /// Whether any field (transitively) is a handle.
    const CONTAINS_HANDLES: bool = false;

    fn encode_fields(
        self,
        encoder: &mut Encoder,
        base: usize,
    ) -> std::result::Result<(), SerializationError>;

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> Result<Self>;
}

/// An inline tagged union.
///
/// The 8-byte value slot holds either a scalar or a pointer to an
/// out-of-line struct, depending on the variant.
pub trait Union: Sized {
    fn tag(&self) -> u32;

    fn encode_value(
        self,
        encoder: &mut Encoder,
        at: usize,
    ) -> std::result::Result<(), SerializationError>;

    fn decode_value(decoder: &mut Decoder<'_>, tag: u32, at: usize) -> Result<Self>;
}

/// A plain-data array element.
pub trait ArrayElement: Sized {
    /// Bytes needed for `count` packed elements.
    fn encoded_len(count: usize) -> usize;

    fn encode_all(elements: &[Self], dst: &mut [u8]);

    fn decode_all(src: &[u8], count: usize) -> Vec<Self>;
}

macro_rules! numeric_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ArrayElement for $ty {
                fn encoded_len(count: usize) -> usize {
                    count * std::mem::size_of::<$ty>()
                }

                fn encode_all(elements: &[Self], dst: &mut [u8]) {
                    let width = std::mem::size_of::<$ty>();
                    for (chunk, value) in dst.chunks_exact_mut(width).zip(elements) {
                        chunk.copy_from_slice(&value.to_le_bytes());
                    }
                }

                fn decode_all(src: &[u8], count: usize) -> Vec<Self> {
                    let width = std::mem::size_of::<$ty>();
                    src.chunks_exact(width)
                        .take(count)
                        .map(|chunk| {
                            let mut raw = [0u8; std::mem::size_of::<$ty>()];
                            raw.copy_from_slice(chunk);
                            <$ty>::from_le_bytes(raw)
                        })
                        .collect()
                }
            }
        )*
    };
}

numeric_element!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Booleans are bit-packed, least significant bit first.
impl ArrayElement for bool {
    fn encoded_len(count: usize) -> usize {
        count.div_ceil(8)
    }

    fn encode_all(elements: &[Self], dst: &mut [u8]) {
        for (i, &value) in elements.iter().enumerate() {
            if value {
                dst[i / 8] |= 1 << (i % 8);
            }
        }
    }

    fn decode_all(src: &[u8], count: usize) -> Vec<Self> {
        (0..count).map(|i| src[i / 8] & (1 << (i % 8)) != 0).collect()
    }
}

/// Serialize a struct into a standalone buffer with no handle channel.
///
/// Fails with [`SerializationError::HandlesNotSupported`] for any struct type
/// that contains handle fields, even if they are all unset.
pub fn serialize_to_bytes<S: Struct>(value: S) -> std::result::Result<Bytes, SerializationError> {
    if S::CONTAINS_HANDLES {
        return Err(SerializationError::HandlesNotSupported);
    }
    let mut encoder = Encoder::without_handles();
    encoder.encode_struct(value)?;
    Ok(encoder.into_bytes())
}

/// Decode a struct from a standalone buffer produced by
/// [`serialize_to_bytes`]. Any handle reference in the buffer is illegal.
pub fn deserialize_from_bytes<S: Struct>(data: &[u8]) -> Result<S> {
    let mut decoder = Decoder::new(data, Vec::new());
    decoder.decode_struct(0)
}
