//! Hand-written structs in the shape the bindings generator emits.
#![allow(dead_code)]

use msgpipe_system::UntypedHandle;
use msgpipe_wire::{
    Decoder, Encoder, Field, Result, SerializationError, Struct, Union, ValidationError,
};

/// `struct Pair { int32 a; int32 b; };`
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub a: i32,
    pub b: i32,
}

impl Struct for Pair {
    const DATA_SIZE: usize = 8;

    fn encode_fields(
        self,
        encoder: &mut Encoder,
        base: usize,
    ) -> std::result::Result<(), SerializationError> {
        encoder.put_i32(base, self.a);
        encoder.put_i32(base + 4, self.b);
        Ok(())
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> Result<Self> {
        Ok(Pair {
            a: decoder.i32(base)?,
            b: decoder.i32(base + 4)?,
        })
    }
}

/// `union Shape { uint32 radius; Pair rect; };`
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Radius(u32),
    Rect(Pair),
}

const SHAPE_RECT: Field = Field::required("rect");

impl Union for Shape {
    fn tag(&self) -> u32 {
        match self {
            Shape::Radius(_) => 0,
            Shape::Rect(_) => 1,
        }
    }

    fn encode_value(
        self,
        encoder: &mut Encoder,
        at: usize,
    ) -> std::result::Result<(), SerializationError> {
        match self {
            Shape::Radius(radius) => {
                encoder.put_u32(at, radius);
                Ok(())
            }
            Shape::Rect(rect) => encoder.encode_struct_pointer(at, Some(rect), SHAPE_RECT),
        }
    }

    fn decode_value(decoder: &mut Decoder<'_>, tag: u32, at: usize) -> Result<Self> {
        match tag {
            0 => Ok(Shape::Radius(decoder.u32(at)?)),
            1 => decoder
                .decode_struct_pointer(at, SHAPE_RECT)?
                .map(Shape::Rect)
                .ok_or(ValidationError::UnexpectedNull(SHAPE_RECT.name)),
            other => Err(ValidationError::UnknownUnionTag(other)),
        }
    }
}

/// ```text
/// struct Record {
///   Pair inner;
///   Pair? maybe_inner;
///   array<uint32> values;
///   array<uint8, 3> triple;
///   string name;
///   string? nickname;
///   array<bool>? tags;
///   Shape shape;
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub inner: Option<Pair>,
    pub maybe_inner: Option<Pair>,
    pub values: Option<Vec<u32>>,
    pub triple: Option<Vec<u8>>,
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub tags: Option<Vec<bool>>,
    pub shape: Option<Shape>,
}

pub const INNER: Field = Field::required("inner");
pub const MAYBE_INNER: Field = Field::nullable("maybe_inner");
pub const VALUES: Field = Field::required("values");
pub const TRIPLE: Field = Field::required("triple").fixed(3);
pub const NAME: Field = Field::required("name");
pub const NICKNAME: Field = Field::nullable("nickname");
pub const TAGS: Field = Field::nullable("tags");
pub const SHAPE: Field = Field::required("shape");

impl Record {
    pub fn complete() -> Self {
        Record {
            inner: Some(Pair { a: 1, b: 2 }),
            maybe_inner: Some(Pair { a: -3, b: 4 }),
            values: Some(vec![7, 8, 9]),
            triple: Some(vec![1, 2, 3]),
            name: Some("pipe \u{2192} peer".to_owned()),
            nickname: Some("p".to_owned()),
            tags: Some(vec![true, false, true]),
            shape: Some(Shape::Rect(Pair { a: 10, b: 20 })),
        }
    }
}

impl Struct for Record {
    const DATA_SIZE: usize = 72;

    fn encode_fields(
        self,
        encoder: &mut Encoder,
        base: usize,
    ) -> std::result::Result<(), SerializationError> {
        encoder.encode_struct_pointer(base, self.inner, INNER)?;
        encoder.encode_struct_pointer(base + 8, self.maybe_inner, MAYBE_INNER)?;
        encoder.encode_array(base + 16, self.values.as_deref(), VALUES)?;
        encoder.encode_array(base + 24, self.triple.as_deref(), TRIPLE)?;
        encoder.encode_string(base + 32, self.name.as_deref(), NAME)?;
        encoder.encode_string(base + 40, self.nickname.as_deref(), NICKNAME)?;
        encoder.encode_array(base + 48, self.tags.as_deref(), TAGS)?;
        encoder.encode_union(base + 56, self.shape, SHAPE)
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> Result<Self> {
        Ok(Record {
            inner: decoder.decode_struct_pointer(base, INNER)?,
            maybe_inner: decoder.decode_struct_pointer(base + 8, MAYBE_INNER)?,
            values: decoder.decode_array(base + 16, VALUES)?,
            triple: decoder.decode_array(base + 24, TRIPLE)?,
            name: decoder.decode_string(base + 32, NAME)?,
            nickname: decoder.decode_string(base + 40, NICKNAME)?,
            tags: decoder.decode_array(base + 48, TAGS)?,
            shape: decoder.decode_union(base + 56, SHAPE)?,
        })
    }
}

/// `struct HandleBox { handle h; handle? maybe; };`
#[derive(Debug, Default)]
pub struct HandleBox {
    pub h: UntypedHandle,
    pub maybe: UntypedHandle,
}

pub const H: Field = Field::required("h");
pub const MAYBE: Field = Field::nullable("maybe");

impl Struct for HandleBox {
    const DATA_SIZE: usize = 8;
    const CONTAINS_HANDLES: bool = true;

    fn encode_fields(
        self,
        encoder: &mut Encoder,
        base: usize,
    ) -> std::result::Result<(), SerializationError> {
        encoder.encode_handle(base, self.h, H)?;
        encoder.encode_handle(base + 4, self.maybe, MAYBE)
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> Result<Self> {
        Ok(HandleBox {
            h: decoder.decode_handle(base, H)?,
            maybe: decoder.decode_handle(base + 4, MAYBE)?,
        })
    }
}

/// `struct Text { string value; };`
#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub value: Option<String>,
}

impl Struct for Text {
    const DATA_SIZE: usize = 8;

    fn encode_fields(
        self,
        encoder: &mut Encoder,
        base: usize,
    ) -> std::result::Result<(), SerializationError> {
        encoder.encode_string(base, self.value.as_deref(), Field::required("value"))
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> Result<Self> {
        Ok(Text {
            value: decoder.decode_string(base, Field::required("value"))?,
        })
    }
}
