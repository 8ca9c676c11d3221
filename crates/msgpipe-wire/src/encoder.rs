use bytes::{Bytes, BytesMut};
use msgpipe_system::UntypedHandle;

use crate::codec::{ArrayElement, Field, Struct, Union};
use crate::error::SerializationError;
use crate::header::MessageHeader;
use crate::layout::{align, ARRAY_HEADER_SIZE, INVALID_HANDLE_INDEX, STRUCT_HEADER_SIZE, UNION_SIZE};
use crate::message::Message;

type Result<T> = std::result::Result<T, SerializationError>;

/// Appends blocks to a message buffer.
///
/// Blocks are allocated in encoding order, each 8-aligned and zero-filled.
/// Offsets returned by the allocation methods are absolute positions in the
/// buffer; field writers take such offsets.
#[derive(Debug)]
pub struct Encoder {
    buf: BytesMut,
    handles: Vec<UntypedHandle>,
    handle_channel: bool,
}

impl Encoder {
    /// Encoder that can carry handles.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            handles: Vec::new(),
            handle_channel: true,
        }
    }

    /// Encoder for a standalone buffer; encoding a valid handle fails.
    pub fn without_handles() -> Self {
        Self {
            handle_channel: false,
            ..Self::new()
        }
    }

    /// Encoder whose buffer starts with `header`.
    pub fn for_message(header: &MessageHeader) -> Self {
        let mut encoder = Self::new();
        header.encode(&mut encoder.buf);
        encoder
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Reserve a zeroed block of `size` bytes (rounded up to 8) and return
    /// its offset.
    pub fn alloc(&mut self, size: usize) -> usize {
        let offset = self.buf.len();
        self.buf.resize(offset + align(size), 0);
        offset
    }

    pub fn put_u8(&mut self, at: usize, value: u8) {
        self.buf[at] = value;
    }

    pub fn put_u16(&mut self, at: usize, value: u16) {
        self.put(at, &value.to_le_bytes());
    }

    pub fn put_u32(&mut self, at: usize, value: u32) {
        self.put(at, &value.to_le_bytes());
    }

    pub fn put_u64(&mut self, at: usize, value: u64) {
        self.put(at, &value.to_le_bytes());
    }

    pub fn put_i32(&mut self, at: usize, value: i32) {
        self.put(at, &value.to_le_bytes());
    }

    pub fn put_i64(&mut self, at: usize, value: i64) {
        self.put(at, &value.to_le_bytes());
    }

    pub fn put_f64(&mut self, at: usize, value: f64) {
        self.put(at, &value.to_le_bytes());
    }

    /// Set or clear bit `bit` of the byte at `at`.
    pub fn put_bool(&mut self, at: usize, bit: u8, value: bool) {
        if value {
            self.buf[at] |= 1 << bit;
        } else {
            self.buf[at] &= !(1 << bit);
        }
    }

    fn put(&mut self, at: usize, bytes: &[u8]) {
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn put_pointer(&mut self, at: usize, target: Option<usize>) {
        let offset = target.map_or(0, |target| (target - at) as u64);
        self.put_u64(at, offset);
    }

    fn block_size(size: usize) -> Result<u32> {
        u32::try_from(size).map_err(|_| SerializationError::TooLarge(size))
    }

    /// Encode `value` as a new struct block and return the block offset.
    pub fn encode_struct<S: Struct>(&mut self, value: S) -> Result<usize> {
        let num_bytes = align(STRUCT_HEADER_SIZE + S::DATA_SIZE);
        let offset = self.alloc(num_bytes);
        self.put_u32(offset, Self::block_size(num_bytes)?);
        self.put_u32(offset + 4, S::VERSION);
        value.encode_fields(self, offset + STRUCT_HEADER_SIZE)?;
        Ok(offset)
    }

    /// Encode a pointer at `at` to an out-of-line struct.
    pub fn encode_struct_pointer<S: Struct>(
        &mut self,
        at: usize,
        value: Option<S>,
        field: Field,
    ) -> Result<()> {
        match value {
            Some(value) => {
                let target = self.encode_struct(value)?;
                self.put_pointer(at, Some(target));
                Ok(())
            }
            None if field.nullable => {
                self.put_pointer(at, None);
                Ok(())
            }
            None => Err(SerializationError::MissingField(field.name)),
        }
    }

    /// Encode a pointer at `at` to an array of plain elements.
    pub fn encode_array<T: ArrayElement>(
        &mut self,
        at: usize,
        value: Option<&[T]>,
        field: Field,
    ) -> Result<()> {
        let Some(elements) = value else {
            return self.encode_null(at, field);
        };
        if let Some(expected) = field.fixed_len {
            if elements.len() != expected {
                return Err(SerializationError::FixedArrayLength {
                    field: field.name,
                    expected,
                    actual: elements.len(),
                });
            }
        }

        let num_bytes = ARRAY_HEADER_SIZE + T::encoded_len(elements.len());
        let offset = self.alloc(num_bytes);
        self.put_u32(offset, Self::block_size(num_bytes)?);
        self.put_u32(offset + 4, Self::block_size(elements.len())?);
        let start = offset + ARRAY_HEADER_SIZE;
        T::encode_all(elements, &mut self.buf[start..start + T::encoded_len(elements.len())]);
        self.put_pointer(at, Some(offset));
        Ok(())
    }

    /// Encode a pointer at `at` to a UTF-8 string (a byte array).
    pub fn encode_string(&mut self, at: usize, value: Option<&str>, field: Field) -> Result<()> {
        self.encode_array(at, value.map(str::as_bytes), field)
    }

    /// Encode an inline union at `at`.
    pub fn encode_union<U: Union>(
        &mut self,
        at: usize,
        value: Option<U>,
        field: Field,
    ) -> Result<()> {
        match value {
            Some(value) => {
                self.put_u32(at, UNION_SIZE as u32);
                self.put_u32(at + 4, value.tag());
                value.encode_value(self, at + 8)
            }
            // The slot is already zero: size 0 is the null union.
            None if field.nullable => Ok(()),
            None => Err(SerializationError::MissingField(field.name)),
        }
    }

    /// Move `handle` into the message and write its index at `at`.
    pub fn encode_handle(&mut self, at: usize, handle: UntypedHandle, field: Field) -> Result<()> {
        if !handle.is_valid() {
            if !field.nullable {
                return Err(SerializationError::InvalidHandle(field.name));
            }
            self.put_u32(at, INVALID_HANDLE_INDEX);
            return Ok(());
        }
        if !self.handle_channel {
            return Err(SerializationError::HandlesNotSupported);
        }
        let index = Self::block_size(self.handles.len())?;
        self.handles.push(handle);
        self.put_u32(at, index);
        Ok(())
    }

    fn encode_null(&mut self, at: usize, field: Field) -> Result<()> {
        if !field.nullable {
            return Err(SerializationError::MissingField(field.name));
        }
        self.put_pointer(at, None);
        Ok(())
    }

    pub fn into_message(self) -> Message {
        Message::new(self.buf, self.handles)
    }

    /// The encoded bytes. Any attached handles are closed.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
