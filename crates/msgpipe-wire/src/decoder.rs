use msgpipe_system::UntypedHandle;

use crate::codec::{ArrayElement, Field, Struct, Union};
use crate::error::{Result, ValidationError};
use crate::layout::{
    is_aligned, ARRAY_HEADER_SIZE, INVALID_HANDLE_INDEX, STRUCT_HEADER_SIZE, UNION_SIZE,
};

/// Validating reader over an encoded buffer.
///
/// Blocks must be claimed in increasing, non-overlapping order, so every
/// pointer has to point forward past everything decoded so far. Handles are
/// taken out of the message as their indices are decoded; indices must be
/// strictly increasing.
pub struct Decoder<'a> {
    data: &'a [u8],
    handles: Vec<UntypedHandle>,
    claimed: usize,
    next_handle: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8], handles: Vec<UntypedHandle>) -> Self {
        Self {
            data,
            handles,
            claimed: 0,
            next_handle: 0,
        }
    }

    /// Decoder positioned after a prefix (such as the message header) that
    /// has already been validated.
    pub fn with_prefix(data: &'a [u8], handles: Vec<UntypedHandle>, prefix: usize) -> Self {
        Self {
            claimed: prefix,
            ..Self::new(data, handles)
        }
    }

    /// Mark `size` bytes at `offset` as belonging to one object.
    pub fn claim(&mut self, offset: usize, size: usize) -> Result<()> {
        if !is_aligned(offset) {
            return Err(ValidationError::MisalignedObject(offset));
        }
        if offset < self.claimed {
            return Err(ValidationError::OverlappingObject(offset));
        }
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= self.data.len())
            .ok_or(ValidationError::OutOfRange {
                offset,
                size,
                len: self.data.len(),
            })?;
        self.claimed = end;
        Ok(())
    }

    fn bytes<const N: usize>(&self, at: usize) -> Result<[u8; N]> {
        let slice = self
            .data
            .get(at..at.saturating_add(N))
            .ok_or(ValidationError::OutOfRange {
                offset: at,
                size: N,
                len: self.data.len(),
            })?;
        let mut raw = [0u8; N];
        raw.copy_from_slice(slice);
        Ok(raw)
    }

    pub fn u8(&self, at: usize) -> Result<u8> {
        Ok(self.bytes::<1>(at)?[0])
    }

    pub fn u16(&self, at: usize) -> Result<u16> {
        self.bytes(at).map(u16::from_le_bytes)
    }

    pub fn u32(&self, at: usize) -> Result<u32> {
        self.bytes(at).map(u32::from_le_bytes)
    }

    pub fn u64(&self, at: usize) -> Result<u64> {
        self.bytes(at).map(u64::from_le_bytes)
    }

    pub fn i32(&self, at: usize) -> Result<i32> {
        self.bytes(at).map(i32::from_le_bytes)
    }

    pub fn i64(&self, at: usize) -> Result<i64> {
        self.bytes(at).map(i64::from_le_bytes)
    }

    pub fn f64(&self, at: usize) -> Result<f64> {
        self.bytes(at).map(f64::from_le_bytes)
    }

    pub fn bool(&self, at: usize, bit: u8) -> Result<bool> {
        Ok(self.u8(at)? & (1 << bit) != 0)
    }

    /// Resolve the relative pointer at `at`. Null yields `None`.
    fn pointer(&self, at: usize) -> Result<Option<usize>> {
        let offset = self.u64(at)?;
        if offset == 0 {
            return Ok(None);
        }
        let target = usize::try_from(offset)
            .ok()
            .and_then(|offset| at.checked_add(offset))
            .ok_or(ValidationError::IllegalPointer(at))?;
        if !is_aligned(target) {
            return Err(ValidationError::MisalignedObject(target));
        }
        Ok(Some(target))
    }

    fn null(field: Field) -> Result<()> {
        if field.nullable {
            Ok(())
        } else {
            Err(ValidationError::UnexpectedNull(field.name))
        }
    }

    /// Decode the struct block at `offset`.
    pub fn decode_struct<S: Struct>(&mut self, offset: usize) -> Result<S> {
        let num_bytes = self.u32(offset)?;
        let expected = STRUCT_HEADER_SIZE + S::DATA_SIZE;
        if (num_bytes as usize) < expected {
            return Err(ValidationError::UnexpectedStructHeader {
                num_bytes,
                expected,
            });
        }
        self.claim(offset, num_bytes as usize)?;
        S::decode_fields(self, offset + STRUCT_HEADER_SIZE)
    }

    /// Follow the struct pointer at `at`.
    pub fn decode_struct_pointer<S: Struct>(
        &mut self,
        at: usize,
        field: Field,
    ) -> Result<Option<S>> {
        match self.pointer(at)? {
            Some(target) => self.decode_struct(target).map(Some),
            None => Self::null(field).map(|()| None),
        }
    }

    /// Follow the array pointer at `at`.
    pub fn decode_array<T: ArrayElement>(
        &mut self,
        at: usize,
        field: Field,
    ) -> Result<Option<Vec<T>>> {
        let Some(target) = self.pointer(at)? else {
            return Self::null(field).map(|()| None);
        };

        let num_bytes = self.u32(target)?;
        let num_elements = self.u32(target + 4)?;
        let payload = T::encoded_len(num_elements as usize);
        if (num_bytes as usize) < ARRAY_HEADER_SIZE + payload {
            return Err(ValidationError::UnexpectedArrayHeader {
                num_bytes,
                num_elements,
            });
        }
        if let Some(expected) = field.fixed_len {
            if num_elements as usize != expected {
                return Err(ValidationError::FixedArrayLength {
                    field: field.name,
                    expected,
                    actual: num_elements as usize,
                });
            }
        }
        self.claim(target, num_bytes as usize)?;

        let start = target + ARRAY_HEADER_SIZE;
        let elements = T::decode_all(&self.data[start..start + payload], num_elements as usize);
        Ok(Some(elements))
    }

    /// Follow the string pointer at `at`.
    pub fn decode_string(&mut self, at: usize, field: Field) -> Result<Option<String>> {
        match self.decode_array::<u8>(at, field)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| ValidationError::InvalidUtf8(field.name)),
            None => Ok(None),
        }
    }

    /// Decode the inline union at `at`.
    pub fn decode_union<U: Union>(&mut self, at: usize, field: Field) -> Result<Option<U>> {
        match self.u32(at)? {
            0 => Self::null(field).map(|()| None),
            size if size as usize == UNION_SIZE => {
                let tag = self.u32(at + 4)?;
                U::decode_value(self, tag, at + 8).map(Some)
            }
            size => Err(ValidationError::InvalidUnionSize(size)),
        }
    }

    /// Take the handle referenced at `at` out of the message.
    pub fn decode_handle(&mut self, at: usize, field: Field) -> Result<UntypedHandle> {
        let index = self.u32(at)?;
        if index == INVALID_HANDLE_INDEX {
            return Self::null(field)
                .map_err(|_| ValidationError::UnexpectedInvalidHandle(field.name))
                .map(|()| UntypedHandle::Invalid);
        }

        let slot = index as usize;
        if slot < self.next_handle || slot >= self.handles.len() {
            return Err(ValidationError::IllegalHandle(index));
        }
        self.next_handle = slot + 1;
        Ok(self.handles[slot].take())
    }
}
