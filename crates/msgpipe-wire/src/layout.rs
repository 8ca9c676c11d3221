//! Size and alignment rules shared by the encoder and decoder.

/// Every block (header, struct, array, union payload) starts on this boundary.
pub const ALIGNMENT: usize = 8;

/// `[num_bytes u32][version u32]` in front of every struct.
pub const STRUCT_HEADER_SIZE: usize = 8;

/// `[num_bytes u32][num_elements u32]` in front of every array.
pub const ARRAY_HEADER_SIZE: usize = 8;

/// Pointers are relative u64 offsets; 0 encodes null.
pub const POINTER_SIZE: usize = 8;

/// Inline union: `[size u32][tag u32][value u64]`.
pub const UNION_SIZE: usize = 16;

/// Handle slot value meaning "no handle".
pub const INVALID_HANDLE_INDEX: u32 = u32::MAX;

/// Round `n` up to the next multiple of 8.
pub const fn align(n: usize) -> usize {
    n + ((ALIGNMENT - n % ALIGNMENT) % ALIGNMENT)
}

pub const fn is_aligned(n: usize) -> bool {
    n % ALIGNMENT == 0
}

/// Encoded length of a string: its number of UTF-8 code units.
pub fn utf8_length(s: &str) -> usize {
    s.chars().map(char::len_utf8).sum()
}
