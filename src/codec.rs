//! Raw binary encoding of persisted values.
//!
//! A persisted scalar occupies exactly [`BlobValue::SIZE`] bytes: its
//! in-memory representation, the same layout a C `memcpy` of the value
//! would produce. Sequences store the concatenation of their elements.
//!
//! Any type with a fixed byte layout is a blob value, including plain
//! structs deriving the `zerocopy` traits:
//!
//! ```rust
//! use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
//!
//! #[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
//! #[repr(C)]
//! struct Calibration {
//!     offset: i32,
//!     gain: u32,
//! }
//! ```
//!
//! Types with invalid bit patterns, such as `bool`, are validated on load.

use zerocopy::{Immutable, IntoBytes, TryFromBytes};

/// A fixed-size value that can be written to and read back from a blob.
pub trait BlobValue: TryFromBytes + IntoBytes + Immutable + Sized {
    /// Encoded size in bytes.
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Encoding as an owned buffer.
    fn to_blob(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Decode from exactly `SIZE` bytes; `None` if the length is wrong or
    /// the bytes are not a valid value.
    fn decode(bytes: &[u8]) -> Option<Self> {
        Self::try_read_from_bytes(bytes).ok()
    }
}

impl<T: TryFromBytes + IntoBytes + Immutable> BlobValue for T {}

/// Encode a sequence as the concatenation of its elements.
pub fn encode_elements<T: BlobValue>(items: &[T]) -> Vec<u8> {
    items.as_bytes().to_vec()
}

/// Number of whole elements in a blob of `len` bytes.
pub fn whole_elements<T: BlobValue>(len: usize) -> usize {
    match T::SIZE {
        0 => 0,
        size => len / size,
    }
}

/// Decode a concatenation of elements.
///
/// `None` if the length is not a whole number of elements or any element
/// fails to decode. Elements are read one by one, so the blob need not be
/// aligned for `T`.
pub fn decode_elements<T: BlobValue>(bytes: &[u8]) -> Option<Vec<T>> {
    if T::SIZE == 0 || bytes.len() % T::SIZE != 0 {
        return None;
    }
    bytes.chunks_exact(T::SIZE).map(T::decode).collect()
}

/// The all-zero value of `T`, if zero bytes are a valid `T`.
pub fn zeroed<T: BlobValue>() -> Option<T> {
    T::decode(&vec![0u8; T::SIZE])
}
