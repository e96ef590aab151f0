//! Chimp floating point compression.
//!
//! A segment holds groups of up to 1024 values. The first value of each
//! group is stored verbatim; the rest are XOR-delta encoded against a
//! ring of recently emitted bit patterns. Three packed streams make up a
//! segment: the payload bit stream growing upward from the header, and
//! per-group flag (2-bit) and leading-zero-class (3-bit) arrays stored in
//! a metadata tail growing downward from the segment end.
//!
//! Segment layout:
//!
//! ```text
//! |---------------------------------------------|  <- segment base
//! | metadata_offset (u32)                       |
//! |---------------------------------------------|
//! | payload bit stream (grows upward)           |
//! |                                             |
//! |                 (unused gap)                |
//! |                                             |
//! | metadata tail (grows downward), per group   |
//! | in reverse order:                           |
//! |   flags                 (flags_byte_size B) |
//! |   flags_byte_size       (u16)               |
//! |   leading zero blocks   (3 * count B)       |
//! |   leading_zero_block_count (u8)             |
//! |   payload_bit_offset    (u32)               |
//! |---------------------------------------------|  <- base + metadata_offset
//! ```
//!
//! The decoder walks the tail by decrementing a cursor from
//! `base + metadata_offset`, which yields the groups in forward order.

pub mod bitstream;
pub mod compress;
pub mod decompress;
pub mod flag_buffer;
pub mod group;
pub mod leading_zero_buffer;
pub mod scan;

pub use compress::chimp_compress;
pub use decompress::Chimp128DecompressionState;
pub use group::ChimpGroupState;
pub use scan::ChimpScanState;

use bytemuck::Pod;
use std::mem;

/// Number of values decoded as one group.
pub const CHIMP_SEQUENCE_SIZE: usize = 1024;

/// A segment starts with a u32 byte offset to its metadata tail.
pub const HEADER_SIZE: usize = mem::size_of::<u32>();

/// Ring length of the widest supported value type. Narrower types use a
/// prefix of the ring and mask with their own window size.
pub(crate) const MAX_WINDOW_SIZE: usize = 128;

/// Maps a 3-bit leading zero class to a leading zero bit count.
/// Encoder and decoder must agree on this table.
pub const LEADING_ZERO_TABLE: [u8; 8] = [0, 8, 12, 16, 18, 20, 22, 24];

/// Largest class whose leading zero count does not exceed the given count.
#[inline]
pub(crate) fn leading_zero_class(leading_zeros: u32) -> u8 {
    let mut class = 0;
    for (i, &lz) in LEADING_ZERO_TABLE.iter().enumerate() {
        if lz as u32 <= leading_zeros {
            class = i as u8;
        }
    }
    class
}

/// 2-bit per-value code selecting the decode strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChimpFlag {
    /// Value equals the previous value. No payload.
    RepeatPrevious = 0,
    /// Value reconstructed from a ring slot: {ref index, leading zero
    /// class, significant bit count, payload} read inline.
    WindowReference = 1,
    /// XOR against the previous value reusing the in-effect leading zero
    /// count.
    ReuseLeading = 2,
    /// XOR against the previous value with a fresh leading zero class
    /// consumed from the packed class stream.
    LoadLeading = 3,
}

impl ChimpFlag {
    #[inline]
    pub fn from_code(code: u8) -> Self {
        match code & 3 {
            0 => ChimpFlag::RepeatPrevious,
            1 => ChimpFlag::WindowReference,
            2 => ChimpFlag::ReuseLeading,
            _ => ChimpFlag::LoadLeading,
        }
    }
}

/// Physical unsigned type the codec operates on.
///
/// The ring reference index occupies `REF_INDEX_BITS = log2(WINDOW_SIZE)`
/// bits and the significant-bit-count field of a window record occupies
/// `SIGNIFICANT_BITS` bits.
pub trait ChimpPhysical: Copy + Eq + Default + Pod {
    const BITS: u32;
    const WINDOW_SIZE: usize;
    const REF_INDEX_BITS: u32;
    const SIGNIFICANT_BITS: u32;

    fn from_stream(raw: u64) -> Self;

    fn to_stream(self) -> u64;

    fn leading_zeros(self) -> u32;
}

impl ChimpPhysical for u64 {
    const BITS: u32 = 64;
    const WINDOW_SIZE: usize = 128;
    const REF_INDEX_BITS: u32 = 7;
    const SIGNIFICANT_BITS: u32 = 6;

    #[inline]
    fn from_stream(raw: u64) -> Self {
        raw
    }

    #[inline]
    fn to_stream(self) -> u64 {
        self
    }

    #[inline]
    fn leading_zeros(self) -> u32 {
        u64::leading_zeros(self)
    }
}

impl ChimpPhysical for u32 {
    const BITS: u32 = 32;
    const WINDOW_SIZE: usize = 32;
    const REF_INDEX_BITS: u32 = 5;
    const SIGNIFICANT_BITS: u32 = 5;

    #[inline]
    fn from_stream(raw: u64) -> Self {
        raw as u32
    }

    #[inline]
    fn to_stream(self) -> u64 {
        self as u64
    }

    #[inline]
    fn leading_zeros(self) -> u32 {
        u32::leading_zeros(self)
    }
}

/// Logical float type stored in a segment, tied to the physical unsigned
/// type carrying its bit pattern. Scans preserve bit patterns exactly,
/// including NaN payloads and the sign of zero.
pub trait ChimpValue: Pod {
    type Physical: ChimpPhysical;
}

impl ChimpValue for f64 {
    type Physical = u64;
}

impl ChimpValue for f32 {
    type Physical = u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_zero_class() {
        assert_eq!(leading_zero_class(0), 0);
        assert_eq!(leading_zero_class(7), 0);
        assert_eq!(leading_zero_class(8), 1);
        assert_eq!(leading_zero_class(11), 1);
        assert_eq!(leading_zero_class(12), 2);
        assert_eq!(leading_zero_class(17), 3);
        assert_eq!(leading_zero_class(18), 4);
        assert_eq!(leading_zero_class(20), 5);
        assert_eq!(leading_zero_class(23), 6);
        assert_eq!(leading_zero_class(24), 7);
        assert_eq!(leading_zero_class(64), 7);
        // every class maps back to a table entry not exceeding the input.
        for lz in 0..=64u32 {
            let class = leading_zero_class(lz) as usize;
            assert!(LEADING_ZERO_TABLE[class] as u32 <= lz);
        }
    }

    #[test]
    fn test_flag_from_code() {
        assert_eq!(ChimpFlag::from_code(0), ChimpFlag::RepeatPrevious);
        assert_eq!(ChimpFlag::from_code(1), ChimpFlag::WindowReference);
        assert_eq!(ChimpFlag::from_code(2), ChimpFlag::ReuseLeading);
        assert_eq!(ChimpFlag::from_code(3), ChimpFlag::LoadLeading);
    }
}
