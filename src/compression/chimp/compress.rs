use crate::buffer::PAGE_SIZE;
use crate::compression::chimp::bitstream::BitWriter;
use crate::compression::chimp::flag_buffer::FlagWriter;
use crate::compression::chimp::leading_zero_buffer::LeadingZeroWriter;
use crate::compression::chimp::{
    CHIMP_SEQUENCE_SIZE, ChimpFlag, ChimpPhysical, ChimpValue, HEADER_SIZE, LEADING_ZERO_TABLE,
    MAX_WINDOW_SIZE, leading_zero_class,
};
use crate::error::{Error, Result};
use std::mem;

/// Per-value encode state. Mirrors the decoder's state transitions
/// exactly: ring content, previous value and the in-effect leading zero
/// count evolve identically on both sides.
pub struct Chimp128CompressionState<T: ChimpPhysical> {
    previous_value: T,
    reference_window: [T; MAX_WINDOW_SIZE],
    window_index: usize,
    /// None until a window record or a fresh class establishes a count,
    /// so the first XOR of a group always stores its class.
    leading_zeros_current: Option<u32>,
}

impl<T: ChimpPhysical> Chimp128CompressionState<T> {
    #[inline]
    pub fn new() -> Self {
        Chimp128CompressionState {
            previous_value: T::default(),
            reference_window: [T::default(); MAX_WINDOW_SIZE],
            window_index: 0,
            leading_zeros_current: None,
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.previous_value = T::default();
        self.reference_window = [T::default(); MAX_WINDOW_SIZE];
        self.window_index = 0;
        self.leading_zeros_current = None;
    }

    #[inline]
    fn record(&mut self, value: T) {
        self.reference_window[self.window_index & (T::WINDOW_SIZE - 1)] = value;
        self.window_index += 1;
        self.previous_value = value;
    }

    #[inline]
    fn find_identical(&self, value: T) -> Option<usize> {
        let filled = self.window_index.min(T::WINDOW_SIZE);
        self.reference_window[..filled].iter().position(|&w| w == value)
    }

    /// Writes the verbatim first value of a group.
    #[inline]
    pub fn write_first(&mut self, value: T, payload: &mut BitWriter) {
        payload.write(value.to_stream(), T::BITS);
        self.record(value);
    }

    /// Encodes one value after the first of a group.
    #[inline]
    pub fn compress_value(
        &mut self,
        value: T,
        payload: &mut BitWriter,
        flags: &mut FlagWriter,
        leading_zeros: &mut LeadingZeroWriter,
    ) {
        if value == self.previous_value {
            flags.append(ChimpFlag::RepeatPrevious as u8);
        } else if let Some(ref_index) = self.find_identical(value) {
            // exact window match: store only the slot, class 0 with an
            // empty payload.
            flags.append(ChimpFlag::WindowReference as u8);
            payload.write(ref_index as u64, T::REF_INDEX_BITS);
            payload.write(0, 3);
            payload.write(0, T::SIGNIFICANT_BITS);
            self.leading_zeros_current = Some(0);
        } else {
            let xor = T::from_stream(value.to_stream() ^ self.previous_value.to_stream());
            let class = leading_zero_class(xor.leading_zeros());
            let leading = LEADING_ZERO_TABLE[class as usize] as u32;
            if self.leading_zeros_current == Some(leading) {
                flags.append(ChimpFlag::ReuseLeading as u8);
            } else {
                flags.append(ChimpFlag::LoadLeading as u8);
                leading_zeros.append(class);
                self.leading_zeros_current = Some(leading);
            }
            payload.write(xor.to_stream(), T::BITS - leading);
        }
        self.record(value);
    }
}

impl<T: ChimpPhysical> Default for Chimp128CompressionState<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

struct GroupMeta {
    payload_bit_offset: u32,
    flags: Vec<u8>,
    flags_byte_size: u16,
    leading_zero_blocks: Vec<u8>,
    leading_zero_block_count: u8,
}

/// Compresses a float column chunk into a complete segment image:
/// header, payload bit stream and metadata tail. The image length equals
/// the stored metadata offset, so the tail ends at the segment end.
pub fn chimp_compress<F: ChimpValue>(values: &[F]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Err(Error::InvalidArgument);
    }
    let physical: &[F::Physical] = bytemuck::cast_slice(values);

    let mut payload = BitWriter::new();
    let mut groups = Vec::new();
    let mut state = Chimp128CompressionState::<F::Physical>::new();
    for chunk in physical.chunks(CHIMP_SEQUENCE_SIZE) {
        let payload_bit_offset = payload.bit_len() as u32;
        state.reset();
        let mut flags = FlagWriter::new();
        let mut leading_zeros = LeadingZeroWriter::new();
        state.write_first(chunk[0], &mut payload);
        for &value in &chunk[1..] {
            state.compress_value(value, &mut payload, &mut flags, &mut leading_zeros);
        }
        let flags_byte_size = flags.byte_len() as u16;
        let leading_zero_block_count = leading_zeros.block_count() as u8;
        groups.push(GroupMeta {
            payload_bit_offset,
            flags: flags.finish(),
            flags_byte_size,
            leading_zero_blocks: leading_zeros.finish(),
            leading_zero_block_count,
        });
    }

    let payload_bytes = payload.finish();
    let tail_len: usize = groups
        .iter()
        .map(|g| {
            g.flags_byte_size as usize
                + mem::size_of::<u16>()
                + g.leading_zero_blocks.len()
                + mem::size_of::<u8>()
                + mem::size_of::<u32>()
        })
        .sum();
    let total = HEADER_SIZE + payload_bytes.len() + tail_len;
    if total > PAGE_SIZE {
        return Err(Error::SegmentTooLarge);
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&payload_bytes);
    // the decoder walks the tail downward from the segment end, so the
    // first group's descriptor is written last.
    for g in groups.iter().rev() {
        out.extend_from_slice(&g.flags);
        out.extend_from_slice(&g.flags_byte_size.to_le_bytes());
        out.extend_from_slice(&g.leading_zero_blocks);
        out.push(g.leading_zero_block_count);
        out.extend_from_slice(&g.payload_bit_offset.to_le_bytes());
    }
    debug_assert_eq!(out.len(), total);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::chimp::bitstream::BitReader;

    #[test]
    fn test_compress_rejects_empty_input() {
        assert!(matches!(
            chimp_compress::<f64>(&[]),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn test_compress_single_value_layout() {
        let image = chimp_compress(&[1.0f64]).unwrap();
        // header + 8 payload bytes + empty-group descriptor.
        assert_eq!(image.len(), 19);
        assert_eq!(u32::from_le_bytes(image[..4].try_into().unwrap()), 19);
        // verbatim first value, most-significant-first.
        assert_eq!(
            &image[4..12],
            &[0x3F, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        // no flags, no leading zero blocks, payload starts at bit 0.
        assert!(image[12..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_compress_all_equal_flags() {
        let image = chimp_compress(&[1.0f64; 4]).unwrap();
        // three repeat-previous flags pack into one zero byte; payload is
        // only the first 64 bits.
        assert_eq!(image.len(), HEADER_SIZE + 8 + 1 + 2 + 1 + 4);
        assert_eq!(image[12], 0);
        assert_eq!(u16::from_le_bytes(image[13..15].try_into().unwrap()), 1);
        assert_eq!(image[15], 0);
    }

    #[test]
    fn test_compress_exponent_change_stores_class() {
        let image = chimp_compress(&[1.0f64, 2.0]).unwrap();
        // payload: 64 verbatim bits then a full 64-bit XOR (class 0).
        let mut r = BitReader::new(&image[HEADER_SIZE..]);
        assert_eq!(r.read(64), 1.0f64.to_bits());
        assert_eq!(r.read(64), 1.0f64.to_bits() ^ 2.0f64.to_bits());
        // tail: one flag byte holding a single fresh-class flag.
        let flags_byte = image[HEADER_SIZE + 16];
        assert_eq!(flags_byte & 3, ChimpFlag::LoadLeading as u8);
        // one leading zero block present.
        let block_count = image[image.len() - 5];
        assert_eq!(block_count, 1);
    }

    #[test]
    fn test_compress_state_mirrors_decoder() {
        use crate::compression::chimp::decompress::Chimp128DecompressionState;

        let series = [
            1.0f64, 1.0, 2.0, 3.0, 3.5, 3.5, 1.0, -0.0, 0.0, 2.0, 1e300, -1e-300,
        ];
        let physical: Vec<u64> = series.iter().map(|v| v.to_bits()).collect();

        let mut payload = BitWriter::new();
        let mut flags = FlagWriter::new();
        let mut leading_zeros = LeadingZeroWriter::new();
        let mut enc = Chimp128CompressionState::<u64>::new();
        enc.write_first(physical[0], &mut payload);
        for &v in &physical[1..] {
            enc.compress_value(v, &mut payload, &mut flags, &mut leading_zeros);
        }
        let flag_bytes = flags.finish();
        let lz_bytes = leading_zeros.finish();
        let payload_bytes = payload.finish();

        let mut dec = Chimp128DecompressionState::<u64>::new();
        let mut input = BitReader::new(&payload_bytes);
        let mut flag_buf = crate::compression::chimp::flag_buffer::FlagBuffer::new(&flag_bytes);
        let mut lz_buf =
            crate::compression::chimp::leading_zero_buffer::LeadingZeroBuffer::new(&lz_bytes);
        let classes: Vec<u8> = (0..lz_bytes.len() / 3 * 8).map(|_| lz_buf.extract()).collect();
        let mut lz_idx = 0;
        let mut out = vec![dec.load_first(&mut input)];
        for _ in 1..physical.len() {
            let flag = flag_buf.extract();
            let class = classes.get(lz_idx).copied().unwrap_or(0);
            let (value, refresh) = dec.decompress_value(&mut input, flag, class);
            if refresh {
                lz_idx += 1;
            }
            out.push(value);
        }
        assert_eq!(out, physical);
    }
}
