use crate::buffer::{PageHandle, ReadonlyPageCache};
use crate::compression::chimp::bitstream::BitReader;
use crate::compression::chimp::decompress::Chimp128DecompressionState;
use crate::compression::chimp::group::ChimpGroupState;
use crate::compression::chimp::{CHIMP_SEQUENCE_SIZE, ChimpValue, HEADER_SIZE};
use crate::error::{Error, Result};
use crate::segment::ColumnSegment;
use std::mem;

/// Per-query decoder handle over one segment: a page pin, a payload bit
/// cursor, a metadata cursor, the expanded group state and the
/// decompression state machine.
///
/// Single-owner; every concurrent query constructs its own scan state.
/// Emitted values are strictly in segment order.
pub struct ChimpScanState<F: ChimpValue> {
    handle: PageHandle,
    segment: ColumnSegment,
    /// Byte length of the segment; the metadata tail ends here.
    metadata_offset: usize,
    /// Byte cursor into the segment, decremented per group descriptor.
    metadata_idx: usize,
    /// Bit cursor into the payload region following the header.
    payload_bit_idx: usize,
    total_value_count: usize,
    group_state: ChimpGroupState,
    chimp_state: Chimp128DecompressionState<F::Physical>,
}

impl<F: ChimpValue> ChimpScanState<F> {
    /// Pins the segment's page, locates the metadata tail and loads the
    /// first group. Pinning is the only fallible step of a scan.
    pub fn new(cache: &ReadonlyPageCache, segment: &ColumnSegment) -> Result<Self> {
        let handle = cache.pin(segment.block_id)?;
        let page = handle.bytes();
        if segment.block_offset + HEADER_SIZE > page.len() {
            return Err(Error::InvalidFormat);
        }
        let base = &page[segment.block_offset..];
        let metadata_offset = u32::from_le_bytes(base[..HEADER_SIZE].try_into()?) as usize;
        if metadata_offset < HEADER_SIZE || segment.block_offset + metadata_offset > page.len() {
            return Err(Error::InvalidFormat);
        }
        let mut res = ChimpScanState {
            handle,
            segment: *segment,
            metadata_offset,
            metadata_idx: metadata_offset,
            payload_bit_idx: 0,
            total_value_count: 0,
            group_state: ChimpGroupState::new(),
            chimp_state: Chimp128DecompressionState::new(),
        };
        res.load_group();
        Ok(res)
    }

    /// Number of values emitted so far.
    #[inline]
    pub fn total_value_count(&self) -> usize {
        self.total_value_count
    }

    /// Whether the current group has been partially consumed.
    #[inline]
    pub fn group_started(&self) -> bool {
        self.group_state.started()
    }

    /// Decodes the next `out.len()` values. The caller guarantees the
    /// request does not exceed the values left in the segment.
    pub fn scan(&mut self, out: &mut [F]) {
        debug_assert!(out.len() <= self.segment.count - self.total_value_count);
        let values: &mut [F::Physical] = bytemuck::cast_slice_mut(out);
        let mut idx = 0;
        while idx < values.len() {
            let n = (values.len() - idx).min(self.left_in_group());
            let chunk = &mut values[idx..idx + n];
            if self.group_state.started() {
                self.scan_partial_group(chunk);
            } else {
                self.scan_group(chunk);
            }
            idx += n;
        }
    }

    /// Decodes `n` values into `out[offset..]`.
    #[inline]
    pub fn scan_partial(&mut self, out: &mut [F], offset: usize, n: usize) {
        self.scan(&mut out[offset..offset + n]);
    }

    /// Advances the cursor by `n` values without materializing them.
    pub fn skip(&mut self, mut n: usize) {
        debug_assert!(n <= self.segment.count - self.total_value_count);
        let mut buf = [F::Physical::default(); CHIMP_SEQUENCE_SIZE];
        while n > 0 {
            let chunk = n.min(self.left_in_group());
            if self.group_state.started() {
                self.scan_partial_group(&mut buf[..chunk]);
            } else {
                self.scan_group(&mut buf[..chunk]);
            }
            n -= chunk;
        }
    }

    #[inline]
    fn left_in_group(&self) -> usize {
        CHIMP_SEQUENCE_SIZE - (self.total_value_count & (CHIMP_SEQUENCE_SIZE - 1))
    }

    #[inline]
    fn group_finished(&self) -> bool {
        self.total_value_count & (CHIMP_SEQUENCE_SIZE - 1) == 0
    }

    /// Bit reader over the payload region, bounded to the segment's own
    /// extent so a malformed stream panics at the segment boundary
    /// instead of reading neighboring bytes on the page.
    #[inline]
    fn payload_reader<'a>(&self, handle: &'a PageHandle) -> BitReader<'a> {
        let start = self.segment.block_offset + HEADER_SIZE;
        let end = self.segment.block_offset + self.metadata_offset;
        let mut reader = BitReader::new(&handle.bytes()[start..end]);
        reader.align_to(self.payload_bit_idx);
        reader
    }

    /// Scans a group from its start.
    fn scan_group(&mut self, values: &mut [<F as ChimpValue>::Physical]) {
        debug_assert!(values.len() <= CHIMP_SEQUENCE_SIZE);
        debug_assert!(!self.group_state.started());
        let handle = self.handle.clone();
        let mut input = self.payload_reader(&handle);
        // consume the synthesized flag of the verbatim first value.
        let _ = self.group_state.get_flag();
        values[0] = self.chimp_state.load_first(&mut input);
        for value in values[1..].iter_mut() {
            let flag = self.group_state.get_flag();
            let leading_zero = self.group_state.get_leading_zero();
            let (decoded, refresh_leading) =
                self.chimp_state.decompress_value(&mut input, flag, leading_zero);
            *value = decoded;
            if refresh_leading {
                // the leading zero value was used, move to the next one.
                self.group_state.increase_leading_zero_index();
            }
        }
        self.payload_bit_idx = input.bit_idx();
        self.finish_scan(values.len());
    }

    /// Scans up to a group boundary within an already started group.
    fn scan_partial_group(&mut self, values: &mut [<F as ChimpValue>::Physical]) {
        debug_assert!(values.len() <= CHIMP_SEQUENCE_SIZE);
        debug_assert!(self.group_state.started());
        let handle = self.handle.clone();
        let mut input = self.payload_reader(&handle);
        for value in values.iter_mut() {
            let flag = self.group_state.get_flag();
            let leading_zero = self.group_state.get_leading_zero();
            let (decoded, refresh_leading) =
                self.chimp_state.decompress_value(&mut input, flag, leading_zero);
            *value = decoded;
            if refresh_leading {
                self.group_state.increase_leading_zero_index();
            }
        }
        self.payload_bit_idx = input.bit_idx();
        self.finish_scan(values.len());
    }

    #[inline]
    fn finish_scan(&mut self, n: usize) {
        self.total_value_count += n;
        if self.group_finished() && self.total_value_count < self.segment.count {
            self.load_group();
        }
    }

    /// Consumes one group descriptor from the metadata tail and reloads
    /// the group state. The tail grows downward; the cursor decrements.
    fn load_group(&mut self) {
        self.chimp_state.reset();
        let handle = self.handle.clone();
        let data = &handle.bytes()[self.segment.block_offset..];

        // bit offset of the group payload, a point query hint only.
        self.metadata_idx -= mem::size_of::<u32>();
        let _payload_bit_offset = u32::from_le_bytes(
            data[self.metadata_idx..self.metadata_idx + mem::size_of::<u32>()]
                .try_into()
                .unwrap(),
        );

        self.metadata_idx -= mem::size_of::<u8>();
        let leading_zero_block_count = data[self.metadata_idx] as usize;

        self.metadata_idx -= 3 * leading_zero_block_count;
        let leading_zero_blocks =
            &data[self.metadata_idx..self.metadata_idx + 3 * leading_zero_block_count];

        self.metadata_idx -= mem::size_of::<u16>();
        let flags_byte_size = u16::from_le_bytes(
            data[self.metadata_idx..self.metadata_idx + mem::size_of::<u16>()]
                .try_into()
                .unwrap(),
        ) as usize;

        self.metadata_idx -= flags_byte_size;
        let flags = &data[self.metadata_idx..self.metadata_idx + flags_byte_size];

        self.group_state.load(
            flags,
            leading_zero_blocks,
            flags_byte_size * 4,
            leading_zero_block_count * 8,
        );
    }
}
