use crate::compression::chimp::bitstream::BitReader;
use crate::compression::chimp::{ChimpFlag, ChimpPhysical, LEADING_ZERO_TABLE, MAX_WINDOW_SIZE};

/// Per-value decode state of the Chimp codec: the previous bit pattern,
/// a ring of recently emitted patterns addressable by a window reference
/// record, and the in-effect leading/trailing zero counts.
///
/// Reset at every group boundary; the first value after a reset is read
/// verbatim via [`load_first`](Self::load_first).
pub struct Chimp128DecompressionState<T: ChimpPhysical> {
    previous_value: T,
    reference_window: [T; MAX_WINDOW_SIZE],
    window_index: usize,
    leading_zeros_current: u32,
    trailing_zeros_current: u32,
}

impl<T: ChimpPhysical> Chimp128DecompressionState<T> {
    #[inline]
    pub fn new() -> Self {
        Chimp128DecompressionState {
            previous_value: T::default(),
            reference_window: [T::default(); MAX_WINDOW_SIZE],
            window_index: 0,
            leading_zeros_current: 0,
            trailing_zeros_current: 0,
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.previous_value = T::default();
        self.reference_window = [T::default(); MAX_WINDOW_SIZE];
        self.window_index = 0;
        self.leading_zeros_current = 0;
        self.trailing_zeros_current = 0;
    }

    #[inline]
    fn record(&mut self, value: T) {
        self.reference_window[self.window_index & (T::WINDOW_SIZE - 1)] = value;
        self.window_index += 1;
        self.previous_value = value;
    }

    /// Leading zero bit count currently in effect.
    #[inline]
    pub fn leading_zeros(&self) -> u32 {
        self.leading_zeros_current
    }

    /// Trailing zero bit count of the last window record.
    #[inline]
    pub fn trailing_zeros(&self) -> u32 {
        self.trailing_zeros_current
    }

    /// Consumes the verbatim first value of a group.
    #[inline]
    pub fn load_first(&mut self, input: &mut BitReader<'_>) -> T {
        let value = T::from_stream(input.read(T::BITS));
        self.record(value);
        value
    }

    /// Decodes one value. Returns the value and whether the caller must
    /// advance the group's leading zero cursor (the class was consumed).
    #[inline]
    pub fn decompress_value(
        &mut self,
        input: &mut BitReader<'_>,
        flag: u8,
        leading_zero_class: u8,
    ) -> (T, bool) {
        let mut refresh_leading = false;
        let value = match ChimpFlag::from_code(flag) {
            ChimpFlag::RepeatPrevious => self.previous_value,
            ChimpFlag::WindowReference => {
                let ref_index = input.read(T::REF_INDEX_BITS) as usize;
                let lz_class = input.read(3) as usize;
                let significant = input.read(T::SIGNIFICANT_BITS) as u32;
                let leading = LEADING_ZERO_TABLE[lz_class] as u32;
                debug_assert!(ref_index < T::WINDOW_SIZE);
                let reference = self.reference_window[ref_index & (T::WINDOW_SIZE - 1)];
                self.leading_zeros_current = leading;
                if significant == 0 {
                    // exact match with a windowed value, no payload follows.
                    self.trailing_zeros_current = T::BITS - leading;
                    reference
                } else {
                    let trailing = T::BITS - leading - significant;
                    self.trailing_zeros_current = trailing;
                    let payload = input.read(significant);
                    T::from_stream(reference.to_stream() ^ (payload << trailing))
                }
            }
            ChimpFlag::ReuseLeading => {
                let payload = input.read(T::BITS - self.leading_zeros_current);
                T::from_stream(self.previous_value.to_stream() ^ payload)
            }
            ChimpFlag::LoadLeading => {
                let leading = LEADING_ZERO_TABLE[(leading_zero_class & 7) as usize] as u32;
                self.leading_zeros_current = leading;
                refresh_leading = true;
                let payload = input.read(T::BITS - leading);
                T::from_stream(self.previous_value.to_stream() ^ payload)
            }
        };
        self.record(value);
        (value, refresh_leading)
    }
}

impl<T: ChimpPhysical> Default for Chimp128DecompressionState<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
