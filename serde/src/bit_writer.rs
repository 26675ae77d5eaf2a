fn low_mask_64(count: u32) -> u64 {
    if count == 0 {
        0
    } else {
        u64::MAX >> (64 - count)
    }
}

/// Writes bit strings of any length, MSB-first, into a growable byte
/// buffer.
///
/// Bits accumulate in a scratch byte that is pushed to the buffer when
/// full. `finish` pads the final partial byte with zero bits and returns
/// the buffer.
pub struct BitWriter {
    buffer: Vec<u8>,
    scratch: u8,
    // Bits still free in the scratch byte, 8 when it is empty.
    free: u32,
    bits_written: u64,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            scratch: 0,
            free: 8,
            bits_written: 0,
        }
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(bytes),
            scratch: 0,
            free: 8,
            bits_written: 0,
        }
    }

    /// Total bits written so far, including any not yet flushed.
    pub fn bits_written(&self) -> u64 {
        self.bits_written
    }

    /// Writes the low `count` bits of `value`, most significant first.
    ///
    /// # Panics
    ///
    /// Panics if `count` is 0 or greater than 32.
    pub fn write_bits(&mut self, value: u32, count: u32) {
        assert!(count != 0, "cannot write 0 bits");
        assert!(count <= 32, "bit count overflow: {count}");
        self.write_long_bits(u64::from(value), count);
    }

    /// Writes the low `count` bits of `value`, most significant first.
    ///
    /// # Panics
    ///
    /// Panics if `count` is 0 or greater than 64.
    pub fn write_long_bits(&mut self, value: u64, count: u32) {
        assert!(count != 0, "cannot write 0 bits");
        assert!(count <= 64, "bit count overflow: {count}");

        // Clear any stray high bits so the shifts below graft cleanly.
        let mut value = value & low_mask_64(count);

        let mut remaining = count;
        while remaining > 0 {
            let bits_to_copy = self.free.min(remaining);

            let source_shift = remaining - bits_to_copy;
            let target_shift = self.free - bits_to_copy;

            self.scratch |= ((value >> source_shift) as u8) << target_shift;

            remaining -= bits_to_copy;
            self.free -= bits_to_copy;

            value &= low_mask_64(remaining);

            if self.free == 0 {
                self.flush_scratch();
            }
        }

        self.bits_written += u64::from(count);
    }

    fn flush_scratch(&mut self) {
        self.buffer.push(self.scratch);
        self.scratch = 0;
        self.free = 8;
    }

    /// Pads the final partial byte with zero bits and returns the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        if self.free < 8 {
            self.flush_scratch();
        }
        self.buffer
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}
