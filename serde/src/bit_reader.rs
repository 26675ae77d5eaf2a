use crate::SerdeError;

/// Reads bit strings of any length, MSB-first, from a borrowed byte
/// buffer. Mirrors [`BitWriter`](crate::BitWriter); partially-consumed
/// buffer bits are tracked across calls.
pub struct BitReader<'a> {
    buffer: &'a [u8],
    index: usize,
    // Unconsumed low bits of the current byte.
    scratch: u8,
    available: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            index: 0,
            scratch: 0,
            available: 0,
        }
    }

    /// Reads `count` bits as the low bits of the result.
    ///
    /// # Panics
    ///
    /// Panics if `count` is 0 or greater than 32.
    pub fn read_bits(&mut self, count: u32) -> Result<u32, SerdeError> {
        assert!(count != 0, "cannot read 0 bits");
        assert!(count <= 32, "bit count overflow: {count}");
        self.read_long_bits(count).map(|v| v as u32)
    }

    /// Reads `count` bits as the low bits of the result.
    ///
    /// # Panics
    ///
    /// Panics if `count` is 0 or greater than 64.
    pub fn read_long_bits(&mut self, count: u32) -> Result<u64, SerdeError> {
        assert!(count != 0, "cannot read 0 bits");
        assert!(count <= 64, "bit count overflow: {count}");

        let mut result: u64 = 0;

        let mut remaining = count;
        while remaining > 0 {
            if self.available == 0 {
                let Some(&byte) = self.buffer.get(self.index) else {
                    return Err(SerdeError::EndOfStream {
                        requested: remaining,
                    });
                };
                self.index += 1;
                self.scratch = byte;
                self.available = 8;
            }

            let bits_to_copy = self.available.min(remaining);

            // Shift down to just the high bits we want, then up to where
            // they graft onto the result.
            let source_shift = self.available - bits_to_copy;
            let target_shift = remaining - bits_to_copy;

            result |= u64::from(self.scratch >> source_shift) << target_shift;

            remaining -= bits_to_copy;
            self.available -= bits_to_copy;

            // Mask off the bits just consumed, keeping what is left.
            if self.available == 0 {
                self.scratch = 0;
            } else {
                self.scratch &= 0xff >> (8 - self.available);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::BitReader;
    use crate::{BitWriter, SerdeError};

    #[test]
    fn reads_mirror_writes() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b1, 1);
        writer.write_bits(0x12, 8);
        writer.write_long_bits(0x0123_4567_89ab_cdef, 64);
        writer.write_long_bits(u64::MAX, 64);
        writer.write_bits(0x7, 3);
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(1).unwrap(), 0b1);
        assert_eq!(reader.read_bits(8).unwrap(), 0x12);
        assert_eq!(reader.read_long_bits(64).unwrap(), 0x0123_4567_89ab_cdef);
        assert_eq!(reader.read_long_bits(64).unwrap(), u64::MAX);
        assert_eq!(reader.read_bits(3).unwrap(), 0x7);
    }

    #[test]
    fn round_trip_every_width() {
        for width in 1..=64u32 {
            let value = 0xdead_beef_cafe_f00d & (u64::MAX >> (64 - width));

            let mut writer = BitWriter::new();
            writer.write_long_bits(value, width);
            // Trailing marker so padding cannot mask an off-by-one.
            writer.write_bits(1, 1);
            let bytes = writer.finish();

            let mut reader = BitReader::new(&bytes);
            assert_eq!(reader.read_long_bits(width).unwrap(), value, "width {width}");
            assert_eq!(reader.read_bits(1).unwrap(), 1, "width {width}");
        }
    }

    #[test]
    fn misaligned_stream_round_trips() {
        let bytes = [0x12u8, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xff];
        for width in 1..=32u32 {
            let total_bits = bytes.len() as u32 * 8;

            let mut reader = BitReader::new(&bytes);
            let mut writer = BitWriter::new();
            let mut read = 0;
            while read + width <= total_bits {
                writer.write_bits(reader.read_bits(width).unwrap(), width);
                read += width;
            }

            let copied = writer.finish();
            assert_eq!(copied[..(read / 8) as usize], bytes[..(read / 8) as usize]);
        }
    }

    #[test]
    fn end_of_stream_is_an_error() {
        let bytes = [0xffu8];
        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(4).unwrap(), 0xf);
        assert_eq!(
            reader.read_bits(8),
            Err(SerdeError::EndOfStream { requested: 4 })
        );
    }

    #[test]
    #[should_panic(expected = "cannot read 0 bits")]
    fn zero_width_read_panics() {
        let mut reader = BitReader::new(&[0u8]);
        let _ = reader.read_bits(0);
    }
}
