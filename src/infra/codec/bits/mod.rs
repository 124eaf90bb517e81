//! Positioned bit cursors over CAN payloads.
//!
//! Fields are little-endian and bit 0 is the least significant bit of byte 0,
//! so a field never needs byte alignment except for byte strings. The codec
//! seeks to each field's absolute offset instead of walking the layout.
use crate::error::{BitReaderError, BitWriterError};

/// Reader extracting bit segments from a borrowed buffer.
pub struct BitReader<'a> {
    buffer: &'a [u8],
    /// Absolute position in bits from the start of `buffer`.
    bit_cursor: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            bit_cursor: 0,
        }
    }

    /// Current cursor in bits.
    pub fn position(&self) -> usize {
        self.bit_cursor
    }

    /// Move the cursor to an absolute bit position. The end of the buffer is a
    /// valid position.
    pub fn seek(&mut self, bit: usize) -> Result<(), BitReaderError> {
        let buffer_len_bits = self.buffer.len() * 8;
        if bit > buffer_len_bits {
            return Err(BitReaderError::OutOfBounds {
                asked: bit,
                available: buffer_len_bits,
            });
        }
        self.bit_cursor = bit;
        Ok(())
    }

    /// Read `num_bits` (1..=64) bits at the cursor.
    pub fn read_u64(&mut self, num_bits: u8) -> Result<u64, BitReaderError> {
        if !(1..=64).contains(&num_bits) {
            return Err(BitReaderError::TooLongForType {
                max: 64,
                asked: num_bits,
            });
        }

        let buffer_len_bits = self.buffer.len() * 8;
        if self.bit_cursor + num_bits as usize > buffer_len_bits {
            return Err(BitReaderError::OutOfBounds {
                asked: num_bits as usize,
                available: buffer_len_bits - self.bit_cursor,
            });
        }

        let mut result: u64 = 0;
        let mut bits_read = 0usize;
        while bits_read < num_bits as usize {
            let position = self.bit_cursor + bits_read;
            let byte = self.buffer[position / 8];
            let bit_offset = position % 8;

            let chunk = (8 - bit_offset).min(num_bits as usize - bits_read);
            let mask = ((1u16 << chunk) - 1) as u8;
            result |= (((byte >> bit_offset) & mask) as u64) << bits_read;

            bits_read += chunk;
        }
        self.bit_cursor += num_bits as usize;
        Ok(result)
    }

    /// Read up to 8 bits.
    pub fn read_u8(&mut self, num_bits: u8) -> Result<u8, BitReaderError> {
        if num_bits > 8 {
            return Err(BitReaderError::TooLongForType {
                max: 8,
                asked: num_bits,
            });
        }
        self.read_u64(num_bits).map(|val| val as u8)
    }

    /// Read up to 32 bits.
    pub fn read_u32(&mut self, num_bits: u8) -> Result<u32, BitReaderError> {
        if num_bits > 32 {
            return Err(BitReaderError::TooLongForType {
                max: 32,
                asked: num_bits,
            });
        }
        self.read_u64(num_bits).map(|val| val as u32)
    }

    /// Borrow `len` bytes at the cursor, which must be byte aligned.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], BitReaderError> {
        if self.bit_cursor % 8 != 0 {
            return Err(BitReaderError::NonAlignedBit {
                cursor: self.bit_cursor,
            });
        }

        let byte_start = self.bit_cursor / 8;
        let byte_end = byte_start + len;
        if byte_end > self.buffer.len() {
            return Err(BitReaderError::OutOfBounds {
                asked: byte_end,
                available: self.buffer.len(),
            });
        }
        self.bit_cursor += len * 8;
        Ok(&self.buffer[byte_start..byte_end])
    }
}

//==================================================================================BITWRITER
/// Writer laying bit segments into a borrowed buffer. Bits outside the
/// written segment are preserved, so a `0xFF`-prefilled buffer keeps unused
/// bits at 1.
pub struct BitWriter<'a> {
    buffer: &'a mut [u8],
    bit_cursor: usize,
}

impl<'a> BitWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            bit_cursor: 0,
        }
    }

    /// Current cursor in bits.
    pub fn position(&self) -> usize {
        self.bit_cursor
    }

    /// Move the cursor to an absolute bit position.
    pub fn seek(&mut self, bit: usize) -> Result<(), BitWriterError> {
        let buffer_len_bits = self.buffer.len() * 8;
        if bit > buffer_len_bits {
            return Err(BitWriterError::OutOfBounds {
                asked: bit,
                available: buffer_len_bits,
            });
        }
        self.bit_cursor = bit;
        Ok(())
    }

    /// Write the `num_bits` (1..=64) low bits of `value` at the cursor.
    pub fn write_u64(&mut self, value: u64, num_bits: u8) -> Result<(), BitWriterError> {
        if !(1..=64).contains(&num_bits) {
            return Err(BitWriterError::TooLongForType {
                max: 64,
                asked: num_bits,
            });
        }

        let buffer_len_bits = self.buffer.len() * 8;
        if self.bit_cursor + num_bits as usize > buffer_len_bits {
            return Err(BitWriterError::OutOfBounds {
                asked: num_bits as usize,
                available: buffer_len_bits - self.bit_cursor,
            });
        }

        let mut remaining = value;
        let mut bits_written = 0usize;
        while bits_written < num_bits as usize {
            let position = self.bit_cursor + bits_written;
            let index = position / 8;
            let bit_offset = position % 8;

            let chunk = (8 - bit_offset).min(num_bits as usize - bits_written);
            let mask = ((1u16 << chunk) - 1) as u8;
            self.buffer[index] &= !(mask << bit_offset);
            self.buffer[index] |= (remaining as u8 & mask) << bit_offset;
            remaining >>= chunk;

            bits_written += chunk;
        }
        self.bit_cursor += num_bits as usize;
        Ok(())
    }

    /// Copy a byte slice at the cursor, which must be byte aligned.
    pub fn write_slice(&mut self, slice: &[u8]) -> Result<(), BitWriterError> {
        if self.bit_cursor % 8 != 0 {
            return Err(BitWriterError::NonAlignedBit {
                cursor: self.bit_cursor,
            });
        }
        let byte_start = self.bit_cursor / 8;
        let byte_end = byte_start + slice.len();
        if byte_end > self.buffer.len() {
            return Err(BitWriterError::OutOfBounds {
                asked: byte_end,
                available: self.buffer.len(),
            });
        }
        self.buffer[byte_start..byte_end].copy_from_slice(slice);
        self.bit_cursor += slice.len() * 8;
        Ok(())
    }
}
