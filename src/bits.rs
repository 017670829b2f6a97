//! MSB-first bit buffer with absolute bit addressing.
//!
//! Bit 0 is the most significant bit of byte 0. Integers are written and read
//! most-significant-bit first, so a field of width `n` at offset `o` occupies bits
//! `o..o + n` in reading order regardless of byte boundaries.

use byteorder::{BigEndian, ByteOrder};

/// Widest integer a single read or write can carry.
pub const MAX_WIDTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitError {
    #[error("value {value} does not fit in {width} bits")]
    IntegerTooLarge { value: u64, width: usize },
    #[error("{width} bits at offset {offset} out of range (buffer has {bit_len} bits)")]
    OutOfRange { offset: usize, width: usize, bit_len: usize },
    #[error("width {0} exceeds 64 bits")]
    WidthTooLarge(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBuffer {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitBuffer {
    /// Zero-filled buffer holding `bit_len` bits.
    pub fn with_bit_len(bit_len: usize) -> Self {
        BitBuffer { bytes: vec![0u8; bit_len.div_ceil(8)], bit_len }
    }

    /// Wrap raw bytes; every bit of every byte is addressable.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let bit_len = bytes.len() * 8;
        BitBuffer { bytes, bit_len }
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Capacity rounded up to a whole byte.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Extend the logical length to the next byte boundary. Trailing bits are already zero.
    pub fn pad_to_byte(&mut self) {
        self.bit_len = self.bytes.len() * 8;
    }

    /// Write the low `width` bits of `value` at `offset`, growing the buffer when the
    /// field ends past the current length.
    pub fn write_uint(&mut self, value: u64, offset: usize, width: usize) -> Result<(), BitError> {
        if width > MAX_WIDTH {
            return Err(BitError::WidthTooLarge(width));
        }
        if width < MAX_WIDTH && value >> width != 0 {
            return Err(BitError::IntegerTooLarge { value, width });
        }
        self.grow_to(offset + width);
        for i in 0..width {
            let bit = (value >> (width - 1 - i)) & 1 != 0;
            self.set_bit(offset + i, bit);
        }
        Ok(())
    }

    /// Read `width` bits starting at `offset` as an unsigned integer.
    pub fn read_uint(&self, offset: usize, width: usize) -> Result<u64, BitError> {
        if width > MAX_WIDTH {
            return Err(BitError::WidthTooLarge(width));
        }
        self.check_range(offset, width)?;
        if width == 0 {
            return Ok(0);
        }
        let end = offset + width;
        let first = offset / 8;
        let last = (end - 1) / 8;
        let span = last - first + 1;
        if span <= 8 {
            // Load the covering bytes into a big-endian window, then drop the leading
            // bits before the field and the trailing bits after it.
            let mut window = [0u8; 8];
            window[..span].copy_from_slice(&self.bytes[first..=last]);
            let raw = BigEndian::read_u64(&window) << (offset % 8);
            return Ok(raw >> (MAX_WIDTH - width));
        }
        // Unaligned fields wider than 57 bits straddle nine bytes.
        let mut value = 0u64;
        for i in offset..end {
            value = (value << 1) | self.bit(i) as u64;
        }
        Ok(value)
    }

    pub fn read_bit(&self, offset: usize) -> Result<bool, BitError> {
        self.check_range(offset, 1)?;
        Ok(self.bit(offset))
    }

    /// Copy every bit of `src` into this buffer starting at `offset`.
    pub fn write_bits(&mut self, offset: usize, src: &BitBuffer) {
        self.grow_to(offset + src.bit_len);
        for i in 0..src.bit_len {
            self.set_bit(offset + i, src.bit(i));
        }
    }

    /// Copy up to `width` bits starting at `offset` into a new buffer, keeping only the
    /// bits actually present.
    pub fn slice_available(&self, offset: usize, width: usize) -> BitBuffer {
        let end = offset.saturating_add(width).min(self.bit_len);
        let len = end.saturating_sub(offset);
        let mut out = BitBuffer::with_bit_len(len);
        for i in 0..len {
            out.set_bit(i, self.bit(offset + i));
        }
        out
    }

    fn check_range(&self, offset: usize, width: usize) -> Result<(), BitError> {
        match offset.checked_add(width) {
            Some(end) if end <= self.bit_len => Ok(()),
            _ => Err(BitError::OutOfRange { offset, width, bit_len: self.bit_len }),
        }
    }

    fn grow_to(&mut self, bit_len: usize) {
        if bit_len > self.bit_len {
            self.bit_len = bit_len;
            self.bytes.resize(bit_len.div_ceil(8), 0);
        }
    }

    fn bit(&self, offset: usize) -> bool {
        (self.bytes[offset / 8] >> (7 - offset % 8)) & 1 != 0
    }

    fn set_bit(&mut self, offset: usize, bit: bool) {
        let mask = 1u8 << (7 - offset % 8);
        if bit {
            self.bytes[offset / 8] |= mask;
        } else {
            self.bytes[offset / 8] &= !mask;
        }
    }
}
