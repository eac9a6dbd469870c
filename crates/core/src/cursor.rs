//! Byte and bit cursors over caller-owned buffers.
//!
//! Every codec in this crate reads through [`BitCursor`] and writes through
//! [`BitWriter`], so buffer bounds are checked in exactly one place. A read
//! that would run off the end of the buffer reports
//! [`DecodeError::Truncated`] and leaves the cursor where it was.
//!
//! Bits are consumed MSB first, which matches how SNES bitplanes store the
//! leftmost pixel in bit 7.

use crate::DecodeError;

/// Read cursor with a bit-level sub-position.
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    data: &'a [u8],
    /// Byte position of the next read
    pos: usize,
    /// Bits of `data[pos]` already consumed (0-7)
    bit: u8,
}

impl<'a> BitCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bit: 0,
        }
    }

    /// Create a cursor positioned at `offset`.
    ///
    /// An offset past the end is allowed; the first read reports `Truncated`.
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            pos: offset,
            bit: 0,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn bit_position(&self) -> u8 {
        self.bit
    }

    /// Whole bytes left to read (a partially consumed byte does not count).
    #[inline]
    pub fn remaining(&self) -> usize {
        let start = if self.bit == 0 { self.pos } else { self.pos + 1 };
        self.data.len().saturating_sub(start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn seek(&mut self, offset: usize) {
        self.pos = offset;
        self.bit = 0;
    }

    /// Drop any partially read byte.
    pub fn align_to_byte(&mut self) {
        if self.bit != 0 {
            self.pos += 1;
            self.bit = 0;
        }
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::Truncated { offset: self.pos }
    }

    pub fn peek_u8(&self) -> Result<u8, DecodeError> {
        if self.bit != 0 {
            return self.data.get(self.pos + 1).copied().ok_or(DecodeError::Truncated {
                offset: self.pos + 1,
            });
        }
        self.data.get(self.pos).copied().ok_or_else(|| self.truncated())
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.align_to_byte();
        let byte = self.data.get(self.pos).copied().ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        self.align_to_byte();
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        self.align_to_byte();
        let bytes = self.read_slice(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Borrow the next `len` bytes and step over them.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.align_to_byte();
        let end = self.pos.checked_add(len).ok_or_else(|| self.truncated())?;
        let slice = self.data.get(self.pos..end).ok_or_else(|| self.truncated())?;
        self.pos = end;
        Ok(slice)
    }

    pub fn read_bit(&mut self) -> Result<bool, DecodeError> {
        let byte = self.data.get(self.pos).copied().ok_or_else(|| self.truncated())?;
        let value = (byte >> (7 - self.bit)) & 1;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.pos += 1;
        }
        Ok(value == 1)
    }

    /// Read up to 16 bits MSB first.
    pub fn read_bits(&mut self, count: u8) -> Result<u16, DecodeError> {
        debug_assert!(count <= 16);
        // Check the whole span first so a failed read does not move the cursor
        if self.pos >= self.data.len() {
            return Err(self.truncated());
        }
        let bits_left = (self.data.len() - self.pos) * 8 - self.bit as usize;
        if bits_left < count as usize {
            return Err(self.truncated());
        }
        let mut value = 0u16;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()? as u16;
        }
        Ok(value)
    }
}

/// Growable write cursor with a bit-level sub-position.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    /// Bits of the last byte already written (0 = byte aligned)
    bit: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            bit: 0,
        }
    }

    /// Bytes written so far, counting a partial byte.
    #[inline]
    pub fn position(&self) -> usize {
        self.data.len()
    }

    pub fn align_to_byte(&mut self) {
        self.bit = 0;
    }

    pub fn write_u8(&mut self, value: u8) {
        self.align_to_byte();
        self.data.push(value);
    }

    pub fn write_u16_be(&mut self, value: u16) {
        self.align_to_byte();
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_slice(&mut self, bytes: &[u8]) {
        self.align_to_byte();
        self.data.extend_from_slice(bytes);
    }

    pub fn write_bit(&mut self, set: bool) {
        if self.bit == 0 {
            self.data.push(0);
        }
        if set {
            if let Some(last) = self.data.last_mut() {
                *last |= 0x80 >> self.bit;
            }
        }
        self.bit = (self.bit + 1) % 8;
    }

    /// Write the low `count` bits of `value`, MSB first.
    pub fn write_bits(&mut self, value: u16, count: u8) {
        debug_assert!(count <= 16);
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}
