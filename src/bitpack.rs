//! Bit packing utilities for the LSB-first bit-stuffing layout.
//!
//! Values are laid down least significant bit first, filling each byte from
//! bit 0 upwards before moving to the next byte. Read as little-endian
//! 32-bit words this is the same stream as packing each value at the current
//! bit offset of the current word, which is how version 3 and later lay out
//! bit-stuffed arrays.

use crate::error::LercError;
use crate::Result;

/// Maximum number of bits that can be written in a single operation.
pub const MAX_BITS: usize = 32;

/// Number of bits in a byte.
const BYTE_BITS: usize = 8;

/// Number of bytes needed to hold `bits` bits.
#[inline]
pub fn bytes_for_bits(bits: usize) -> usize {
    bits.div_ceil(BYTE_BITS)
}

#[inline]
fn low_mask(bits: usize) -> u32 {
    if bits >= MAX_BITS {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

/// A bit packer for reading and writing variable-width integers.
///
/// This supports both reading from a byte slice and writing to a growable Vec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitPack<B> {
    buff: B,
    cursor: usize,
    bits: usize,
}

impl<B> BitPack<B> {
    /// Create a new BitPack with the given buffer.
    #[inline]
    pub fn new(buff: B) -> Self {
        BitPack {
            buff,
            cursor: 0,
            bits: 0,
        }
    }

    /// Get the total number of bits processed so far.
    #[inline]
    pub fn sum_bits(&self) -> usize {
        self.cursor * BYTE_BITS + self.bits
    }
}

impl<B: AsRef<[u8]>> BitPack<B> {
    /// Get a reference to the underlying buffer as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.buff.as_ref()
    }

    #[inline]
    fn check_available(&self, bits: usize) -> Result<()> {
        if bits > MAX_BITS {
            return Err(LercError::failed(format!(
                "bit width {bits} exceeds maximum of {MAX_BITS}"
            )));
        }
        let total = self.as_slice().len() * BYTE_BITS;
        if total < self.sum_bits() + bits {
            return Err(LercError::UnexpectedEof {
                needed: bytes_for_bits(bits),
                available: (total - self.sum_bits()) / BYTE_BITS,
            });
        }
        Ok(())
    }
}

// Reading operations for byte slices
impl BitPack<&[u8]> {
    /// Read `bits` bits from the buffer and return as u32.
    pub fn read(&mut self, mut bits: usize) -> Result<u32> {
        self.check_available(bits)?;

        let mut shift = 0usize;
        let mut output = 0u32;

        while bits > 0 {
            let byte_left = BYTE_BITS - self.bits;
            let take = bits.min(byte_left);

            let bb = (self.buff[self.cursor] as u32 >> self.bits) & low_mask(take);
            output |= bb << shift;
            shift += take;
            bits -= take;
            self.bits += take;

            if self.bits == BYTE_BITS {
                self.cursor += 1;
                self.bits = 0;
            }
        }

        Ok(output)
    }
}

// Writing operations for mutable byte slices
impl BitPack<&mut [u8]> {
    /// Write `bits` bits of `value` to the buffer.
    pub fn write(&mut self, mut value: u32, mut bits: usize) -> Result<()> {
        self.check_available(bits)?;
        value &= low_mask(bits);

        while bits > 0 {
            let bits_left = BYTE_BITS - self.bits;
            let take = bits.min(bits_left);

            let bb = value & low_mask(take);
            self.buff[self.cursor] |= (bb << self.bits) as u8;
            self.bits += take;
            bits -= take;
            value = if take >= MAX_BITS { 0 } else { value >> take };

            if self.bits == BYTE_BITS {
                self.cursor += 1;
                self.bits = 0;
            }
        }

        Ok(())
    }
}

impl Default for BitPack<Vec<u8>> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

// Writing operations for growable Vec
impl BitPack<Vec<u8>> {
    /// Create a new BitPack with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Vec::with_capacity(capacity))
    }

    /// Write `bits` bits of `value` to the buffer.
    ///
    /// The buffer will grow as needed.
    #[inline]
    pub fn write(&mut self, value: u32, bits: usize) -> Result<()> {
        if bits > MAX_BITS {
            return Err(LercError::failed(format!(
                "bit width {bits} exceeds maximum of {MAX_BITS}"
            )));
        }

        let len = self.buff.len();
        if let Some(bits_needed) = (self.sum_bits() + bits).checked_sub(len * BYTE_BITS) {
            self.buff.resize(len + bytes_for_bits(bits_needed), 0x0);
        }

        let mut bitpack = BitPack {
            buff: self.buff.as_mut_slice(),
            cursor: self.cursor,
            bits: self.bits,
        };

        bitpack.write(value, bits)?;

        self.bits = bitpack.bits;
        self.cursor = bitpack.cursor;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let mut bitpack_vec = BitPack::<Vec<u8>>::with_capacity(8);
        bitpack_vec.write(10, 4).unwrap();
        bitpack_vec.write(1021, 10).unwrap();
        bitpack_vec.write(3, 2).unwrap();
        assert_eq!(bitpack_vec.as_slice().len(), 2);

        let mut bitpack = BitPack::<&[u8]>::new(bitpack_vec.as_slice());
        assert_eq!(bitpack.read(4).unwrap(), 10);
        assert_eq!(bitpack.read(10).unwrap(), 1021);
        assert_eq!(bitpack.read(2).unwrap(), 3);
    }

    #[test]
    fn test_lsb_first_layout() {
        let mut bitpack_vec = BitPack::<Vec<u8>>::default();
        bitpack_vec.write(0b101, 3).unwrap();
        bitpack_vec.write(0b11111, 5).unwrap();
        bitpack_vec.write(0x1, 1).unwrap();
        assert_eq!(bitpack_vec.as_slice(), &[0b1111_1101, 0b0000_0001]);
    }

    #[test]
    fn test_full_width_values() {
        let mut bitpack_vec = BitPack::<Vec<u8>>::default();
        bitpack_vec.write(0x7FFF_FFFF, 31).unwrap();
        bitpack_vec.write(0xFFFF_FFFF, 32).unwrap();
        bitpack_vec.write(1, 1).unwrap();

        let mut bitpack = BitPack::<&[u8]>::new(bitpack_vec.as_slice());
        assert_eq!(bitpack.read(31).unwrap(), 0x7FFF_FFFF);
        assert_eq!(bitpack.read(32).unwrap(), 0xFFFF_FFFF);
        assert_eq!(bitpack.read(1).unwrap(), 1);
    }

    #[test]
    fn test_read_past_end() {
        let buf = [0xFFu8];
        let mut bitpack = BitPack::<&[u8]>::new(&buf);
        assert_eq!(bitpack.read(6).unwrap(), 0x3F);
        assert!(matches!(
            bitpack.read(3),
            Err(LercError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_bit_width_exceeded() {
        let mut bitpack_vec = BitPack::<Vec<u8>>::with_capacity(8);
        assert!(matches!(bitpack_vec.write(0, 33), Err(LercError::Failed(_))));
    }

    #[test]
    fn test_bytes_for_bits() {
        assert_eq!(bytes_for_bits(0), 0);
        assert_eq!(bytes_for_bits(1), 1);
        assert_eq!(bytes_for_bits(8), 1);
        assert_eq!(bytes_for_bits(9), 2);
    }
}
