//! Checked little-endian reads over a borrowed byte slice.
//!
//! Every read verifies the remaining length first and reports
//! [`LercError::UnexpectedEof`] instead of reading out of bounds.

use crate::error::LercError;
use crate::Result;

/// A forward-only reader over a byte slice.
#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
    buff: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor positioned at the start of `buff`.
    #[inline]
    pub fn new(buff: &'a [u8]) -> Self {
        ByteCursor { buff, pos: 0 }
    }

    /// Number of unread bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buff.len() - self.pos
    }

    /// The unread tail of the slice.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.buff[self.pos..]
    }

    #[inline]
    fn check(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(LercError::UnexpectedEof {
                needed: n,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Read `n` bytes and advance.
    #[inline]
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.check(n)?;
        let out = &self.buff[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Advance by `n` bytes without looking at them.
    #[inline]
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.check(n)?;
        self.pos += n;
        Ok(())
    }

    /// Read a fixed-size byte array.
    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(bytes);
        Ok(arr)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    #[inline]
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    #[inline]
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }
}
