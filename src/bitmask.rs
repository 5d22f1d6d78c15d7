//! Dense one-bit-per-pixel validity mask.
//!
//! Pixel `k = row * width + col` maps to bit `7 - (k & 7)` of byte `k >> 3`,
//! i.e. the most significant bit of each byte holds the first pixel.

/// Set bit counts for every nibble value.
const NUM_BITS_NIBBLE: [u8; 16] = [0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4];

#[inline]
fn bit(k: usize) -> u8 {
    0x80 >> (k & 7)
}

/// Valid/invalid bitmap for a `width x height` pixel grid.
///
/// Two masks are equal when they have the same size and mark the same
/// pixels valid. Padding bits in the last byte do not take part.
#[derive(Clone, Debug, Default)]
pub struct BitMask {
    width: usize,
    height: usize,
    bits: Vec<u8>,
}

impl BitMask {
    /// Create a mask of the given size with every pixel invalid.
    pub fn new(width: usize, height: usize) -> Self {
        let mut mask = BitMask::default();
        mask.set_size(width, height);
        mask
    }

    /// Create a mask of the given size with every pixel valid.
    pub fn all_valid(width: usize, height: usize) -> Self {
        let mut mask = BitMask::new(width, height);
        mask.set_all_valid();
        mask
    }

    /// Build a mask from one byte per pixel, where non-zero means valid.
    ///
    /// Returns `None` if `valid_bytes` does not hold exactly `width * height` entries.
    pub fn from_valid_bytes(valid_bytes: &[u8], width: usize, height: usize) -> Option<Self> {
        if valid_bytes.len() != width.checked_mul(height)? {
            return None;
        }
        let mut mask = BitMask::new(width, height);
        for (k, &v) in valid_bytes.iter().enumerate() {
            if v != 0 {
                mask.set_valid(k);
            }
        }
        Some(mask)
    }

    /// Expand to one byte per pixel: 1 for valid, 0 for invalid.
    pub fn to_valid_bytes(&self) -> Vec<u8> {
        (0..self.num_pixels())
            .map(|k| u8::from(self.is_valid(k)))
            .collect()
    }

    /// Resize the mask. All prior content is discarded and every pixel becomes invalid.
    pub fn set_size(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.bits = vec![0u8; (width * height).div_ceil(8)];
    }

    /// Pixels per row.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of pixels covered by the mask.
    #[inline]
    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }

    /// Size of the backing bit array in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// The raw backing bytes.
    #[inline]
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    /// Mutable access to the raw backing bytes.
    #[inline]
    pub fn bits_mut(&mut self) -> &mut [u8] {
        &mut self.bits
    }

    /// Whether pixel `k` is valid. Panics if `k` is outside the mask.
    #[inline]
    pub fn is_valid(&self, k: usize) -> bool {
        self.bits[k >> 3] & bit(k) != 0
    }

    /// Mark pixel `k` valid.
    #[inline]
    pub fn set_valid(&mut self, k: usize) {
        self.bits[k >> 3] |= bit(k);
    }

    /// Mark pixel `k` invalid.
    #[inline]
    pub fn set_invalid(&mut self, k: usize) {
        self.bits[k >> 3] &= !bit(k);
    }

    /// Mark every pixel valid.
    pub fn set_all_valid(&mut self) {
        self.bits.fill(0xFF);
    }

    /// Mark every pixel invalid.
    pub fn set_all_invalid(&mut self) {
        self.bits.fill(0);
    }

    /// Count the valid pixels.
    ///
    /// Bits in the tail of the last byte beyond `width * height` are not counted,
    /// whatever their value.
    pub fn count_valid_bits(&self) -> usize {
        let mut sum: usize = self
            .bits
            .iter()
            .map(|&b| (NUM_BITS_NIBBLE[(b & 15) as usize] + NUM_BITS_NIBBLE[(b >> 4) as usize]) as usize)
            .sum();

        for k in self.num_pixels()..self.size() * 8 {
            if self.is_valid(k) {
                sum -= 1;
            }
        }
        sum
    }
}

impl PartialEq for BitMask {
    fn eq(&self, other: &Self) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        let n = self.num_pixels();
        let full = n >> 3;
        if self.bits.get(..full) != other.bits.get(..full) {
            return false;
        }
        let tail = n & 7;
        if tail == 0 {
            return true;
        }
        let keep = !(0xFFu8 >> tail);
        match (self.bits.get(full), other.bits.get(full)) {
            (Some(a), Some(b)) => a & keep == b & keep,
            _ => false,
        }
    }
}

impl Eq for BitMask {}
