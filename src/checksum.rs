//! Fletcher-32 checksum over blob bytes.
//!
//! Bytes are consumed in big-endian pairs with both sums seeded to `0xffff`.
//! A trailing odd byte is treated as the high half of a final pair.

/// Largest number of pairs that can be summed before the 32-bit sums may overflow.
const BLOCK_WORDS: usize = 359;

#[inline]
fn fold(sum: u32) -> u32 {
    (sum & 0xffff) + (sum >> 16)
}

/// Compute the Fletcher-32 checksum of `bytes`.
pub fn fletcher32(bytes: &[u8]) -> u32 {
    let mut sum1: u32 = 0xffff;
    let mut sum2: u32 = 0xffff;

    let even = bytes.len() & !1;
    for block in bytes[..even].chunks(2 * BLOCK_WORDS) {
        for pair in block.chunks_exact(2) {
            sum1 += (pair[0] as u32) << 8;
            sum1 += pair[1] as u32;
            sum2 += sum1;
        }
        sum1 = fold(sum1);
        sum2 = fold(sum2);
    }

    if let Some(&last) = bytes.get(even) {
        sum1 += (last as u32) << 8;
        sum2 += sum1;
    }

    sum1 = fold(sum1);
    sum2 = fold(sum2);
    (sum2 << 16) | sum1
}
