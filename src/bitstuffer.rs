//! Bit stuffing of bounded unsigned integer arrays.
//!
//! Each stuffed array starts with one header byte:
//!
//! - bits 0-4: number of bits per element (0..=31),
//! - bit 5: LUT mode flag,
//! - bits 6-7: width of the element count that follows (`0` = 4 bytes,
//!   `1` = 2 bytes, `2` = 1 byte).
//!
//! In simple mode the element count is followed by the packed elements. In LUT
//! mode it is followed by the LUT size (including the implicit leading zero),
//! the packed LUT without its zero, and the packed per-element LUT indices.
//!
//! Blobs of version 3 and later pack LSB first (see [`crate::bitpack`]).
//! Older blobs pack MSB first within little-endian 32-bit words and trim the
//! unused trailing bytes of the last word.

use crate::bitpack::{bytes_for_bits, BitPack};
use crate::cursor::ByteCursor;
use crate::error::LercError;
use crate::Result;

/// Bit 5 of the header byte.
const LUT_FLAG: u8 = 1 << 5;

/// First blob version using the LSB-first layout.
const LSB_FIRST_VERSION: i32 = 3;

/// Number of bits needed to represent `max_elem`.
#[inline]
pub fn num_bits(max_elem: u32) -> u32 {
    32 - max_elem.leading_zeros()
}

/// Bytes used to store an element count.
#[inline]
pub fn num_bytes_uint(k: u32) -> usize {
    if k < 256 {
        1
    } else if k < (1 << 16) {
        2
    } else {
        4
    }
}

fn encode_uint(out: &mut Vec<u8>, k: u32, num_bytes: usize) {
    match num_bytes {
        1 => out.push(k as u8),
        2 => out.extend_from_slice(&(k as u16).to_le_bytes()),
        _ => out.extend_from_slice(&k.to_le_bytes()),
    }
}

fn decode_uint(cursor: &mut ByteCursor<'_>, num_bytes: usize) -> Result<u32> {
    match num_bytes {
        1 => Ok(cursor.read_u8()? as u32),
        2 => Ok(cursor.read_u16()? as u32),
        4 => cursor.read_u32(),
        _ => Err(LercError::failed(format!(
            "invalid element count width {num_bytes}"
        ))),
    }
}

/// Header byte for `num_bits` bits per element and `num_elem` elements.
fn header_byte(num_bits: u32, num_elem: u32) -> u8 {
    let n = num_bytes_uint(num_elem);
    let bits67 = if n == 4 { 0 } else { 3 - n as u8 };
    num_bits as u8 | (bits67 << 6)
}

/// Exact size of a simple-mode encoding of `num_elem` elements bounded by `max_elem`.
pub fn compute_num_bytes_needed_simple(num_elem: u32, max_elem: u32) -> usize {
    let bits = num_bits(max_elem) as usize;
    1 + num_bytes_uint(num_elem) + bytes_for_bits(num_elem as usize * bits)
}

/// Size of the cheaper of simple and LUT mode for `(value, index)` pairs sorted by value.
///
/// Returns the size and whether LUT mode is the cheaper one.
pub fn compute_num_bytes_needed_lut(sorted: &[(u32, u32)]) -> (usize, bool) {
    let num_elem = sorted.len();
    let max_elem = sorted.last().map_or(0, |p| p.0);
    let bits = num_bits(max_elem) as usize;
    let num_bytes = 1 + num_bytes_uint(num_elem as u32) + bytes_for_bits(num_elem * bits);

    let n_lut = sorted.windows(2).filter(|w| w[0].0 != w[1].0).count();
    let n_bits_lut = num_bits(n_lut as u32) as usize;
    let num_bytes_lut = 1
        + num_bytes_uint(num_elem as u32)
        + 1
        + bytes_for_bits(n_lut * bits)
        + bytes_for_bits(num_elem * n_bits_lut);

    let do_lut = num_bytes_lut < num_bytes && (1..255).contains(&n_lut);
    if do_lut {
        (num_bytes_lut, true)
    } else {
        (num_bytes, false)
    }
}

/// Encode `data` in simple mode.
pub fn encode_simple(out: &mut Vec<u8>, data: &[u32], lerc2_version: i32) -> Result<()> {
    let max_elem = data
        .iter()
        .copied()
        .max()
        .ok_or_else(|| LercError::failed("cannot bit stuff an empty array"))?;
    let bits = num_bits(max_elem);
    if bits >= 32 {
        return Err(LercError::failed("bit stuffing needs fewer than 32 bits per element"));
    }

    let num_elem = u32::try_from(data.len())
        .map_err(|_| LercError::failed("too many elements to bit stuff"))?;
    out.push(header_byte(bits, num_elem));
    encode_uint(out, num_elem, num_bytes_uint(num_elem));

    if bits > 0 {
        bit_stuff(out, data, bits as usize, lerc2_version)?;
    }
    Ok(())
}

/// Encode `(value, original index)` pairs sorted by value in LUT mode.
///
/// The smallest value must be 0; it is implicit in the LUT.
pub fn encode_lut(out: &mut Vec<u8>, sorted: &[(u32, u32)], lerc2_version: i32) -> Result<()> {
    match sorted.first() {
        Some(&(0, _)) => {}
        _ => return Err(LercError::failed("lut encoding needs a minimum of 0")),
    }

    let num_elem = sorted.len();
    let mut lut = Vec::new();
    let mut index_vec = vec![0u32; num_elem];
    let mut index_lut = 0u32;

    for (i, &(value, orig)) in sorted.iter().enumerate() {
        if i > 0 && value != sorted[i - 1].0 {
            lut.push(value);
            index_lut += 1;
        }
        let slot = index_vec
            .get_mut(orig as usize)
            .ok_or_else(|| LercError::failed("lut index out of range"))?;
        *slot = index_lut;
    }

    let n_lut = lut.len();
    if !(1..255).contains(&n_lut) {
        return Err(LercError::failed(format!("lut size {n_lut} out of range")));
    }
    let max_elem = lut[n_lut - 1];
    let bits = num_bits(max_elem);
    if bits >= 32 {
        return Err(LercError::failed("bit stuffing needs fewer than 32 bits per element"));
    }

    let num_elem = num_elem as u32;
    out.push(header_byte(bits, num_elem) | LUT_FLAG);
    encode_uint(out, num_elem, num_bytes_uint(num_elem));
    out.push(n_lut as u8 + 1);

    bit_stuff(out, &lut, bits as usize, lerc2_version)?;
    let n_bits_lut = num_bits(n_lut as u32) as usize;
    bit_stuff(out, &index_vec, n_bits_lut, lerc2_version)?;
    Ok(())
}

/// Decode one bit-stuffed array.
///
/// Fails if the header declares more than `max_element_count` elements, so a
/// corrupt count cannot trigger an unbounded allocation.
pub fn decode(
    cursor: &mut ByteCursor<'_>,
    max_element_count: usize,
    lerc2_version: i32,
) -> Result<Vec<u32>> {
    let header = cursor.read_u8()?;
    let bits67 = header >> 6;
    let count_bytes = if bits67 == 0 { 4 } else { 3 - bits67 as usize };
    let do_lut = header & LUT_FLAG != 0;
    let bits = (header & 31) as usize;

    let num_elem = decode_uint(cursor, count_bytes)? as usize;
    if num_elem > max_element_count {
        return Err(LercError::failed(format!(
            "bit stuffed array declares {num_elem} elements, at most {max_element_count} allowed"
        )));
    }

    if !do_lut {
        if bits == 0 {
            return Ok(vec![0; num_elem]);
        }
        return bit_unstuff(cursor, num_elem, bits, lerc2_version);
    }

    if bits == 0 {
        return Err(LercError::failed("lut mode with zero bits per element"));
    }
    let n_lut = (cursor.read_u8()? as usize)
        .checked_sub(1)
        .ok_or_else(|| LercError::failed("empty lut"))?;
    let mut lut = bit_unstuff(cursor, n_lut, bits, lerc2_version)?;

    let n_bits_lut = num_bits(n_lut as u32) as usize;
    if n_bits_lut == 0 {
        return Err(LercError::failed("lut without entries"));
    }
    let mut data = bit_unstuff(cursor, num_elem, n_bits_lut, lerc2_version)?;

    lut.insert(0, 0);
    for v in data.iter_mut() {
        *v = *lut
            .get(*v as usize)
            .ok_or_else(|| LercError::failed("lut index out of range"))?;
    }
    Ok(data)
}

fn bit_stuff(out: &mut Vec<u8>, data: &[u32], bits: usize, lerc2_version: i32) -> Result<()> {
    if lerc2_version >= LSB_FIRST_VERSION {
        let mut bitpack = BitPack::<Vec<u8>>::with_capacity(bytes_for_bits(data.len() * bits));
        for &v in data {
            bitpack.write(v, bits)?;
        }
        out.extend_from_slice(bitpack.as_slice());
        Ok(())
    } else {
        bit_stuff_msb_first(out, data, bits)
    }
}

fn bit_unstuff(
    cursor: &mut ByteCursor<'_>,
    num_elem: usize,
    bits: usize,
    lerc2_version: i32,
) -> Result<Vec<u32>> {
    if bits >= 32 {
        return Err(LercError::failed("bit stuffing needs fewer than 32 bits per element"));
    }
    if num_elem == 0 {
        return Ok(Vec::new());
    }
    let total_bits = num_elem
        .checked_mul(bits)
        .ok_or_else(|| LercError::failed("bit stuffed array too large"))?;
    let bytes = cursor.read_bytes(bytes_for_bits(total_bits))?;

    if lerc2_version >= LSB_FIRST_VERSION {
        let mut bitpack = BitPack::<&[u8]>::new(bytes);
        (0..num_elem).map(|_| bitpack.read(bits)).collect()
    } else {
        Ok(bit_unstuff_msb_first(bytes, num_elem, bits))
    }
}

/// Bytes of the last 32-bit word that the MSB-first layout leaves out.
fn num_tail_bytes_not_needed(total_bits: usize) -> usize {
    let bytes = (total_bits & 31).div_ceil(8);
    if bytes > 0 {
        4 - bytes
    } else {
        0
    }
}

fn bit_stuff_msb_first(out: &mut Vec<u8>, data: &[u32], bits: usize) -> Result<()> {
    if bits == 0 || bits >= 32 {
        return Err(LercError::failed(format!("cannot stuff {bits} bits per element")));
    }
    let total_bits = data.len() * bits;
    let mut words = vec![0u32; total_bits.div_ceil(32)];
    let mask = (1u32 << bits) - 1;

    let mut idx = 0;
    let mut bit_pos = 0;
    for &v in data {
        let v = v & mask;
        if 32 - bit_pos >= bits {
            words[idx] |= v << (32 - bit_pos - bits);
            bit_pos += bits;
            if bit_pos == 32 {
                bit_pos = 0;
                idx += 1;
            }
        } else {
            let n = bits - (32 - bit_pos);
            words[idx] |= v >> n;
            idx += 1;
            words[idx] |= v << (32 - n);
            bit_pos = n;
        }
    }

    let tail = num_tail_bytes_not_needed(total_bits);
    if let Some((last, head)) = words.split_last() {
        for w in head {
            out.extend_from_slice(&w.to_le_bytes());
        }
        let last = last >> (8 * tail);
        out.extend_from_slice(&last.to_le_bytes()[..4 - tail]);
    }
    Ok(())
}

fn bit_unstuff_msb_first(bytes: &[u8], num_elem: usize, bits: usize) -> Vec<u32> {
    let tail = num_tail_bytes_not_needed(num_elem * bits);
    let mut words: Vec<u32> = bytes
        .chunks(4)
        .map(|c| {
            let mut arr = [0u8; 4];
            arr[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(arr)
        })
        .collect();
    if let Some(last) = words.last_mut() {
        *last <<= 8 * tail;
    }

    let mut out = Vec::with_capacity(num_elem);
    let mut idx = 0;
    let mut bit_pos = 0;
    for _ in 0..num_elem {
        if 32 - bit_pos >= bits {
            out.push((words[idx] << bit_pos) >> (32 - bits));
            bit_pos += bits;
            if bit_pos == 32 {
                bit_pos = 0;
                idx += 1;
            }
        } else {
            let mut v = (words[idx] << bit_pos) >> (32 - bits);
            idx += 1;
            bit_pos -= 32 - bits;
            v |= words[idx] >> (32 - bit_pos);
            out.push(v);
        }
    }
    out
}
