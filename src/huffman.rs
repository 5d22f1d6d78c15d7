//! Canonical Huffman coding of byte-sized symbols.
//!
//! The encoder builds code lengths from a histogram, then reassigns the code
//! values canonically so the table can be rebuilt from lengths alone. The
//! decoder resolves codes of up to [`MAX_NUM_BITS_LUT`] bits with one table
//! lookup and walks an index-based tree for longer ones.
//!
//! Code table layout:
//!
//! ```text
//! i32 version, i32 size, i32 i0, i32 i1
//! code lengths of bins [i0, i1), bit stuffed in simple mode
//! code values, MSB first in little-endian u32 words
//! ```
//!
//! Bin indices wrap around `size`, so a table whose used bins straddle the
//! end of the histogram is stored as one short range.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::bitstuffer;
use crate::cursor::ByteCursor;
use crate::error::LercError;
use crate::Result;

/// Largest histogram the codec accepts.
pub const MAX_HISTO_SIZE: usize = 1 << 15;

/// Longest code resolved by direct lookup.
pub const MAX_NUM_BITS_LUT: u32 = 12;

/// Longest code the format can carry.
const MAX_CODE_LENGTH: u32 = 32;

/// Code table version written by the encoder.
const HUFFMAN_VERSION: i32 = 4;

/// Oldest code table version the decoder accepts.
const MIN_HUFFMAN_VERSION: i32 = 2;

#[inline]
fn wrap(i: usize, size: usize) -> usize {
    if i < size {
        i
    } else {
        i - size
    }
}

/// Node of the encoder's merge tree.
enum MergeNode {
    Leaf(usize),
    Internal(usize, usize),
}

/// Node of the decoder's fallback tree.
#[derive(Debug, Clone, Default)]
struct TreeNode {
    value: Option<u16>,
    children: [Option<u32>; 2],
}

/// A canonical Huffman code over `size` bins.
#[derive(Debug, Clone, Default)]
pub struct Huffman {
    /// `(length, code)` per bin. Length 0 marks an unused bin.
    code_table: Vec<(u16, u32)>,
    decode_lut: Vec<Option<(u8, u16)>>,
    num_bits_lut: u32,
    num_bits_to_skip_in_tree: u32,
    tree: Vec<TreeNode>,
}

impl Huffman {
    /// Build a canonical code for `histo`.
    ///
    /// Returns `None` if fewer than two bins are used, the histogram is too
    /// large, or a code would exceed 32 bits.
    pub fn compute_codes(histo: &[u32]) -> Option<Huffman> {
        let size = histo.len();
        if size == 0 || size >= MAX_HISTO_SIZE {
            return None;
        }

        let mut nodes: Vec<MergeNode> = Vec::with_capacity(2 * size);
        let mut heap = BinaryHeap::new();
        for (i, &count) in histo.iter().enumerate() {
            if count > 0 {
                heap.push(Reverse((count as u64, nodes.len())));
                nodes.push(MergeNode::Leaf(i));
            }
        }
        if heap.len() < 2 {
            return None;
        }

        while heap.len() > 1 {
            let Reverse((w0, n0)) = heap.pop()?;
            let Reverse((w1, n1)) = heap.pop()?;
            heap.push(Reverse((w0 + w1, nodes.len())));
            nodes.push(MergeNode::Internal(n0, n1));
        }
        let Reverse((_, root)) = heap.pop()?;

        let mut code_table = vec![(0u16, 0u32); size];
        let mut stack = vec![(root, 0u32)];
        while let Some((idx, depth)) = stack.pop() {
            match nodes[idx] {
                MergeNode::Leaf(bin) => code_table[bin].0 = depth as u16,
                MergeNode::Internal(c0, c1) => {
                    if depth == MAX_CODE_LENGTH {
                        return None;
                    }
                    stack.push((c0, depth + 1));
                    stack.push((c1, depth + 1));
                }
            }
        }

        let mut huffman = Huffman {
            code_table,
            ..Huffman::default()
        };
        huffman.convert_codes_to_canonical();
        Some(huffman)
    }

    /// The `(length, code)` table, one entry per bin.
    pub fn codes(&self) -> &[(u16, u32)] {
        &self.code_table
    }

    /// Assign consecutive code values, longest codes first.
    fn convert_codes_to_canonical(&mut self) {
        let size = self.code_table.len() as i64;
        let mut sort_vec: Vec<(i64, usize)> = self
            .code_table
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.0 > 0)
            .map(|(i, entry)| (entry.0 as i64 * size - i as i64, i))
            .collect();
        sort_vec.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let Some(&(_, first)) = sort_vec.first() else {
            return;
        };
        let mut code_canonical = 0u32;
        let mut len = self.code_table[first].0;

        for &(_, index) in &sort_vec {
            let delta = len - self.code_table[index].0;
            code_canonical >>= delta;
            len -= delta;
            self.code_table[index].1 = code_canonical;
            code_canonical = code_canonical.wrapping_add(1);
        }
    }

    /// Range `[i0, i1)` of bins to store, possibly wrapping past the end, and
    /// the longest code length in it.
    fn get_range(&self) -> Result<(usize, usize, u32)> {
        let size = self.code_table.len();
        if size == 0 || size >= MAX_HISTO_SIZE {
            return Err(LercError::failed("bad huffman table size"));
        }

        let used = |i: usize| self.code_table[i].0 > 0;
        let i0_simple = (0..size).find(|&i| used(i));
        let i1_simple = (0..size).rev().find(|&i| used(i)).map(|i| i + 1);
        let (i0_simple, i1_simple) = match (i0_simple, i1_simple) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(LercError::failed("huffman table has no codes")),
        };

        // largest stretch of unused bins
        let mut segm = (0usize, 0usize);
        let mut j = 0;
        while j < size {
            while j < size && used(j) {
                j += 1;
            }
            let k0 = j;
            while j < size && !used(j) {
                j += 1;
            }
            if j - k0 > segm.1 {
                segm = (k0, j - k0);
            }
        }

        let (i0, i1) = if size - segm.1 < i1_simple - i0_simple {
            (segm.0 + segm.1, segm.0 + size)
        } else {
            (i0_simple, i1_simple)
        };

        let max_len = (i0..i1)
            .map(|i| self.code_table[wrap(i, size)].0 as u32)
            .max()
            .unwrap_or(0);
        if max_len == 0 || max_len > MAX_CODE_LENGTH {
            return Err(LercError::failed(format!("bad huffman code length {max_len}")));
        }
        Ok((i0, i1, max_len))
    }

    fn num_bytes_code_table(&self) -> Result<usize> {
        let (i0, i1, max_len) = self.get_range()?;
        let size = self.code_table.len();
        let sum_len: usize = (i0..i1)
            .map(|i| self.code_table[wrap(i, size)].0 as usize)
            .sum();

        Ok(4 * 4
            + bitstuffer::compute_num_bytes_needed_simple((i1 - i0) as u32, max_len)
            + 4 * sum_len.div_ceil(32))
    }

    /// Bytes needed to store the code table plus `histo` encoded with it.
    pub fn compute_compressed_size(&self, histo: &[u32]) -> Option<usize> {
        let mut num_bits = 0u64;
        let mut num_elem = 0u64;
        for (&count, &(len, _)) in histo.iter().zip(&self.code_table) {
            num_bits += count as u64 * len as u64;
            num_elem += count as u64;
        }
        if num_elem == 0 {
            return None;
        }
        let num_words = num_bits.div_ceil(32) as usize + 1;
        Some(4 * num_words + self.num_bytes_code_table().ok()?)
    }

    /// Append the code table.
    pub fn write_code_table(&self, out: &mut Vec<u8>, lerc2_version: i32) -> Result<()> {
        let (i0, i1, _) = self.get_range()?;
        let size = self.code_table.len();

        for v in [HUFFMAN_VERSION, size as i32, i0 as i32, i1 as i32] {
            out.extend_from_slice(&v.to_le_bytes());
        }

        let lengths: Vec<u32> = (i0..i1)
            .map(|i| self.code_table[wrap(i, size)].0 as u32)
            .collect();
        bitstuffer::encode_simple(out, &lengths, lerc2_version)?;

        let mut writer = WordWriter::default();
        for i in i0..i1 {
            let (len, code) = self.code_table[wrap(i, size)];
            if len > 0 {
                writer.push(code, len as u32);
            }
        }
        writer.finish(out, false);
        Ok(())
    }

    /// Read a code table and prepare it for decoding.
    pub fn read_code_table(cursor: &mut ByteCursor<'_>, lerc2_version: i32) -> Result<Huffman> {
        let version = cursor.read_i32()?;
        let size = cursor.read_i32()?;
        let i0 = cursor.read_i32()?;
        let i1 = cursor.read_i32()?;

        if !(MIN_HUFFMAN_VERSION..=HUFFMAN_VERSION).contains(&version) {
            return Err(LercError::failed(format!(
                "unsupported huffman version {version}"
            )));
        }
        if i0 >= i1 || i0 < 0 || size <= 0 || size as usize > MAX_HISTO_SIZE {
            return Err(LercError::failed(format!(
                "bad huffman range [{i0}, {i1}) of {size}"
            )));
        }
        let (size, i0, i1) = (size as usize, i0 as usize, i1 as usize);
        if wrap(i0, size) >= size || wrap(i1 - 1, size) >= size {
            return Err(LercError::failed("huffman range out of table"));
        }

        let lengths = bitstuffer::decode(cursor, i1 - i0, lerc2_version)?;
        if lengths.len() != i1 - i0 {
            return Err(LercError::failed("huffman code length count mismatch"));
        }

        let mut code_table = vec![(0u16, 0u32); size];
        for (i, &len) in (i0..i1).zip(&lengths) {
            if len > MAX_CODE_LENGTH {
                return Err(LercError::failed(format!("huffman code length {len}")));
            }
            code_table[wrap(i, size)].0 = len as u16;
        }

        let mut reader = WordReader::new(cursor.rest());
        for i in i0..i1 {
            let entry = &mut code_table[wrap(i, size)];
            if entry.0 > 0 {
                entry.1 = reader.read_bits(entry.0 as u32)?;
            }
        }
        cursor.skip(reader.bytes_consumed(false))?;

        let mut huffman = Huffman {
            code_table,
            ..Huffman::default()
        };
        huffman.build_tree_from_codes()?;
        Ok(huffman)
    }

    /// Build the decode lookup table and, if needed, the tree for long codes.
    fn build_tree_from_codes(&mut self) -> Result<()> {
        let (i0, i1, max_len) = self.get_range()?;
        let size = self.code_table.len();
        let need_tree = max_len > MAX_NUM_BITS_LUT;
        let num_bits_lut = max_len.min(MAX_NUM_BITS_LUT);

        let mut decode_lut = vec![None; 1 << num_bits_lut];
        let mut min_num_zero_bits = MAX_CODE_LENGTH;

        for i in i0..i1 {
            let k = wrap(i, size);
            let (len, code) = self.code_table[k];
            let len = len as u32;
            if len == 0 {
                continue;
            }
            if len <= num_bits_lut {
                let shift = num_bits_lut - len;
                let first = (code << shift) as usize;
                let entry = Some((len as u8, k as u16));
                // a corrupt code may not fit in its length
                let end = (first + (1 << shift)).min(decode_lut.len());
                if first < end {
                    decode_lut[first..end].fill(entry);
                }
            } else {
                // long canonical codes start with zeros
                let significant = 32 - code.leading_zeros().min(31);
                min_num_zero_bits = min_num_zero_bits.min(len.saturating_sub(significant));
            }
        }

        self.decode_lut = decode_lut;
        self.num_bits_lut = num_bits_lut;
        self.tree.clear();
        self.num_bits_to_skip_in_tree = 0;
        if !need_tree {
            return Ok(());
        }
        self.num_bits_to_skip_in_tree = min_num_zero_bits;

        self.tree.push(TreeNode::default());
        for i in i0..i1 {
            let k = wrap(i, size);
            let (len, code) = self.code_table[k];
            let len = len as u32;
            if len <= num_bits_lut {
                continue;
            }

            let mut node = 0usize;
            for j in (0..len - self.num_bits_to_skip_in_tree).rev() {
                let bit = ((code >> j) & 1) as usize;
                node = match self.tree[node].children[bit] {
                    Some(child) => child as usize,
                    None => {
                        let child = self.tree.len();
                        self.tree.push(TreeNode::default());
                        self.tree[node].children[bit] = Some(child as u32);
                        child
                    }
                };
            }
            self.tree[node].value = Some(k as u16);
        }
        Ok(())
    }

    /// Decode one symbol.
    pub fn decode_one_value(&self, reader: &mut WordReader<'_>) -> Result<u32> {
        let bits = reader.peek_bits(self.num_bits_lut)?;
        if let Some((len, value)) = self.decode_lut.get(bits as usize).copied().flatten() {
            reader.advance(len as u32);
            return Ok(value as u32);
        }

        if self.tree.is_empty() {
            return Err(LercError::failed("invalid huffman code"));
        }
        reader.advance(self.num_bits_to_skip_in_tree);

        let mut node = 0usize;
        loop {
            let bit = reader.read_bits(1)? as usize;
            node = self.tree[node].children[bit]
                .ok_or_else(|| LercError::failed("invalid huffman code"))? as usize;
            if let Some(value) = self.tree[node].value {
                return Ok(value as u32);
            }
        }
    }
}

/// Packs codes MSB first into 32-bit words.
#[derive(Debug, Default)]
pub struct WordWriter {
    words: Vec<u32>,
    bit_pos: u32,
}

impl WordWriter {
    /// Append the low `len` bits of `code`, `1 <= len <= 32`.
    pub fn push(&mut self, code: u32, len: u32) {
        if self.bit_pos == 0 {
            self.words.push(0);
        }
        let free = 32 - self.bit_pos;
        let last = self.words.len() - 1;
        if free >= len {
            self.words[last] |= ((code as u64) << (free - len)) as u32;
            self.bit_pos += len;
            if self.bit_pos == 32 {
                self.bit_pos = 0;
            }
        } else {
            let spill = len - free;
            self.words[last] |= code >> spill;
            self.words.push(((code as u64) << (32 - spill)) as u32);
            self.bit_pos = spill;
        }
    }

    /// Write the words as little-endian bytes, plus one zero word if `extra_word`.
    pub fn finish(self, out: &mut Vec<u8>, extra_word: bool) {
        for w in &self.words {
            out.extend_from_slice(&w.to_le_bytes());
        }
        if extra_word {
            out.extend_from_slice(&[0; 4]);
        }
    }
}

/// Reads MSB-first bits from little-endian 32-bit words.
#[derive(Debug)]
pub struct WordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    bit_pos: u32,
}

impl<'a> WordReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        WordReader {
            bytes,
            pos: 0,
            bit_pos: 0,
        }
    }

    fn word(&self, at: usize) -> Result<u32> {
        let available = self.bytes.len().saturating_sub(at);
        match self.bytes.get(at..at + 4) {
            Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            None => Err(LercError::UnexpectedEof {
                needed: 4,
                available,
            }),
        }
    }

    /// The next `n` bits (`1 <= n <= 32`) without consuming them.
    pub fn peek_bits(&self, n: u32) -> Result<u32> {
        let hi = self.word(self.pos)? as u64;
        let lo = if self.bit_pos + n > 32 {
            self.word(self.pos + 4)? as u64
        } else {
            0
        };
        let window = (hi << 32) | lo;
        Ok(((window << self.bit_pos) >> (64 - n)) as u32)
    }

    /// Skip `n` bits.
    pub fn advance(&mut self, n: u32) {
        let bits = self.bit_pos + n;
        self.pos += 4 * (bits / 32) as usize;
        self.bit_pos = bits % 32;
    }

    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        let v = self.peek_bits(n)?;
        self.advance(n);
        Ok(v)
    }

    /// Bytes covered by the words read so far, plus one word if `extra_word`.
    pub fn bytes_consumed(&self, extra_word: bool) -> usize {
        self.pos + if self.bit_pos > 0 { 4 } else { 0 } + if extra_word { 4 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fibonacci_histo(n: usize) -> Vec<u32> {
        let mut histo = vec![0u32; 256];
        let (mut a, mut b) = (1u32, 1u32);
        for slot in histo.iter_mut().take(n) {
            *slot = a;
            let c = a + b;
            a = b;
            b = c;
        }
        histo
    }

    fn encode_symbols(huffman: &Huffman, symbols: &[usize]) -> Vec<u8> {
        let mut writer = WordWriter::default();
        for &s in symbols {
            let (len, code) = huffman.codes()[s];
            writer.push(code, len as u32);
        }
        let mut out = Vec::new();
        writer.finish(&mut out, true);
        out
    }

    fn expand(histo: &[u32]) -> Vec<usize> {
        let mut symbols = Vec::new();
        for (i, &c) in histo.iter().enumerate() {
            symbols.extend(std::iter::repeat(i).take(c as usize));
        }
        // interleave so decoding does not see long runs of one symbol
        let n = symbols.len();
        (0..n).map(|k| symbols[(k * 7919) % n]).collect()
    }

    fn assert_prefix_free(codes: &[(u16, u32)]) {
        let used: Vec<(u32, u32)> = codes
            .iter()
            .filter(|c| c.0 > 0)
            .map(|&(l, c)| (l as u32, c))
            .collect();
        let kraft: f64 = used.iter().map(|&(l, _)| 0.5f64.powi(l as i32)).sum();
        assert!((kraft - 1.0).abs() < 1e-9, "kraft sum {kraft}");
        for (a, &(la, ca)) in used.iter().enumerate() {
            for (b, &(lb, cb)) in used.iter().enumerate() {
                if a != b && la <= lb {
                    assert_ne!(cb >> (lb - la), ca, "code {a} is a prefix of {b}");
                }
            }
        }
    }

    #[test]
    fn test_needs_two_symbols() {
        assert!(Huffman::compute_codes(&[]).is_none());
        assert!(Huffman::compute_codes(&[0, 0, 0]).is_none());
        assert!(Huffman::compute_codes(&[0, 9, 0]).is_none());
        assert!(Huffman::compute_codes(&[1, 9, 0]).is_some());
    }

    #[test]
    fn test_two_symbols_get_one_bit() {
        let huffman = Huffman::compute_codes(&[0, 3, 0, 5]).unwrap();
        assert_eq!(huffman.codes()[1].0, 1);
        assert_eq!(huffman.codes()[3].0, 1);
        assert_prefix_free(huffman.codes());
    }

    #[test]
    fn test_canonical_codes_are_prefix_free() {
        let mut histo = vec![0u32; 256];
        for (i, slot) in histo.iter_mut().enumerate() {
            *slot = ((i * 37) % 101) as u32;
        }
        let huffman = Huffman::compute_codes(&histo).unwrap();
        assert_prefix_free(huffman.codes());

        // equal lengths get consecutive codes, lower bins first
        let codes = huffman.codes();
        let len = codes[1].0;
        let same: Vec<u32> = codes
            .iter()
            .filter(|c| c.0 == len)
            .map(|c| c.1)
            .collect();
        assert!(same.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_range_wraps_around() {
        let mut histo = vec![0u32; 256];
        for i in [0, 1, 2, 3, 250, 251, 255] {
            histo[i] = 10 + i as u32;
        }
        let huffman = Huffman::compute_codes(&histo).unwrap();
        let (i0, i1, _) = huffman.get_range().unwrap();
        assert_eq!((i0, i1), (250, 260));
    }

    #[test]
    fn test_range_without_wrap() {
        let mut histo = vec![0u32; 256];
        histo[100] = 4;
        histo[110] = 7;
        let huffman = Huffman::compute_codes(&histo).unwrap();
        assert_eq!(huffman.get_range().unwrap(), (100, 111, 1));
    }

    fn roundtrip(histo: &[u32], lerc2_version: i32) {
        let huffman = Huffman::compute_codes(histo).unwrap();
        let symbols = expand(histo);

        let mut blob = Vec::new();
        huffman.write_code_table(&mut blob, lerc2_version).unwrap();
        blob.extend_from_slice(&encode_symbols(&huffman, &symbols));
        assert_eq!(blob.len(), huffman.compute_compressed_size(histo).unwrap());

        let mut cursor = ByteCursor::new(&blob);
        let decoder = Huffman::read_code_table(&mut cursor, lerc2_version).unwrap();
        assert_eq!(decoder.codes(), huffman.codes());

        let mut reader = WordReader::new(cursor.rest());
        for (n, &s) in symbols.iter().enumerate() {
            assert_eq!(decoder.decode_one_value(&mut reader).unwrap(), s as u32, "symbol {n}");
        }
        assert_eq!(reader.bytes_consumed(true), cursor.remaining());
    }

    #[test]
    fn test_roundtrip_short_codes() {
        let mut histo = vec![0u32; 256];
        for (i, slot) in histo.iter_mut().enumerate().skip(40).take(30) {
            *slot = 1 + (i as u32 % 7) * 3;
        }
        roundtrip(&histo, 3);
        roundtrip(&histo, 2);
    }

    #[test]
    fn test_roundtrip_long_codes_use_tree() {
        let histo = fibonacci_histo(20);
        let huffman = Huffman::compute_codes(&histo).unwrap();
        let max_len = huffman.codes().iter().map(|c| c.0).max().unwrap();
        assert!(max_len as u32 > MAX_NUM_BITS_LUT, "max length {max_len}");
        assert_prefix_free(huffman.codes());
        roundtrip(&histo, 4);
    }

    #[test]
    fn test_code_too_long_rejected() {
        // a Fibonacci histogram of 40 bins needs codes longer than 32 bits
        let mut histo = vec![0u32; 40];
        let (mut a, mut b) = (1u64, 1u64);
        for slot in histo.iter_mut() {
            *slot = a.min(u32::MAX as u64) as u32;
            let c = a + b;
            a = b;
            b = c;
        }
        assert!(Huffman::compute_codes(&histo[..34]).is_none());
    }

    #[test]
    fn test_truncated_table_fails() {
        let huffman = Huffman::compute_codes(&fibonacci_histo(16)).unwrap();
        let mut blob = Vec::new();
        huffman.write_code_table(&mut blob, 4).unwrap();
        for cut in 0..blob.len() {
            let mut cursor = ByteCursor::new(&blob[..cut]);
            assert!(Huffman::read_code_table(&mut cursor, 4).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_bad_table_header_rejected() {
        let mut blob = Vec::new();
        for v in [4i32, 256, 10, 10] {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        assert!(Huffman::read_code_table(&mut ByteCursor::new(&blob), 4).is_err());

        blob[..4].copy_from_slice(&1i32.to_le_bytes());
        assert!(Huffman::read_code_table(&mut ByteCursor::new(&blob), 4).is_err());
    }

    #[test]
    fn test_word_writer_layout() {
        let mut writer = WordWriter::default();
        writer.push(0b1, 1);
        writer.push(0b01, 2);
        writer.push(0x1FFF_FFFF, 30);
        let mut out = Vec::new();
        writer.finish(&mut out, true);
        assert_eq!(out.len(), 12);
        assert_eq!(u32::from_le_bytes(out[0..4].try_into().unwrap()), 0xAFFF_FFFF);
        assert_eq!(u32::from_le_bytes(out[4..8].try_into().unwrap()), 0x8000_0000);

        let mut reader = WordReader::new(&out);
        assert_eq!(reader.read_bits(1).unwrap(), 1);
        assert_eq!(reader.read_bits(2).unwrap(), 1);
        assert_eq!(reader.read_bits(30).unwrap(), 0x1FFF_FFFF);
        assert_eq!(reader.bytes_consumed(false), 8);
    }

    #[test]
    fn test_reader_eof() {
        let bytes = [0u8; 4];
        let mut reader = WordReader::new(&bytes);
        assert!(reader.peek_bits(12).is_ok());
        reader.advance(28);
        assert!(reader.peek_bits(8).is_err());
    }
}
