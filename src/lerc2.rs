//! Encoding and decoding of a single band blob.
//!
//! After the header a blob holds:
//!
//! 1. `i32` byte count of the RLE-compressed mask, then the mask itself. The
//!    count is 0 if all or no pixels are valid, or if the mask is shared with
//!    an earlier band.
//! 2. For version 4, the per-dimension minima then maxima (as `T`).
//! 3. A one-sweep flag. If set, the valid values follow uncompressed.
//! 4. Otherwise, for lossless 8-bit data, an image encode mode byte, then
//!    either a Huffman code table and bit stream or the tiles.
//!
//! Sections 2 through 4 are omitted for empty and constant images.
//!
//! Each tile and dimension starts with a flag byte: bits 0-1 pick raw,
//! bit stuffed, constant zero or constant minimum; bits 2-5 repeat bits 3-6
//! of the tile's first column; bits 6-7 select the type of the stored minimum.

use log::{debug, trace};

use crate::bitmask::BitMask;
use crate::bitstuffer;
use crate::checksum::fletcher32;
use crate::cursor::ByteCursor;
use crate::data_type::{DataType, LercType};
use crate::error::LercError;
use crate::header::{
    HeaderInfo, CHECKSUM_OFFSET, CHECKSUM_START, CURRENT_VERSION, MAX_MICRO_BLOCK_SIZE,
    MIN_ENCODE_VERSION,
};
use crate::huffman::{Huffman, WordReader, WordWriter};
use crate::quantize::{self, LOSSLESS_INT_ERROR};
use crate::rle;
use crate::Result;

/// Tile edge used unless configured otherwise.
pub const DEFAULT_MICRO_BLOCK_SIZE: i32 = 8;

const TILE_RAW: u8 = 0;
const TILE_STUFFED: u8 = 1;
const TILE_CONST_ZERO: u8 = 2;
const TILE_CONST: u8 = 3;

/// How the data section of a blob is coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncodeMode {
    Tiling = 0,
    DeltaHuffman = 1,
    Huffman = 2,
}

impl ImageEncodeMode {
    fn from_byte(b: u8, version: i32) -> Result<Self> {
        match b {
            0 => Ok(ImageEncodeMode::Tiling),
            1 => Ok(ImageEncodeMode::DeltaHuffman),
            2 if version >= 4 => Ok(ImageEncodeMode::Huffman),
            _ => Err(LercError::failed(format!(
                "bad image encode mode {b} for version {version}"
            ))),
        }
    }
}

/// Encoder settings for one band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeOptions {
    pub version: i32,
    pub micro_block_size: i32,
    pub max_z_error: f64,
}

impl EncodeOptions {
    fn validate(&self, n_dim: usize) -> Result<()> {
        if !(MIN_ENCODE_VERSION..=CURRENT_VERSION).contains(&self.version) {
            return Err(LercError::wrong_param(format!(
                "cannot encode version {}",
                self.version
            )));
        }
        if n_dim > 1 && self.version < 4 {
            return Err(LercError::wrong_param(
                "more than one value per pixel needs version 4",
            ));
        }
        if self.micro_block_size <= 0 || 2 * self.micro_block_size > MAX_MICRO_BLOCK_SIZE {
            return Err(LercError::wrong_param(format!(
                "bad micro block size {}",
                self.micro_block_size
            )));
        }
        if !self.max_z_error.is_finite() || self.max_z_error < 0.0 {
            return Err(LercError::wrong_param(format!(
                "bad max z error {}",
                self.max_z_error
            )));
        }
        Ok(())
    }
}

/// One band of pixels to encode.
#[derive(Debug, Clone, Copy)]
pub struct Band<'a, T> {
    /// `n_dim * n_cols * n_rows` values, pixel-interleaved.
    pub data: &'a [T],
    pub n_dim: usize,
    pub n_cols: usize,
    pub n_rows: usize,
    pub mask: &'a BitMask,
    /// Whether this blob carries the mask. False for bands after the first.
    pub encode_mask: bool,
}

impl<T: LercType> Band<'_, T> {
    fn num_pixels(&self) -> usize {
        self.n_cols * self.n_rows
    }

    fn validate(&self) -> Result<()> {
        if self.n_dim == 0 || self.n_cols == 0 || self.n_rows == 0 {
            return Err(LercError::wrong_param("raster dimensions must be positive"));
        }
        let num_values = self
            .n_dim
            .checked_mul(self.n_cols)
            .and_then(|v| v.checked_mul(self.n_rows))
            .filter(|&v| v <= i32::MAX as usize)
            .ok_or_else(|| LercError::wrong_param("raster too large"))?;
        if self.data.len() != num_values {
            return Err(LercError::wrong_param(format!(
                "expected {num_values} values, got {}",
                self.data.len()
            )));
        }
        if self.mask.width() != self.n_cols || self.mask.height() != self.n_rows {
            return Err(LercError::wrong_param(format!(
                "mask is {} x {}, raster is {} x {}",
                self.mask.width(),
                self.mask.height(),
                self.n_cols,
                self.n_rows
            )));
        }
        Ok(())
    }

    /// Fail on the first non-finite value at a valid pixel.
    fn check_finite(&self) -> Result<()> {
        if T::DATA_TYPE.is_integer() {
            return Ok(());
        }
        for k in (0..self.num_pixels()).filter(|&k| self.mask.is_valid(k)) {
            let m0 = k * self.n_dim;
            if let Some(d) = self.data[m0..m0 + self.n_dim]
                .iter()
                .position(|v| !v.is_finite())
            {
                return Err(LercError::NaN { index: m0 + d });
            }
        }
        Ok(())
    }
}

/// Coding picked for the data section.
enum DataSection {
    OneSweep,
    Tiles {
        micro_block_size: i32,
        bytes: Vec<u8>,
    },
    Huffman {
        mode: ImageEncodeMode,
        huffman: Huffman,
        num_bytes: usize,
    },
}

/// A fully measured blob, minus the header bytes.
struct BandPlan {
    header: HeaderInfo,
    body: Vec<u8>,
}

/// Exact size of the blob [`encode`] would produce.
pub fn compute_num_bytes_needed_to_write<T: LercType>(
    band: &Band<'_, T>,
    opts: &EncodeOptions,
) -> Result<usize> {
    Ok(plan_band(band, opts)?.header.blob_size as usize)
}

/// Encode one band into a blob.
pub fn encode<T: LercType>(band: &Band<'_, T>, opts: &EncodeOptions) -> Result<Vec<u8>> {
    let BandPlan { header, body } = plan_band(band, opts)?;

    let mut blob = Vec::with_capacity(header.blob_size as usize);
    header.write(&mut blob);
    blob.extend_from_slice(&body);
    if blob.len() != header.blob_size as usize {
        return Err(LercError::failed(format!(
            "wrote {} bytes, planned {}",
            blob.len(),
            header.blob_size
        )));
    }

    if header.version >= 3 {
        let checksum = fletcher32(&blob[CHECKSUM_START..]);
        blob[CHECKSUM_OFFSET..CHECKSUM_START].copy_from_slice(&checksum.to_le_bytes());
    }
    trace!("encoded band blob of {} bytes", blob.len());
    Ok(blob)
}

fn plan_band<T: LercType>(band: &Band<'_, T>, opts: &EncodeOptions) -> Result<BandPlan> {
    band.validate()?;
    opts.validate(band.n_dim)?;
    band.check_finite()?;

    let dt = T::DATA_TYPE;
    let max_z_error = if dt.is_integer() {
        opts.max_z_error.floor().max(LOSSLESS_INT_ERROR)
    } else {
        opts.max_z_error
    };

    let num_valid = band.mask.count_valid_bits();
    let mut hd = HeaderInfo {
        version: opts.version,
        checksum: 0,
        n_rows: band.n_rows as i32,
        n_cols: band.n_cols as i32,
        n_dim: band.n_dim as i32,
        num_valid_pixel: num_valid as i32,
        micro_block_size: opts.micro_block_size,
        blob_size: 0,
        data_type: dt,
        max_z_error,
        z_min: 0.0,
        z_max: 0.0,
    };

    let mut body = Vec::new();
    write_mask(&mut body, band, num_valid)?;
    if num_valid == 0 {
        debug!("band has no valid pixels");
        return finish_plan(hd, body);
    }

    let (z_min_vec, z_max_vec) = compute_min_max_ranges(band);
    hd.z_min = z_min_vec
        .iter()
        .map(|v| v.to_f64())
        .fold(f64::INFINITY, f64::min);
    hd.z_max = z_max_vec
        .iter()
        .map(|v| v.to_f64())
        .fold(f64::NEG_INFINITY, f64::max);
    if hd.z_min == hd.z_max {
        debug!("band is constant {}", hd.z_min);
        return finish_plan(hd, body);
    }

    if hd.version >= 4 {
        for v in z_min_vec.iter().chain(&z_max_vec) {
            v.write_le(&mut body);
        }
        if z_min_vec == z_max_vec {
            debug!("band is constant per dimension");
            return finish_plan(hd, body);
        }
    }

    match choose_data_section(band, &hd, num_valid)? {
        DataSection::OneSweep => {
            debug!("writing {num_valid} valid pixels in one sweep");
            body.push(1);
            write_data_one_sweep(&mut body, band);
        }
        DataSection::Tiles {
            micro_block_size,
            bytes,
        } => {
            debug!("writing tiles of {micro_block_size} pixels, {} bytes", bytes.len());
            hd.micro_block_size = micro_block_size;
            body.push(0);
            if hd.try_huffman() {
                body.push(ImageEncodeMode::Tiling as u8);
            }
            body.extend_from_slice(&bytes);
        }
        DataSection::Huffman {
            mode,
            huffman,
            num_bytes,
        } => {
            debug!("writing {mode:?}, {num_bytes} bytes");
            body.push(0);
            body.push(mode as u8);
            let start = body.len();
            encode_huffman(&mut body, band, mode, &huffman, hd.version)?;
            if body.len() - start != num_bytes {
                return Err(LercError::failed(format!(
                    "huffman stream is {} bytes, planned {num_bytes}",
                    body.len() - start
                )));
            }
        }
    }

    finish_plan(hd, body)
}

fn finish_plan(mut header: HeaderInfo, body: Vec<u8>) -> Result<BandPlan> {
    let blob_size = HeaderInfo::num_bytes(header.version) + body.len();
    header.blob_size = i32::try_from(blob_size)
        .map_err(|_| LercError::failed(format!("blob of {blob_size} bytes is too large")))?;
    Ok(BandPlan { header, body })
}

fn write_mask<T: LercType>(out: &mut Vec<u8>, band: &Band<'_, T>, num_valid: usize) -> Result<()> {
    let need_mask = num_valid > 0 && num_valid < band.num_pixels();
    if !(need_mask && band.encode_mask) {
        out.extend_from_slice(&0i32.to_le_bytes());
        return Ok(());
    }

    let rle = rle::compress(band.mask.bits());
    let num_bytes = i32::try_from(rle.len())
        .map_err(|_| LercError::failed("compressed mask too large"))?;
    out.extend_from_slice(&num_bytes.to_le_bytes());
    out.extend_from_slice(&rle);
    Ok(())
}

/// Per-dimension minimum and maximum over the valid pixels.
fn compute_min_max_ranges<T: LercType>(band: &Band<'_, T>) -> (Vec<T>, Vec<T>) {
    let n_dim = band.n_dim;
    let mut z_min: Vec<T> = Vec::new();
    let mut z_max: Vec<T> = Vec::new();

    for k in (0..band.num_pixels()).filter(|&k| band.mask.is_valid(k)) {
        let pixel = &band.data[k * n_dim..(k + 1) * n_dim];
        if z_min.is_empty() {
            z_min.extend_from_slice(pixel);
            z_max.extend_from_slice(pixel);
            continue;
        }
        for (d, &v) in pixel.iter().enumerate() {
            if v < z_min[d] {
                z_min[d] = v;
            } else if v > z_max[d] {
                z_max[d] = v;
            }
        }
    }
    (z_min, z_max)
}

fn choose_data_section<T: LercType>(
    band: &Band<'_, T>,
    hd: &HeaderInfo,
    num_valid: usize,
) -> Result<DataSection> {
    let one_sweep_bytes = num_valid * band.n_dim * hd.data_type.size();

    let mb = hd.micro_block_size;
    let tiles = write_tiles(band, hd, mb as usize)?;
    let n_bytes_tiling = tiles.len();
    let mut n_bytes_data = n_bytes_tiling;
    let mut section = DataSection::Tiles {
        micro_block_size: mb,
        bytes: tiles,
    };

    let mut n_bytes_huffman = 0;
    if hd.try_huffman() {
        if let Some((mode, huffman, num_bytes)) = compute_huffman_codes(band, hd.version) {
            trace!("tiling {n_bytes_tiling} bytes, {mode:?} {num_bytes} bytes");
            n_bytes_huffman = num_bytes;
            if num_bytes < n_bytes_data {
                n_bytes_data = num_bytes;
                section = DataSection::Huffman {
                    mode,
                    huffman,
                    num_bytes,
                };
            }
        }
    }

    // below 2 bits per value the per-tile overhead matters, so try larger tiles
    let low_bit_rate = n_bytes_tiling * 8 < band.num_pixels() * band.n_dim * 2;
    if low_bit_rate && (n_bytes_huffman == 0 || n_bytes_tiling < 2 * n_bytes_huffman) {
        let tiles = write_tiles(band, hd, 2 * mb as usize)?;
        trace!("tiles of {mb}: {n_bytes_tiling} bytes, of {}: {} bytes", 2 * mb, tiles.len());
        if tiles.len() <= n_bytes_data {
            n_bytes_data = tiles.len();
            section = DataSection::Tiles {
                micro_block_size: 2 * mb,
                bytes: tiles,
            };
        }
    }

    if one_sweep_bytes <= n_bytes_data {
        return Ok(DataSection::OneSweep);
    }
    Ok(section)
}

fn write_data_one_sweep<T: LercType>(out: &mut Vec<u8>, band: &Band<'_, T>) {
    let n_dim = band.n_dim;
    for k in (0..band.num_pixels()).filter(|&k| band.mask.is_valid(k)) {
        for &v in &band.data[k * n_dim..(k + 1) * n_dim] {
            v.write_le(out);
        }
    }
}

/// Tile statistics over the valid pixels of one dimension.
struct TileStats<T> {
    z_min: T,
    z_max: T,
    try_lut: bool,
}

/// Collect the valid values of one tile and dimension into `values`.
fn get_valid_data_and_stats<T: LercType>(
    band: &Band<'_, T>,
    rows: std::ops::Range<usize>,
    cols: std::ops::Range<usize>,
    i_dim: usize,
    values: &mut Vec<T>,
) -> TileStats<T> {
    values.clear();
    let mut z_min = T::default();
    let mut z_max = T::default();
    let mut prev = T::default();
    let mut cnt_same_val = 0usize;

    for i in rows {
        for j in cols.clone() {
            let k = i * band.n_cols + j;
            if !band.mask.is_valid(k) {
                continue;
            }
            let val = band.data[k * band.n_dim + i_dim];
            if values.is_empty() {
                z_min = val;
                z_max = val;
            } else {
                if val < z_min {
                    z_min = val;
                } else if val > z_max {
                    z_max = val;
                }
                if val == prev {
                    cnt_same_val += 1;
                }
            }
            prev = val;
            values.push(val);
        }
    }

    TileStats {
        z_min,
        z_max,
        try_lut: z_min < z_max && 2 * cnt_same_val > values.len(),
    }
}

fn write_tiles<T: LercType>(band: &Band<'_, T>, hd: &HeaderInfo, mb_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut values = Vec::with_capacity(mb_size * mb_size);
    let mut quant = Vec::with_capacity(mb_size * mb_size);

    for i0 in (0..band.n_rows).step_by(mb_size) {
        let i1 = (i0 + mb_size).min(band.n_rows);
        for j0 in (0..band.n_cols).step_by(mb_size) {
            let j1 = (j0 + mb_size).min(band.n_cols);
            for i_dim in 0..band.n_dim {
                let stats = get_valid_data_and_stats(band, i0..i1, j0..j1, i_dim, &mut values);
                write_tile(&mut out, &values, &stats, j0, hd, &mut quant)?;
            }
        }
    }
    Ok(out)
}

#[inline]
fn integrity_bits(j0: usize) -> u8 {
    (((j0 >> 3) & 15) << 2) as u8
}

fn write_tile<T: LercType>(
    out: &mut Vec<u8>,
    values: &[T],
    stats: &TileStats<T>,
    j0: usize,
    hd: &HeaderInfo,
    quant: &mut Vec<u32>,
) -> Result<()> {
    let integrity = integrity_bits(j0);
    let n = values.len();
    let z_min = stats.z_min.to_f64();
    let z_max = stats.z_max.to_f64();

    if n == 0 || (z_min == 0.0 && z_max == 0.0) {
        out.push(TILE_CONST_ZERO | integrity);
        return Ok(());
    }

    let dt = hd.data_type;
    let e = hd.max_z_error;
    let num_bytes_raw = 1 + n * dt.size();
    let max_val = quantize::compute_max_val(z_min, z_max, e);
    let store_raw = (e == 0.0 && z_max > z_min) || max_val > dt.max_val_to_quantize() as f64;

    if !store_raw {
        let (tc, dt_reduced) = quantize::type_code(dt, z_min);
        let max_elem = (max_val + 0.5) as u32;
        let mut num_bytes = 1 + dt_reduced.size();
        let mut lut: Option<Vec<(u32, u32)>> = None;

        if max_elem > 0 {
            quantize::quantize(values, stats.z_min, e, quant);
            if stats.try_lut {
                let sorted = quantize::sort_quant_array(quant);
                let (nb, do_lut) = bitstuffer::compute_num_bytes_needed_lut(&sorted);
                num_bytes += nb;
                if do_lut {
                    lut = Some(sorted);
                }
            } else {
                num_bytes += bitstuffer::compute_num_bytes_needed_simple(n as u32, max_elem);
            }
        }

        if num_bytes < num_bytes_raw {
            let mode = if max_elem == 0 { TILE_CONST } else { TILE_STUFFED };
            out.push(mode | integrity | (tc << 6));
            dt_reduced.write_value(out, z_min);
            if max_elem > 0 {
                match lut {
                    Some(sorted) => bitstuffer::encode_lut(out, &sorted, hd.version)?,
                    None => bitstuffer::encode_simple(out, quant, hd.version)?,
                }
            }
            return Ok(());
        }
    }

    out.push(TILE_RAW | integrity);
    for &v in values {
        v.write_le(out);
    }
    Ok(())
}

#[inline]
fn huffman_offset(dt: DataType) -> i32 {
    if dt == DataType::Char {
        128
    } else {
        0
    }
}

/// Visit the Huffman bin of every coded value, in stream order.
///
/// Direct mode walks pixels and their dimensions in memory order. Delta mode
/// walks one dimension at a time and codes each value minus its left
/// neighbor, or its upper neighbor at the start of a row segment.
fn for_each_huffman_bin<T: LercType>(
    band: &Band<'_, T>,
    mode: ImageEncodeMode,
    mut f: impl FnMut(usize),
) {
    let offset = huffman_offset(T::DATA_TYPE);
    let bin = |v: T| (v.to_f64() as i32 + offset) as usize;
    let (n_dim, n_cols) = (band.n_dim, band.n_cols);
    let (data, mask) = (band.data, band.mask);

    if mode == ImageEncodeMode::DeltaHuffman {
        for i_dim in 0..n_dim {
            let mut prev = T::default();
            for i in 0..band.n_rows {
                for j in 0..n_cols {
                    let k = i * n_cols + j;
                    if !mask.is_valid(k) {
                        continue;
                    }
                    let m = k * n_dim + i_dim;
                    let val = data[m];
                    let pred = if j > 0 && mask.is_valid(k - 1) {
                        prev
                    } else if i > 0 && mask.is_valid(k - n_cols) {
                        data[m - n_cols * n_dim]
                    } else {
                        prev
                    };
                    f(bin(val.wrapping_sub(pred)));
                    prev = val;
                }
            }
        }
    } else {
        for k in (0..band.num_pixels()).filter(|&k| mask.is_valid(k)) {
            for &v in &data[k * n_dim..(k + 1) * n_dim] {
                f(bin(v));
            }
        }
    }
}

/// Pick the cheaper of direct and delta Huffman coding, if either applies.
/// Delta wins ties.
fn compute_huffman_codes<T: LercType>(
    band: &Band<'_, T>,
    version: i32,
) -> Option<(ImageEncodeMode, Huffman, usize)> {
    let candidate = |mode: ImageEncodeMode| {
        let mut histo = vec![0u32; 256];
        for_each_huffman_bin(band, mode, |bin| {
            if let Some(c) = histo.get_mut(bin) {
                *c += 1;
            }
        });
        let huffman = Huffman::compute_codes(&histo)?;
        let num_bytes = huffman.compute_compressed_size(&histo)?;
        Some((mode, huffman, num_bytes))
    };

    let direct = if version >= 4 {
        candidate(ImageEncodeMode::Huffman)
    } else {
        None
    };
    let delta = candidate(ImageEncodeMode::DeltaHuffman);

    match (direct, delta) {
        (Some(a), Some(b)) => Some(if a.2 < b.2 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn encode_huffman<T: LercType>(
    out: &mut Vec<u8>,
    band: &Band<'_, T>,
    mode: ImageEncodeMode,
    huffman: &Huffman,
    version: i32,
) -> Result<()> {
    huffman.write_code_table(out, version)?;

    let codes = huffman.codes();
    let mut writer = WordWriter::default();
    let mut missing = false;
    for_each_huffman_bin(band, mode, |bin| match codes.get(bin) {
        Some(&(len, code)) if len > 0 => writer.push(code, len as u32),
        _ => missing = true,
    });
    if missing {
        return Err(LercError::failed("value without huffman code"));
    }
    writer.finish(out, true);
    Ok(())
}

/// Read and validate the header of the blob at the start of `blob`.
///
/// Fails if `blob` is shorter than the blob size the header declares.
pub fn get_blob_info(blob: &[u8]) -> Result<HeaderInfo> {
    let hd = HeaderInfo::read(&mut ByteCursor::new(blob))?;
    if hd.blob_size as usize > blob.len() {
        return Err(LercError::UnexpectedEof {
            needed: hd.blob_size as usize,
            available: blob.len(),
        });
    }
    Ok(hd)
}

/// Decode the blob at the start of `blob` into `out`.
///
/// `prev_mask` is the mask of the previous band, used when this blob does not
/// carry its own. Returns the header and the mask of this band.
pub fn decode<T: LercType>(
    blob: &[u8],
    prev_mask: Option<&BitMask>,
    out: &mut [T],
) -> Result<(HeaderInfo, BitMask)> {
    let hd = get_blob_info(blob)?;
    let blob = &blob[..hd.blob_size as usize];

    if hd.version >= 3 {
        let computed = fletcher32(&blob[CHECKSUM_START..]);
        if computed != hd.checksum {
            debug!(
                "checksum mismatch: stored {:#010x}, computed {computed:#010x}",
                hd.checksum
            );
            return Err(LercError::ChecksumMismatch {
                stored: hd.checksum,
                computed,
            });
        }
    }

    if hd.data_type != T::DATA_TYPE {
        return Err(LercError::wrong_param(format!(
            "blob holds {:?}, requested {:?}",
            hd.data_type,
            T::DATA_TYPE
        )));
    }
    let n_dim = hd.n_dim as usize;
    if out.len() != hd.num_pixels() * n_dim {
        return Err(LercError::wrong_param(format!(
            "output holds {} values, blob has {}",
            out.len(),
            hd.num_pixels() * n_dim
        )));
    }

    let mut cursor = ByteCursor::new(blob);
    cursor.skip(HeaderInfo::num_bytes(hd.version))?;
    let mask = read_mask(&mut cursor, &hd, prev_mask)?;

    out.fill(T::default());
    if hd.num_valid_pixel == 0 {
        return Ok((hd, mask));
    }

    let mut z_max_dims = vec![hd.z_max; n_dim];
    if hd.z_min == hd.z_max {
        fill_const_image(out, &mask, &vec![T::from_f64(hd.z_min); n_dim]);
        return Ok((hd, mask));
    }

    if hd.version >= 4 {
        let z_min_vec: Vec<T> = (0..n_dim)
            .map(|_| T::read_le(&mut cursor))
            .collect::<Result<_>>()?;
        let z_max_vec: Vec<T> = (0..n_dim)
            .map(|_| T::read_le(&mut cursor))
            .collect::<Result<_>>()?;
        if z_min_vec == z_max_vec {
            fill_const_image(out, &mask, &z_min_vec);
            return Ok((hd, mask));
        }
        z_max_dims = z_max_vec.iter().map(|v| v.to_f64()).collect();
    }

    let one_sweep = cursor.read_u8()? != 0;
    if one_sweep {
        for k in (0..hd.num_pixels()).filter(|&k| mask.is_valid(k)) {
            for v in &mut out[k * n_dim..(k + 1) * n_dim] {
                *v = T::read_le(&mut cursor)?;
            }
        }
        return Ok((hd, mask));
    }

    let mode = if hd.try_huffman() {
        ImageEncodeMode::from_byte(cursor.read_u8()?, hd.version)?
    } else {
        ImageEncodeMode::Tiling
    };

    match mode {
        ImageEncodeMode::Tiling => read_tiles(&mut cursor, &hd, &mask, &z_max_dims, out)?,
        mode => decode_huffman(&mut cursor, &hd, &mask, mode, out)?,
    }
    Ok((hd, mask))
}

fn read_mask(
    cursor: &mut ByteCursor<'_>,
    hd: &HeaderInfo,
    prev_mask: Option<&BitMask>,
) -> Result<BitMask> {
    let num_bytes = cursor.read_i32()?;
    let num_valid = hd.num_valid_pixel as usize;
    let (n_cols, n_rows) = (hd.n_cols as usize, hd.n_rows as usize);
    let mut mask = BitMask::new(n_cols, n_rows);

    if num_bytes < 0 {
        return Err(LercError::failed(format!("bad mask size {num_bytes}")));
    }
    if num_valid == 0 || num_valid == hd.num_pixels() {
        if num_bytes > 0 {
            return Err(LercError::failed("mask stored for a trivial mask"));
        }
        if num_valid > 0 {
            mask.set_all_valid();
        }
        return Ok(mask);
    }

    if num_bytes > 0 {
        let bytes = cursor.read_bytes(num_bytes as usize)?;
        rle::decompress(&mut ByteCursor::new(bytes), mask.bits_mut())?;
    } else {
        match prev_mask {
            Some(prev) if prev.width() == n_cols && prev.height() == n_rows => {
                mask = prev.clone();
            }
            _ => return Err(LercError::failed("blob refers to a missing mask")),
        }
    }

    if mask.count_valid_bits() != num_valid {
        return Err(LercError::failed(format!(
            "mask has {} valid pixels, header says {num_valid}",
            mask.count_valid_bits()
        )));
    }
    Ok(mask)
}

fn fill_const_image<T: LercType>(out: &mut [T], mask: &BitMask, values: &[T]) {
    let n_dim = values.len();
    for k in (0..mask.num_pixels()).filter(|&k| mask.is_valid(k)) {
        out[k * n_dim..(k + 1) * n_dim].copy_from_slice(values);
    }
}

fn read_tiles<T: LercType>(
    cursor: &mut ByteCursor<'_>,
    hd: &HeaderInfo,
    mask: &BitMask,
    z_max_dims: &[f64],
    out: &mut [T],
) -> Result<()> {
    let mb_size = hd.micro_block_size as usize;
    let (n_rows, n_cols, n_dim) = (hd.n_rows as usize, hd.n_cols as usize, hd.n_dim as usize);
    let mut idx = Vec::with_capacity(mb_size * mb_size);

    for i0 in (0..n_rows).step_by(mb_size) {
        let i1 = (i0 + mb_size).min(n_rows);
        for j0 in (0..n_cols).step_by(mb_size) {
            let j1 = (j0 + mb_size).min(n_cols);
            for (i_dim, &z_max) in z_max_dims.iter().enumerate() {
                idx.clear();
                for i in i0..i1 {
                    for j in j0..j1 {
                        let k = i * n_cols + j;
                        if mask.is_valid(k) {
                            idx.push(k * n_dim + i_dim);
                        }
                    }
                }
                let max_count = (i1 - i0) * (j1 - j0);
                read_tile(cursor, hd, j0, max_count, &idx, z_max, out)?;
            }
        }
    }
    Ok(())
}

/// Decode one tile and dimension into the positions listed in `idx`.
fn read_tile<T: LercType>(
    cursor: &mut ByteCursor<'_>,
    hd: &HeaderInfo,
    j0: usize,
    max_count: usize,
    idx: &[usize],
    z_max: f64,
    out: &mut [T],
) -> Result<()> {
    let flag = cursor.read_u8()?;
    if flag & (15 << 2) != integrity_bits(j0) {
        return Err(LercError::failed(format!(
            "tile integrity check failed at column {j0}"
        )));
    }

    match flag & 3 {
        TILE_CONST_ZERO => {
            for &m in idx {
                out[m] = T::default();
            }
        }
        TILE_RAW => {
            for &m in idx {
                out[m] = T::read_le(cursor)?;
            }
        }
        mode => {
            let dt_used = quantize::data_type_used(hd.data_type, flag >> 6).ok_or_else(|| {
                LercError::failed(format!("bad type code {} for {:?}", flag >> 6, hd.data_type))
            })?;
            let offset = dt_used.read_value(cursor)?;

            if mode == TILE_CONST {
                let v = T::from_f64(offset);
                for &m in idx {
                    out[m] = v;
                }
                return Ok(());
            }

            let quant = bitstuffer::decode(cursor, max_count, hd.version)?;
            // older blobs cannot be trusted to match the mask exactly
            let count_ok = if hd.version > 2 {
                quant.len() == idx.len()
            } else {
                quant.len() >= idx.len()
            };
            if !count_ok {
                return Err(LercError::failed(format!(
                    "tile has {} values for {} valid pixels",
                    quant.len(),
                    idx.len()
                )));
            }

            let inv_scale = 2.0 * hd.max_z_error;
            for (&m, &q) in idx.iter().zip(&quant) {
                out[m] = T::from_f64(quantize::dequantize(offset, q, inv_scale, z_max));
            }
        }
    }
    Ok(())
}

fn decode_huffman<T: LercType>(
    cursor: &mut ByteCursor<'_>,
    hd: &HeaderInfo,
    mask: &BitMask,
    mode: ImageEncodeMode,
    out: &mut [T],
) -> Result<()> {
    let huffman = Huffman::read_code_table(cursor, hd.version)?;
    let offset = huffman_offset(hd.data_type);
    let (n_rows, n_cols, n_dim) = (hd.n_rows as usize, hd.n_cols as usize, hd.n_dim as usize);
    let mut reader = WordReader::new(cursor.rest());
    let mut next_value = |reader: &mut WordReader<'_>| -> Result<T> {
        let val = huffman.decode_one_value(reader)? as i32;
        Ok(T::from_f64((val - offset) as f64))
    };

    if mode == ImageEncodeMode::DeltaHuffman {
        for i_dim in 0..n_dim {
            let mut prev = T::default();
            for i in 0..n_rows {
                for j in 0..n_cols {
                    let k = i * n_cols + j;
                    if !mask.is_valid(k) {
                        continue;
                    }
                    let m = k * n_dim + i_dim;
                    let delta = next_value(&mut reader)?;
                    let pred = if j > 0 && mask.is_valid(k - 1) {
                        prev
                    } else if i > 0 && mask.is_valid(k - n_cols) {
                        out[m - n_cols * n_dim]
                    } else {
                        prev
                    };
                    let val = delta.wrapping_add(pred);
                    out[m] = val;
                    prev = val;
                }
            }
        }
    } else {
        for k in (0..n_rows * n_cols).filter(|&k| mask.is_valid(k)) {
            for v in &mut out[k * n_dim..(k + 1) * n_dim] {
                *v = next_value(&mut reader)?;
            }
        }
    }

    cursor.skip(reader.bytes_consumed(true))
}
