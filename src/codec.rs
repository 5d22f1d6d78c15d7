//! Multi-band encoding and decoding.
//!
//! A raster of `n_bands` bands is stored as one blob per band, concatenated.
//! All bands share one validity mask; only the first blob carries it.
//!
//! Pixel buffers are flat: band after band, each band row-major with the
//! `n_dim` values of a pixel next to each other. Value `d` of pixel
//! `(row, col)` in band `b` sits at
//! `((b * n_rows + row) * n_cols + col) * n_dim + d`.

use log::trace;

use crate::bitmask::BitMask;
use crate::data_type::{DataType, LercType};
use crate::error::LercError;
use crate::header::{HeaderInfo, CURRENT_VERSION, FILE_KEY, MIN_ENCODE_VERSION};
use crate::lerc2::{self, Band, EncodeOptions, DEFAULT_MICRO_BLOCK_SIZE};
use crate::Result;

/// Largest pixel buffer in bytes that [`decode_any`] allocates.
pub const MAX_DECODE_BYTES: usize = 1 << 28;

const MIN_MICRO_BLOCK_SIZE: i32 = 4;
const MAX_CONFIG_MICRO_BLOCK_SIZE: i32 = 16;

/// Dimensions of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterShape {
    /// Values per pixel.
    pub n_dim: usize,
    /// Pixels per row.
    pub n_cols: usize,
    /// Rows per band.
    pub n_rows: usize,
    /// Independent planes, each stored as its own blob.
    pub n_bands: usize,
}

impl RasterShape {
    /// Shape of `n_bands` bands of `n_cols` by `n_rows` pixels with `n_dim` values each.
    pub fn new(n_dim: usize, n_cols: usize, n_rows: usize, n_bands: usize) -> Self {
        RasterShape {
            n_dim,
            n_cols,
            n_rows,
            n_bands,
        }
    }

    /// Number of values in one band. Saturates at `usize::MAX`.
    #[inline]
    pub fn band_len(&self) -> usize {
        self.n_dim
            .saturating_mul(self.n_cols)
            .saturating_mul(self.n_rows)
    }

    /// Number of values in the whole buffer. Saturates at `usize::MAX`.
    #[inline]
    pub fn num_values(&self) -> usize {
        self.band_len().saturating_mul(self.n_bands)
    }

    /// Reject empty shapes and bands too large for a blob header.
    fn validate(&self) -> Result<()> {
        if self.n_dim == 0 || self.n_cols == 0 || self.n_rows == 0 || self.n_bands == 0 {
            return Err(LercError::wrong_param(format!("bad raster shape {self:?}")));
        }
        self.n_dim
            .checked_mul(self.n_cols)
            .and_then(|v| v.checked_mul(self.n_rows))
            .filter(|&v| v <= i32::MAX as usize)
            .and_then(|v| v.checked_mul(self.n_bands))
            .ok_or_else(|| LercError::wrong_param(format!("raster shape {self:?} too large")))?;
        Ok(())
    }

    fn matches(&self, hd: &HeaderInfo) -> bool {
        hd.n_dim as usize == self.n_dim
            && hd.n_cols as usize == self.n_cols
            && hd.n_rows as usize == self.n_rows
    }
}

/// LERC encoder configuration.
///
/// # Example
/// ```
/// use lerc_rs::{LercCodec, RasterShape};
///
/// let shape = RasterShape::new(1, 16, 8, 1);
/// let data: Vec<f32> = (0..128).map(|k| (k as f32 * 0.1).sin()).collect();
///
/// let codec = LercCodec::new(0.001);
/// let blob = codec.encode(&data, &shape, None).unwrap();
///
/// let mut decoded = vec![0f32; data.len()];
/// lerc_rs::decode(&blob, &shape, &mut decoded).unwrap();
/// for (a, b) in data.iter().zip(&decoded) {
///     assert!((a - b).abs() <= 0.001);
/// }
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct LercCodec {
    max_z_error: f64,
    version: i32,
    micro_block_size: i32,
}

impl LercCodec {
    /// Create a codec with the given maximum absolute error per value.
    ///
    /// `0.0` is lossless. For integer types the bound is floored, and
    /// anything below 1 means lossless.
    pub fn new(max_z_error: f64) -> Self {
        LercCodec {
            max_z_error,
            version: CURRENT_VERSION,
            micro_block_size: DEFAULT_MICRO_BLOCK_SIZE,
        }
    }

    /// Target an older format version, 2 through 4.
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Set the tile edge length, 4 through 16. The encoder may still double it.
    pub fn with_micro_block_size(mut self, micro_block_size: i32) -> Self {
        self.micro_block_size = micro_block_size;
        self
    }

    /// Configured error bound, before integer flooring.
    pub fn max_z_error(&self) -> f64 {
        self.max_z_error
    }

    /// Format version to write.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Starting tile edge length.
    pub fn micro_block_size(&self) -> i32 {
        self.micro_block_size
    }

    fn options(&self) -> Result<EncodeOptions> {
        if !(MIN_ENCODE_VERSION..=CURRENT_VERSION).contains(&self.version) {
            return Err(LercError::wrong_param(format!(
                "cannot encode version {}",
                self.version
            )));
        }
        if !(MIN_MICRO_BLOCK_SIZE..=MAX_CONFIG_MICRO_BLOCK_SIZE).contains(&self.micro_block_size) {
            return Err(LercError::wrong_param(format!(
                "micro block size {} not in {MIN_MICRO_BLOCK_SIZE}..={MAX_CONFIG_MICRO_BLOCK_SIZE}",
                self.micro_block_size
            )));
        }
        Ok(EncodeOptions {
            version: self.version,
            micro_block_size: self.micro_block_size,
            max_z_error: self.max_z_error,
        })
    }

    /// Split `data` into per-band encoder inputs.
    fn bands<'a, T: LercType>(
        &self,
        data: &'a [T],
        shape: &RasterShape,
        mask: &'a BitMask,
    ) -> Result<Vec<Band<'a, T>>> {
        shape.validate()?;
        if data.len() != shape.num_values() {
            return Err(LercError::wrong_param(format!(
                "expected {} values for {shape:?}, got {}",
                shape.num_values(),
                data.len()
            )));
        }
        Ok(data
            .chunks_exact(shape.band_len())
            .enumerate()
            .map(|(i_band, chunk)| Band {
                data: chunk,
                n_dim: shape.n_dim,
                n_cols: shape.n_cols,
                n_rows: shape.n_rows,
                mask,
                encode_mask: i_band == 0,
            })
            .collect())
    }

    /// Exact number of bytes [`encode`](Self::encode) would produce.
    pub fn compute_compressed_size<T: LercType>(
        &self,
        data: &[T],
        shape: &RasterShape,
        mask: Option<&BitMask>,
    ) -> Result<usize> {
        let opts = self.options()?;
        shape.validate()?;
        let all_valid;
        let mask = match mask {
            Some(m) => m,
            None => {
                all_valid = BitMask::all_valid(shape.n_cols, shape.n_rows);
                &all_valid
            }
        };

        let mut total = 0;
        for (i_band, band) in self.bands(data, shape, mask)?.iter().enumerate() {
            total += lerc2::compute_num_bytes_needed_to_write(band, &opts)
                .map_err(|e| offset_nan_index(e, i_band * shape.band_len()))?;
        }
        Ok(total)
    }

    /// Encode all bands of `data`.
    ///
    /// `mask` marks the valid pixels and applies to every band; `None` means
    /// all pixels are valid. Values at invalid pixels are ignored.
    pub fn encode<T: LercType>(
        &self,
        data: &[T],
        shape: &RasterShape,
        mask: Option<&BitMask>,
    ) -> Result<Vec<u8>> {
        let opts = self.options()?;
        shape.validate()?;
        let all_valid;
        let mask = match mask {
            Some(m) => m,
            None => {
                all_valid = BitMask::all_valid(shape.n_cols, shape.n_rows);
                &all_valid
            }
        };

        let mut out = Vec::new();
        for (i_band, band) in self.bands(data, shape, mask)?.iter().enumerate() {
            let blob = lerc2::encode(band, &opts)
                .map_err(|e| offset_nan_index(e, i_band * shape.band_len()))?;
            out.extend_from_slice(&blob);
        }
        trace!("encoded {} bands into {} bytes", shape.n_bands, out.len());
        Ok(out)
    }

    /// Encode into a caller-provided buffer and return the number of bytes written.
    ///
    /// Fails with [`LercError::BufferTooSmall`] without touching `dst` if the
    /// encoding does not fit.
    pub fn encode_into<T: LercType>(
        &self,
        data: &[T],
        shape: &RasterShape,
        mask: Option<&BitMask>,
        dst: &mut [u8],
    ) -> Result<usize> {
        let blob = self.encode(data, shape, mask)?;
        if blob.len() > dst.len() {
            return Err(LercError::BufferTooSmall {
                needed: blob.len(),
                available: dst.len(),
            });
        }
        dst[..blob.len()].copy_from_slice(&blob);
        Ok(blob.len())
    }
}

impl Default for LercCodec {
    fn default() -> Self {
        LercCodec::new(0.0)
    }
}

fn offset_nan_index(err: LercError, offset: usize) -> LercError {
    match err {
        LercError::NaN { index } => LercError::NaN {
            index: index + offset,
        },
        e => e,
    }
}

/// Decode all bands of `shape` from `blob` into `out` and return the mask.
///
/// `out` must hold exactly `shape.num_values()` values of the stored type.
/// Values at invalid pixels are set to zero.
pub fn decode<T: LercType>(blob: &[u8], shape: &RasterShape, out: &mut [T]) -> Result<BitMask> {
    shape.validate()?;
    if out.len() != shape.num_values() {
        return Err(LercError::wrong_param(format!(
            "output holds {} values, {shape:?} needs {}",
            out.len(),
            shape.num_values()
        )));
    }

    let mut offset = 0;
    let mut mask: Option<BitMask> = None;
    for (i_band, band_out) in out.chunks_exact_mut(shape.band_len()).enumerate() {
        let rest = blob.get(offset..).unwrap_or_default();
        let hd = lerc2::get_blob_info(rest)?;
        if !shape.matches(&hd) {
            return Err(LercError::wrong_param(format!(
                "band {i_band} is {} x {} x {}, expected {shape:?}",
                hd.n_dim, hd.n_cols, hd.n_rows
            )));
        }
        let (hd, band_mask) = lerc2::decode(rest, mask.as_ref(), band_out)?;
        trace!("decoded band {i_band} from {} bytes", hd.blob_size);
        offset += hd.blob_size as usize;
        mask = Some(band_mask);
    }
    mask.ok_or_else(|| LercError::failed("no bands decoded"))
}

/// Header of the first band blob.
pub fn get_blob_info(blob: &[u8]) -> Result<HeaderInfo> {
    lerc2::get_blob_info(blob)
}

/// Summary of a multi-band blob.
#[derive(Debug, Clone, PartialEq)]
pub struct LercInfo {
    /// Format version of the first band.
    pub version: i32,
    /// Type of the stored values.
    pub data_type: DataType,
    /// Values per pixel.
    pub n_dim: usize,
    /// Pixels per row.
    pub n_cols: usize,
    /// Rows per band.
    pub n_rows: usize,
    /// Number of band blobs found.
    pub n_bands: usize,
    /// Valid pixels per band, taken from the first band.
    pub num_valid_pixel: usize,
    /// Largest error bound used by any band.
    pub max_z_error: f64,
    /// Smallest valid value over all bands. 0 if no pixel is valid.
    pub z_min: f64,
    /// Largest valid value over all bands. 0 if no pixel is valid.
    pub z_max: f64,
    /// Total bytes of all band blobs.
    pub blob_size: usize,
}

impl LercInfo {
    /// Shape of the raster the blob decodes to.
    pub fn shape(&self) -> RasterShape {
        RasterShape::new(self.n_dim, self.n_cols, self.n_rows, self.n_bands)
    }
}

/// Walk every band blob in `blob` and summarize them.
///
/// Bytes after the last band that do not start another blob are ignored.
pub fn get_lerc_info(blob: &[u8]) -> Result<LercInfo> {
    let first = lerc2::get_blob_info(blob)?;
    let mut info = LercInfo {
        version: first.version,
        data_type: first.data_type,
        n_dim: first.n_dim as usize,
        n_cols: first.n_cols as usize,
        n_rows: first.n_rows as usize,
        n_bands: 0,
        num_valid_pixel: first.num_valid_pixel as usize,
        max_z_error: first.max_z_error,
        z_min: f64::INFINITY,
        z_max: f64::NEG_INFINITY,
        blob_size: 0,
    };

    let mut offset = 0;
    while blob.get(offset..).is_some_and(|rest| rest.starts_with(FILE_KEY)) {
        let hd = lerc2::get_blob_info(&blob[offset..])?;
        if hd.data_type != info.data_type || !info.shape().matches(&hd) {
            return Err(LercError::failed(format!(
                "band {} does not match the first band",
                info.n_bands
            )));
        }
        info.n_bands += 1;
        info.max_z_error = info.max_z_error.max(hd.max_z_error);
        if hd.num_valid_pixel > 0 {
            info.z_min = info.z_min.min(hd.z_min);
            info.z_max = info.z_max.max(hd.z_max);
        }
        offset += hd.blob_size as usize;
    }

    if info.z_min > info.z_max {
        info.z_min = 0.0;
        info.z_max = 0.0;
    }
    info.blob_size = offset;
    Ok(info)
}

/// Pixel values of a runtime-typed raster.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    /// [`DataType::Char`] values.
    I8(Vec<i8>),
    /// [`DataType::Byte`] values.
    U8(Vec<u8>),
    /// [`DataType::Short`] values.
    I16(Vec<i16>),
    /// [`DataType::UShort`] values.
    U16(Vec<u16>),
    /// [`DataType::Int`] values.
    I32(Vec<i32>),
    /// [`DataType::UInt`] values.
    U32(Vec<u32>),
    /// [`DataType::Float`] values.
    F32(Vec<f32>),
    /// [`DataType::Double`] values.
    F64(Vec<f64>),
}

impl PixelBuffer {
    /// Type tag of the values.
    pub fn data_type(&self) -> DataType {
        match self {
            PixelBuffer::I8(_) => DataType::Char,
            PixelBuffer::U8(_) => DataType::Byte,
            PixelBuffer::I16(_) => DataType::Short,
            PixelBuffer::U16(_) => DataType::UShort,
            PixelBuffer::I32(_) => DataType::Int,
            PixelBuffer::U32(_) => DataType::UInt,
            PixelBuffer::F32(_) => DataType::Float,
            PixelBuffer::F64(_) => DataType::Double,
        }
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::I8(v) => v.len(),
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::I16(v) => v.len(),
            PixelBuffer::U16(v) => v.len(),
            PixelBuffer::I32(v) => v.len(),
            PixelBuffer::U32(v) => v.len(),
            PixelBuffer::F32(v) => v.len(),
            PixelBuffer::F64(v) => v.len(),
        }
    }

    /// Whether there are no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen every value to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        fn widen<T: LercType>(v: &[T]) -> Vec<f64> {
            v.iter().map(|x| x.to_f64()).collect()
        }
        match self {
            PixelBuffer::I8(v) => widen(v),
            PixelBuffer::U8(v) => widen(v),
            PixelBuffer::I16(v) => widen(v),
            PixelBuffer::U16(v) => widen(v),
            PixelBuffer::I32(v) => widen(v),
            PixelBuffer::U32(v) => widen(v),
            PixelBuffer::F32(v) => widen(v),
            PixelBuffer::F64(v) => v.clone(),
        }
    }
}

/// A raster decoded without knowing its type in advance.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRaster {
    /// Summary of the band blobs.
    pub info: LercInfo,
    /// Validity mask shared by all bands.
    pub mask: BitMask,
    /// Values of all bands, laid out like [`decode`] output.
    pub pixels: PixelBuffer,
}

/// Decode a blob of any stored type.
///
/// Fails if the pixel buffer would take more than [`MAX_DECODE_BYTES`] bytes.
pub fn decode_any(blob: &[u8]) -> Result<DecodedRaster> {
    let info = get_lerc_info(blob)?;
    let shape = info.shape();
    let num_bytes = shape.num_values().saturating_mul(info.data_type.size());
    if num_bytes > MAX_DECODE_BYTES {
        return Err(LercError::failed(format!(
            "refusing to allocate {num_bytes} bytes for {shape:?}"
        )));
    }

    fn typed<T: LercType>(
        blob: &[u8],
        shape: &RasterShape,
        wrap: fn(Vec<T>) -> PixelBuffer,
    ) -> Result<(BitMask, PixelBuffer)> {
        let mut out = vec![T::default(); shape.num_values()];
        let mask = decode(blob, shape, &mut out)?;
        Ok((mask, wrap(out)))
    }

    let (mask, pixels) = match info.data_type {
        DataType::Char => typed::<i8>(blob, &shape, PixelBuffer::I8)?,
        DataType::Byte => typed::<u8>(blob, &shape, PixelBuffer::U8)?,
        DataType::Short => typed::<i16>(blob, &shape, PixelBuffer::I16)?,
        DataType::UShort => typed::<u16>(blob, &shape, PixelBuffer::U16)?,
        DataType::Int => typed::<i32>(blob, &shape, PixelBuffer::I32)?,
        DataType::UInt => typed::<u32>(blob, &shape, PixelBuffer::U32)?,
        DataType::Float => typed::<f32>(blob, &shape, PixelBuffer::F32)?,
        DataType::Double => typed::<f64>(blob, &shape, PixelBuffer::F64)?,
    };
    Ok(DecodedRaster { info, mask, pixels })
}

/// Decode a blob of any stored type into `f64` values.
pub fn decode_to_f64(blob: &[u8]) -> Result<(Vec<f64>, RasterShape, BitMask)> {
    let raster = decode_any(blob)?;
    Ok((raster.pixels.to_f64(), raster.info.shape(), raster.mask))
}
