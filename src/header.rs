//! Blob header.
//!
//! Layout (little-endian):
//!
//! ```text
//! "Lerc2 "            6 bytes
//! version             i32
//! checksum            u32      version >= 3
//! nRows, nCols        i32, i32
//! nDim                i32      version >= 4
//! numValidPixel       i32
//! microBlockSize      i32
//! blobSize            i32
//! dataType            i32
//! maxZError           f64
//! zMin, zMax          f64, f64
//! ```

use crate::cursor::ByteCursor;
use crate::data_type::DataType;
use crate::error::LercError;
use crate::quantize::LOSSLESS_INT_ERROR;
use crate::Result;

/// Magic bytes at the start of every blob.
pub const FILE_KEY: &[u8; 6] = b"Lerc2 ";

/// Newest format version this crate reads and writes.
pub const CURRENT_VERSION: i32 = 4;

/// Oldest format version the encoder can target.
pub const MIN_ENCODE_VERSION: i32 = 2;

/// Byte offset of the checksum field (version >= 3).
pub const CHECKSUM_OFFSET: usize = FILE_KEY.len() + 4;

/// The checksum covers every byte from here up to `blobSize`.
pub const CHECKSUM_START: usize = CHECKSUM_OFFSET + 4;

/// Largest tile edge a decoder accepts.
pub const MAX_MICRO_BLOCK_SIZE: i32 = 32;

/// Per-blob metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderInfo {
    /// Format version, 1 through [`CURRENT_VERSION`].
    pub version: i32,
    /// Fletcher-32 over the blob after the checksum field. 0 before version 3.
    pub checksum: u32,
    /// Rows of pixels.
    pub n_rows: i32,
    /// Pixels per row.
    pub n_cols: i32,
    /// Values per pixel. Always 1 before version 4.
    pub n_dim: i32,
    /// Pixels set in the validity mask.
    pub num_valid_pixel: i32,
    /// Tile edge length.
    pub micro_block_size: i32,
    /// Exact length of the blob in bytes.
    pub blob_size: i32,
    /// Type of the stored values.
    pub data_type: DataType,
    /// Error bound the blob was encoded with. 0.5 means lossless for integers.
    pub max_z_error: f64,
    /// Smallest valid value over all dimensions.
    pub z_min: f64,
    /// Largest valid value over all dimensions. Equal to `z_min` for a constant image.
    pub z_max: f64,
}

impl HeaderInfo {
    /// Serialized header length for `version`.
    pub fn num_bytes(version: i32) -> usize {
        let num_ints = if version >= 4 { 7 } else { 6 };
        let checksum = if version >= 3 { 4 } else { 0 };
        FILE_KEY.len() + 4 + checksum + num_ints * 4 + 3 * 8
    }

    /// Number of pixels in the grid.
    #[inline]
    pub fn num_pixels(&self) -> usize {
        self.n_rows as usize * self.n_cols as usize
    }

    /// Whether the image-wide Huffman modes may appear in this blob.
    pub fn try_huffman(&self) -> bool {
        self.version > 1
            && matches!(self.data_type, DataType::Byte | DataType::Char)
            && self.max_z_error == LOSSLESS_INT_ERROR
    }

    /// Append the serialized header to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(FILE_KEY);
        out.extend_from_slice(&self.version.to_le_bytes());
        if self.version >= 3 {
            out.extend_from_slice(&self.checksum.to_le_bytes());
        }

        let mut ints = vec![self.n_rows, self.n_cols];
        if self.version >= 4 {
            ints.push(self.n_dim);
        }
        ints.extend_from_slice(&[
            self.num_valid_pixel,
            self.micro_block_size,
            self.blob_size,
            self.data_type.code(),
        ]);
        for v in ints {
            out.extend_from_slice(&v.to_le_bytes());
        }

        for v in [self.max_z_error, self.z_min, self.z_max] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Read and validate a header.
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<HeaderInfo> {
        let key = cursor.read_bytes(FILE_KEY.len())?;
        if key != FILE_KEY {
            return Err(LercError::failed("not a Lerc2 blob"));
        }

        let version = cursor.read_i32()?;
        if !(1..=CURRENT_VERSION).contains(&version) {
            return Err(LercError::failed(format!(
                "unsupported Lerc2 version {version}"
            )));
        }
        let checksum = if version >= 3 { cursor.read_u32()? } else { 0 };

        let n_rows = cursor.read_i32()?;
        let n_cols = cursor.read_i32()?;
        let n_dim = if version >= 4 { cursor.read_i32()? } else { 1 };
        let num_valid_pixel = cursor.read_i32()?;
        let micro_block_size = cursor.read_i32()?;
        let blob_size = cursor.read_i32()?;
        let dt_code = cursor.read_i32()?;
        let max_z_error = cursor.read_f64()?;
        let z_min = cursor.read_f64()?;
        let z_max = cursor.read_f64()?;

        let data_type = DataType::from_code(dt_code)
            .ok_or_else(|| LercError::failed(format!("unknown data type {dt_code}")))?;

        let hd = HeaderInfo {
            version,
            checksum,
            n_rows,
            n_cols,
            n_dim,
            num_valid_pixel,
            micro_block_size,
            blob_size,
            data_type,
            max_z_error,
            z_min,
            z_max,
        };
        hd.validate()?;
        Ok(hd)
    }

    fn validate(&self) -> Result<()> {
        if self.n_rows <= 0 || self.n_cols <= 0 || self.n_dim <= 0 {
            return Err(LercError::failed(format!(
                "bad dimensions {} x {} x {}",
                self.n_rows, self.n_cols, self.n_dim
            )));
        }
        let num_values = self.n_rows as i64 * self.n_cols as i64 * self.n_dim as i64;
        if num_values > i32::MAX as i64 {
            return Err(LercError::failed(format!(
                "raster of {num_values} values is too large"
            )));
        }
        if self.num_valid_pixel < 0 || self.num_valid_pixel as usize > self.num_pixels() {
            return Err(LercError::failed(format!(
                "bad valid pixel count {}",
                self.num_valid_pixel
            )));
        }
        if self.micro_block_size <= 0 || self.micro_block_size > MAX_MICRO_BLOCK_SIZE {
            return Err(LercError::failed(format!(
                "bad micro block size {}",
                self.micro_block_size
            )));
        }
        if self.blob_size < HeaderInfo::num_bytes(self.version) as i32 {
            return Err(LercError::failed(format!("bad blob size {}", self.blob_size)));
        }
        if self.max_z_error.is_nan() || self.max_z_error < 0.0 {
            return Err(LercError::failed("bad max z error"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(version: i32) -> HeaderInfo {
        HeaderInfo {
            version,
            checksum: if version >= 3 { 0x1234_5678 } else { 0 },
            n_rows: 20,
            n_cols: 30,
            n_dim: if version >= 4 { 3 } else { 1 },
            num_valid_pixel: 550,
            micro_block_size: 8,
            blob_size: 1000,
            data_type: DataType::Float,
            max_z_error: 0.01,
            z_min: -4.5,
            z_max: 99.25,
        }
    }

    fn write(hd: &HeaderInfo) -> Vec<u8> {
        let mut out = Vec::new();
        hd.write(&mut out);
        out
    }

    #[test]
    fn test_num_bytes() {
        assert_eq!(HeaderInfo::num_bytes(1), 58);
        assert_eq!(HeaderInfo::num_bytes(2), 58);
        assert_eq!(HeaderInfo::num_bytes(3), 62);
        assert_eq!(HeaderInfo::num_bytes(4), 66);
    }

    #[test]
    fn test_roundtrip_all_versions() {
        for version in 1..=CURRENT_VERSION {
            let hd = sample(version);
            let bytes = write(&hd);
            assert_eq!(bytes.len(), HeaderInfo::num_bytes(version));
            let mut cursor = ByteCursor::new(&bytes);
            assert_eq!(HeaderInfo::read(&mut cursor).unwrap(), hd);
            assert_eq!(cursor.remaining(), 0);
        }
    }

    #[test]
    fn test_checksum_position() {
        let bytes = write(&sample(4));
        assert_eq!(&bytes[..6], FILE_KEY);
        assert_eq!(
            u32::from_le_bytes(bytes[CHECKSUM_OFFSET..CHECKSUM_START].try_into().unwrap()),
            0x1234_5678
        );
    }

    #[test]
    fn test_bad_key() {
        let mut bytes = write(&sample(3));
        bytes[0] = b'X';
        assert!(HeaderInfo::read(&mut ByteCursor::new(&bytes)).is_err());
    }

    #[test]
    fn test_future_version_rejected() {
        let mut bytes = write(&sample(4));
        bytes[6..10].copy_from_slice(&5i32.to_le_bytes());
        assert!(HeaderInfo::read(&mut ByteCursor::new(&bytes)).is_err());
    }

    #[test]
    fn test_truncated() {
        let bytes = write(&sample(4));
        for cut in 0..bytes.len() {
            assert!(
                HeaderInfo::read(&mut ByteCursor::new(&bytes[..cut])).is_err(),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_validation() {
        let cases: Vec<Box<dyn Fn(&mut HeaderInfo)>> = vec![
            Box::new(|hd| hd.n_rows = 0),
            Box::new(|hd| hd.n_cols = -3),
            Box::new(|hd| hd.n_dim = 0),
            Box::new(|hd| hd.num_valid_pixel = 601),
            Box::new(|hd| hd.num_valid_pixel = -1),
            Box::new(|hd| hd.micro_block_size = 33),
            Box::new(|hd| hd.micro_block_size = 0),
            Box::new(|hd| hd.blob_size = 10),
            Box::new(|hd| hd.max_z_error = f64::NAN),
            Box::new(|hd| {
                hd.n_rows = 50_000;
                hd.n_cols = 50_000;
            }),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut hd = sample(4);
            mutate(&mut hd);
            let bytes = write(&hd);
            assert!(
                HeaderInfo::read(&mut ByteCursor::new(&bytes)).is_err(),
                "case {i}"
            );
        }
    }

    #[test]
    fn test_unknown_data_type() {
        let hd = sample(4);
        let mut bytes = write(&hd);
        // dataType is the last int before the three doubles
        let pos = bytes.len() - 24 - 4;
        bytes[pos..pos + 4].copy_from_slice(&9i32.to_le_bytes());
        assert!(HeaderInfo::read(&mut ByteCursor::new(&bytes)).is_err());
    }

    #[test]
    fn test_try_huffman() {
        let mut hd = sample(3);
        hd.data_type = DataType::Byte;
        hd.max_z_error = 0.5;
        assert!(hd.try_huffman());
        hd.version = 1;
        assert!(!hd.try_huffman());
        hd.version = 4;
        hd.data_type = DataType::Short;
        assert!(!hd.try_huffman());
    }
}
