//! # lerc-rs
//!
//! A Rust implementation of LERC2 (Limited Error Raster Compression), the
//! tiled raster codec used inside GeoTIFF and MRF files.
//!
//! ## Overview
//!
//! LERC compresses numeric grids with a per-pixel validity mask while
//! guaranteeing a caller-chosen maximum absolute error per value (0 means
//! lossless). It achieves this through:
//!
//! 1. **Quantization**: each value is stored as an offset from its tile
//!    minimum in steps of twice the allowed error
//! 2. **Bit Stuffing**: quantized values of each 8x8 (or 16x16) tile are
//!    packed at the narrowest width, optionally through a lookup table
//! 3. **Huffman Coding**: lossless 8-bit data may instead be Huffman coded,
//!    either directly or as deltas to a neighbor
//! 4. **Mask Compression**: the validity mask is run-length encoded once
//!
//! Every blob carries a header with the raster dimensions and value range, so
//! it can be inspected without decoding. Version 3 and later blobs are
//! protected by a Fletcher-32 checksum.
//!
//! ## Quick Start
//!
//! ```rust
//! use lerc_rs::{BitMask, LercCodec, RasterShape};
//!
//! // A 32 x 16 elevation grid with a hole in the middle
//! let shape = RasterShape::new(1, 32, 16, 1);
//! let data: Vec<f64> = (0..512).map(|k| 100.0 + (k % 32) as f64 * 0.37).collect();
//! let mut mask = BitMask::all_valid(32, 16);
//! mask.set_invalid(8 * 32 + 16);
//!
//! // Encode with at most 1 cm of error
//! let codec = LercCodec::new(0.01);
//! let blob = codec.encode(&data, &shape, Some(&mask)).unwrap();
//!
//! // Inspect without decoding
//! let info = lerc_rs::get_lerc_info(&blob).unwrap();
//! assert_eq!(info.n_cols, 32);
//!
//! // Decode into a caller-owned buffer
//! let mut decoded = vec![0.0; 512];
//! let decoded_mask = lerc_rs::decode(&blob, &shape, &mut decoded).unwrap();
//! assert_eq!(decoded_mask, mask);
//! assert!((decoded[5] - data[5]).abs() <= 0.01);
//! ```
//!
//! ## Choosing an Error Bound
//!
//! | Data | Typical `max_z_error` |
//! |------|-----------------------|
//! | 8/16/32-bit integers, lossless | 0 (anything below 1) |
//! | Elevation in meters | 0.01 to 0.1 |
//! | Reflectance in 0..1 | 0.001 |
//! | Floats, lossless | 0 |
//!
//! Larger bounds shrink the quantized range of each tile and with it the
//! number of bits per value.
//!
//! ## Format Versions
//!
//! The decoder reads versions 1 through 4. The encoder writes version 4 by
//! default and can target 2 or 3 with [`LercCodec::with_version`]. More than
//! one value per pixel needs version 4.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bitmask;
mod bitpack;
mod bitstuffer;
mod checksum;
mod codec;
mod cursor;
mod data_type;
mod error;
mod header;
mod huffman;
mod lerc2;
mod quantize;
mod rle;

pub use bitmask::BitMask;
pub use codec::{
    decode, decode_any, decode_to_f64, get_blob_info, get_lerc_info, DecodedRaster, LercCodec,
    LercInfo, PixelBuffer, RasterShape, MAX_DECODE_BYTES,
};
pub use data_type::{DataType, LercType};
pub use error::{ErrorCode, LercError};
pub use header::{HeaderInfo, CURRENT_VERSION};

/// Convenience type alias for Results with LercError.
pub type Result<T> = std::result::Result<T, LercError>;
