//! Error-bounded quantization of tile values.
//!
//! With a maximum error `e`, a value `z` of a tile with minimum `z_min` is
//! stored as `round((z - z_min) / (2 * e))` and reconstructed as
//! `z_min + q * 2 * e`, clamped to the recorded maximum. Lossless integer
//! encoding uses `e = 0.5`, which reduces to plain offsets from the minimum.

use crate::data_type::{DataType, LercType};

/// Error bound that means "lossless" for integer types.
pub const LOSSLESS_INT_ERROR: f64 = 0.5;

/// Largest quantized value of a tile spanning `[z_min, z_max]`.
///
/// Returns 0 when `max_z_error` is not positive; callers handle the
/// lossless float case before quantizing.
#[inline]
pub fn compute_max_val(z_min: f64, z_max: f64, max_z_error: f64) -> f64 {
    if max_z_error > 0.0 {
        let fac = 1.0 / (2.0 * max_z_error);
        (z_max - z_min) * fac
    } else {
        0.0
    }
}

/// Quantize `values` relative to `z_min` into `out`.
pub fn quantize<T: LercType>(values: &[T], z_min: T, max_z_error: f64, out: &mut Vec<u32>) {
    out.clear();
    let z_min = z_min.to_f64();
    if T::DATA_TYPE.is_integer() && max_z_error == LOSSLESS_INT_ERROR {
        out.extend(values.iter().map(|v| (v.to_f64() - z_min) as u32));
    } else {
        let scale = 1.0 / (2.0 * max_z_error);
        out.extend(
            values
                .iter()
                .map(|v| ((v.to_f64() - z_min) * scale + 0.5) as u32),
        );
    }
}

/// Reconstruct a value from its quantized form.
#[inline]
pub fn dequantize(offset: f64, q: u32, inv_scale: f64, z_max: f64) -> f64 {
    (offset + q as f64 * inv_scale).min(z_max)
}

/// Pair each quantized value with its position and sort by value.
pub fn sort_quant_array(quant: &[u32]) -> Vec<(u32, u32)> {
    let mut sorted: Vec<(u32, u32)> = quant
        .iter()
        .enumerate()
        .map(|(i, &q)| (q, i as u32))
        .collect();
    sorted.sort_unstable_by_key(|p| p.0);
    sorted
}

/// Pick the narrowest type that holds the tile minimum `z` exactly.
///
/// Returns the 2-bit code stored in bits 6-7 of the tile flag byte, and the
/// type the minimum is written as.
pub fn type_code(dt: DataType, z: f64) -> (u8, DataType) {
    let fits_i8 = (z as i8) as f64 == z;
    let fits_u8 = (z as u8) as f64 == z;
    let fits_i16 = (z as i16) as f64 == z;
    let fits_u16 = (z as u16) as f64 == z;
    let fits_i32 = (z as i32) as f64 == z;
    let fits_f32 = (z as f32) as f64 == z;

    let tc = match dt {
        DataType::Short => {
            if fits_i8 {
                2
            } else if fits_u8 {
                1
            } else {
                0
            }
        }
        DataType::UShort => u8::from(fits_u8),
        DataType::Int => {
            if fits_u8 {
                3
            } else if fits_i16 {
                2
            } else if fits_u16 {
                1
            } else {
                0
            }
        }
        DataType::UInt => {
            if fits_u8 {
                2
            } else if fits_u16 {
                1
            } else {
                0
            }
        }
        DataType::Float => {
            if fits_u8 {
                2
            } else if fits_i16 {
                1
            } else {
                0
            }
        }
        DataType::Double => {
            if fits_i16 {
                3
            } else if fits_i32 {
                2
            } else if fits_f32 {
                1
            } else {
                0
            }
        }
        DataType::Char | DataType::Byte => 0,
    };

    // every code produced above maps back to a type
    let used = data_type_used(dt, tc).unwrap_or(dt);
    (tc, used)
}

/// The type a tile minimum was written as, given the raster type and the 2-bit code.
pub fn data_type_used(dt: DataType, tc: u8) -> Option<DataType> {
    let tc = tc as i32;
    match dt {
        DataType::Short | DataType::Int => DataType::from_code(dt.code() - tc),
        DataType::UShort | DataType::UInt => DataType::from_code(dt.code() - 2 * tc),
        DataType::Float => match tc {
            0 => Some(DataType::Float),
            1 => Some(DataType::Short),
            2 => Some(DataType::Byte),
            _ => None,
        },
        DataType::Double => match tc {
            0 => Some(DataType::Double),
            1 => Some(DataType::Float),
            2 => Some(DataType::Int),
            3 => Some(DataType::Short),
            _ => None,
        },
        DataType::Char | DataType::Byte => (tc == 0).then_some(dt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_max_val() {
        assert_eq!(compute_max_val(0.0, 10.0, 0.5), 10.0);
        assert_eq!(compute_max_val(-4.0, 4.0, 2.0), 2.0);
        assert_eq!(compute_max_val(1.0, 1.0, 0.0), 0.0);
    }

    #[test]
    fn test_quantize_lossless_int() {
        let mut out = Vec::new();
        quantize(&[10i16, 12, -3, 10], -3, 0.5, &mut out);
        assert_eq!(out, vec![13, 15, 0, 13]);
    }

    #[test]
    fn test_quantize_lossy_within_bound() {
        let values = [0.0f64, 0.04, 0.11, 0.5, 0.73, 1.0];
        let e = 0.05;
        let mut out = Vec::new();
        quantize(&values, 0.0, e, &mut out);
        for (&v, &q) in values.iter().zip(out.iter()) {
            let z = dequantize(0.0, q, 2.0 * e, 1.0);
            assert!((z - v).abs() <= e + 1e-12, "v={v} z={z}");
        }
    }

    #[test]
    fn test_dequantize_clamps() {
        assert_eq!(dequantize(0.0, 10, 1.0, 7.0), 7.0);
        assert_eq!(dequantize(2.0, 1, 4.0, 7.0), 6.0);
    }

    #[test]
    fn test_sort_quant_array() {
        let sorted = sort_quant_array(&[3, 0, 2, 0]);
        let values: Vec<u32> = sorted.iter().map(|p| p.0).collect();
        assert_eq!(values, vec![0, 0, 2, 3]);
        assert_eq!(sorted[2], (2, 2));
        assert_eq!(sorted[3], (3, 0));
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(type_code(DataType::Short, -5.0), (2, DataType::Char));
        assert_eq!(type_code(DataType::Short, 200.0), (1, DataType::Byte));
        assert_eq!(type_code(DataType::Short, -300.0), (0, DataType::Short));
        assert_eq!(type_code(DataType::UShort, 255.0), (1, DataType::Byte));
        assert_eq!(type_code(DataType::UShort, 256.0), (0, DataType::UShort));
        assert_eq!(type_code(DataType::Int, 7.0), (3, DataType::Byte));
        assert_eq!(type_code(DataType::Int, -7.0), (2, DataType::Short));
        assert_eq!(type_code(DataType::Int, 60_000.0), (1, DataType::UShort));
        assert_eq!(type_code(DataType::Int, -70_000.0), (0, DataType::Int));
        assert_eq!(type_code(DataType::UInt, 9.0), (2, DataType::Byte));
        assert_eq!(type_code(DataType::UInt, 9_000.0), (1, DataType::UShort));
        assert_eq!(type_code(DataType::Float, 3.0), (2, DataType::Byte));
        assert_eq!(type_code(DataType::Float, -3.0), (1, DataType::Short));
        assert_eq!(type_code(DataType::Float, 3.25), (0, DataType::Float));
        assert_eq!(type_code(DataType::Double, -3.0), (3, DataType::Short));
        assert_eq!(type_code(DataType::Double, 1.0e6), (2, DataType::Int));
        assert_eq!(type_code(DataType::Double, 0.5), (1, DataType::Float));
        assert_eq!(type_code(DataType::Double, 0.1), (0, DataType::Double));
        assert_eq!(type_code(DataType::Byte, 3.0), (0, DataType::Byte));
    }

    #[test]
    fn test_data_type_used_rejects_bad_codes() {
        assert_eq!(data_type_used(DataType::Short, 3), None);
        assert_eq!(data_type_used(DataType::UShort, 2), None);
        assert_eq!(data_type_used(DataType::UInt, 3), None);
        assert_eq!(data_type_used(DataType::Float, 3), None);
        assert_eq!(data_type_used(DataType::Byte, 1), None);
        assert_eq!(data_type_used(DataType::Int, 3), Some(DataType::Byte));
    }
}
