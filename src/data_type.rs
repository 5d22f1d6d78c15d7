//! Scalar pixel types supported by the codec.
//!
//! The set of types is closed: [`DataType`] carries the on-disk tag and
//! [`LercType`] (sealed) connects each Rust scalar to its tag.

use std::fmt::Debug;

use crate::cursor::ByteCursor;
use crate::Result;

/// Pixel data type tag as stored in the blob header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    /// Signed 8-bit integer.
    Char = 0,
    /// Unsigned 8-bit integer.
    Byte = 1,
    /// Signed 16-bit integer.
    Short = 2,
    /// Unsigned 16-bit integer.
    UShort = 3,
    /// Signed 32-bit integer.
    Int = 4,
    /// Unsigned 32-bit integer.
    UInt = 5,
    /// 32-bit float.
    Float = 6,
    /// 64-bit float.
    Double = 7,
}

impl DataType {
    /// The tag value written to the header.
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Parse a header tag.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => DataType::Char,
            1 => DataType::Byte,
            2 => DataType::Short,
            3 => DataType::UShort,
            4 => DataType::Int,
            5 => DataType::UInt,
            6 => DataType::Float,
            7 => DataType::Double,
            _ => return None,
        })
    }

    /// Size of one value in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::Char | DataType::Byte => 1,
            DataType::Short | DataType::UShort => 2,
            DataType::Int | DataType::UInt | DataType::Float => 4,
            DataType::Double => 8,
        }
    }

    #[inline]
    pub fn is_integer(self) -> bool {
        self < DataType::Float
    }

    /// Largest quantized value a tile may use before it is stored raw.
    pub fn max_val_to_quantize(self) -> u32 {
        match self {
            DataType::Char | DataType::Byte | DataType::Short | DataType::UShort => (1 << 15) - 1,
            DataType::Int | DataType::UInt | DataType::Float | DataType::Double => (1 << 30) - 1,
        }
    }

    /// Append `z`, converted to this type, in little-endian order.
    pub(crate) fn write_value(self, out: &mut Vec<u8>, z: f64) {
        match self {
            DataType::Char => out.push(z as i8 as u8),
            DataType::Byte => out.push(z as u8),
            DataType::Short => out.extend_from_slice(&(z as i16).to_le_bytes()),
            DataType::UShort => out.extend_from_slice(&(z as u16).to_le_bytes()),
            DataType::Int => out.extend_from_slice(&(z as i32).to_le_bytes()),
            DataType::UInt => out.extend_from_slice(&(z as u32).to_le_bytes()),
            DataType::Float => out.extend_from_slice(&(z as f32).to_le_bytes()),
            DataType::Double => out.extend_from_slice(&z.to_le_bytes()),
        }
    }

    /// Read one value of this type and widen it to `f64`.
    pub(crate) fn read_value(self, cursor: &mut ByteCursor<'_>) -> Result<f64> {
        Ok(match self {
            DataType::Char => i8::from_le_bytes(cursor.read_array()?) as f64,
            DataType::Byte => cursor.read_u8()? as f64,
            DataType::Short => cursor.read_i16()? as f64,
            DataType::UShort => cursor.read_u16()? as f64,
            DataType::Int => cursor.read_i32()? as f64,
            DataType::UInt => cursor.read_u32()? as f64,
            DataType::Float => f32::from_le_bytes(cursor.read_array()?) as f64,
            DataType::Double => cursor.read_f64()?,
        })
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A scalar type that can be stored in a LERC blob.
///
/// Implemented for `i8`, `u8`, `i16`, `u16`, `i32`, `u32`, `f32` and `f64`.
pub trait LercType: sealed::Sealed + Copy + PartialOrd + Default + Debug + Send + Sync + 'static {
    /// Header tag of this type.
    const DATA_TYPE: DataType;

    /// Widen to `f64`. Exact for every supported type.
    fn to_f64(self) -> f64;

    /// Narrow from `f64` with `as` semantics (truncate toward zero, saturate).
    fn from_f64(v: f64) -> Self;

    /// Whether the value is finite. Always true for integers.
    fn is_finite(self) -> bool;

    /// Addition that wraps for integer types.
    fn wrapping_add(self, rhs: Self) -> Self;

    /// Subtraction that wraps for integer types.
    fn wrapping_sub(self, rhs: Self) -> Self;

    /// Append the little-endian bytes of the value.
    fn write_le(self, out: &mut Vec<u8>);

    /// Read one little-endian value.
    fn read_le(cursor: &mut ByteCursor<'_>) -> Result<Self>;
}

macro_rules! impl_lerc_int {
    ($($t:ty => $dt:ident),* $(,)?) => {$(
        impl sealed::Sealed for $t {}

        impl LercType for $t {
            const DATA_TYPE: DataType = DataType::$dt;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $t
            }

            #[inline]
            fn is_finite(self) -> bool {
                true
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }

            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$t>::wrapping_sub(self, rhs)
            }

            #[inline]
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(cursor: &mut ByteCursor<'_>) -> Result<Self> {
                Ok(<$t>::from_le_bytes(cursor.read_array()?))
            }
        }
    )*};
}

macro_rules! impl_lerc_float {
    ($($t:ty => $dt:ident),* $(,)?) => {$(
        impl sealed::Sealed for $t {}

        impl LercType for $t {
            const DATA_TYPE: DataType = DataType::$dt;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $t
            }

            #[inline]
            fn is_finite(self) -> bool {
                <$t>::is_finite(self)
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                self + rhs
            }

            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                self - rhs
            }

            #[inline]
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(cursor: &mut ByteCursor<'_>) -> Result<Self> {
                Ok(<$t>::from_le_bytes(cursor.read_array()?))
            }
        }
    )*};
}

impl_lerc_int!(
    i8 => Char,
    u8 => Byte,
    i16 => Short,
    u16 => UShort,
    i32 => Int,
    u32 => UInt,
);

impl_lerc_float!(f32 => Float, f64 => Double);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for code in 0..8 {
            let dt = DataType::from_code(code).unwrap();
            assert_eq!(dt.code(), code);
        }
        assert!(DataType::from_code(-1).is_none());
        assert!(DataType::from_code(8).is_none());
    }

    #[test]
    fn test_sizes_match_rust_types() {
        assert_eq!(DataType::Char.size(), std::mem::size_of::<i8>());
        assert_eq!(DataType::UShort.size(), std::mem::size_of::<u16>());
        assert_eq!(DataType::UInt.size(), std::mem::size_of::<u32>());
        assert_eq!(DataType::Float.size(), std::mem::size_of::<f32>());
        assert_eq!(DataType::Double.size(), std::mem::size_of::<f64>());
        assert_eq!(<i16 as LercType>::DATA_TYPE, DataType::Short);
        assert_eq!(<f64 as LercType>::DATA_TYPE, DataType::Double);
    }

    #[test]
    fn test_integer_split() {
        assert!(DataType::UInt.is_integer());
        assert!(!DataType::Float.is_integer());
        assert!(!DataType::Double.is_integer());
    }

    #[test]
    fn test_write_read_value() {
        let cases = [
            (DataType::Char, -5.0),
            (DataType::Byte, 200.0),
            (DataType::Short, -30000.0),
            (DataType::UShort, 60000.0),
            (DataType::Int, -2_000_000_000.0),
            (DataType::UInt, 4_000_000_000.0),
            (DataType::Float, 1.5),
            (DataType::Double, 1.0e300),
        ];
        for (dt, z) in cases {
            let mut out = Vec::new();
            dt.write_value(&mut out, z);
            assert_eq!(out.len(), dt.size());
            let mut cursor = ByteCursor::new(&out);
            assert_eq!(dt.read_value(&mut cursor).unwrap(), z, "{dt:?}");
        }
    }

    #[test]
    fn test_wrapping_arithmetic() {
        assert_eq!(LercType::wrapping_sub(3u8, 5u8), 254);
        assert_eq!(LercType::wrapping_add(254u8, 5u8), 3);
        assert_eq!(LercType::wrapping_sub(-128i8, 1i8), 127);
        assert_eq!(LercType::wrapping_add(1.5f32, 2.0f32), 3.5);
    }

    #[test]
    fn test_le_roundtrip() {
        let mut out = Vec::new();
        (-7i32).write_le(&mut out);
        2.25f64.write_le(&mut out);
        let mut cursor = ByteCursor::new(&out);
        assert_eq!(i32::read_le(&mut cursor).unwrap(), -7);
        assert_eq!(f64::read_le(&mut cursor).unwrap(), 2.25);
    }

    #[test]
    fn test_from_f64_saturates() {
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(i8::from_f64(-300.0), -128);
        assert_eq!(i16::from_f64(12.9), 12);
        assert!(!f32::NAN.is_finite());
        assert!(LercType::is_finite(5u16));
    }
}
