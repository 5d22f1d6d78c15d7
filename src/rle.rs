//! Byte run-length codec used to store validity masks.
//!
//! The stream is a sequence of runs, each introduced by a little-endian `i16`
//! count:
//!
//! - `count > 0`: `count` literal bytes follow ("odd" run),
//! - `count <= 0`: one byte follows, repeated `-count` times ("even" run),
//! - `count == -32768`: end of stream.
//!
//! The encoder only switches into an even run when at least
//! [`MIN_NUM_EVEN`] identical bytes follow, so near-random data is not
//! fragmented into many short runs.

use crate::cursor::ByteCursor;
use crate::error::LercError;
use crate::Result;

/// Minimum number of equal bytes that start a repeat run.
pub const MIN_NUM_EVEN: usize = 5;

/// Largest run length that fits in a count.
const MAX_COUNT: usize = 32767;

/// End-of-stream sentinel.
const EOF_COUNT: i16 = i16::MIN;

/// One step of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run {
    /// `len` literal bytes starting at `start`.
    Literal { start: usize, len: usize },
    /// `byte` repeated `len` times.
    Repeat { byte: u8, len: usize },
}

/// Length of the run of bytes equal to `src[i]` starting at `i`, capped at `cap`.
#[inline]
fn equal_run(src: &[u8], i: usize, cap: usize) -> usize {
    let b = src[i];
    src[i..].iter().take(cap).take_while(|&&x| x == b).count()
}

/// Split `src` into runs. Both the size computation and the writer walk this.
fn for_each_run(src: &[u8], mut emit: impl FnMut(Run)) {
    let mut i = 0;
    let mut lit_start = 0;
    let mut lit_len = 0;

    while i < src.len() {
        let run = equal_run(src, i, MAX_COUNT);
        if run >= MIN_NUM_EVEN {
            if lit_len > 0 {
                emit(Run::Literal {
                    start: lit_start,
                    len: lit_len,
                });
                lit_len = 0;
            }
            emit(Run::Repeat {
                byte: src[i],
                len: run,
            });
            i += run;
        } else {
            if lit_len == 0 {
                lit_start = i;
            }
            lit_len += 1;
            i += 1;
            if lit_len == MAX_COUNT {
                emit(Run::Literal {
                    start: lit_start,
                    len: lit_len,
                });
                lit_len = 0;
            }
        }
    }

    if lit_len > 0 {
        emit(Run::Literal {
            start: lit_start,
            len: lit_len,
        });
    }
}

/// Exact size in bytes of the compressed form of `src`, including the end marker.
pub fn compute_num_bytes_rle(src: &[u8]) -> usize {
    let mut sum = 0;
    for_each_run(src, |run| {
        sum += match run {
            Run::Literal { len, .. } => 2 + len,
            Run::Repeat { .. } => 2 + 1,
        };
    });
    sum + 2
}

/// Compress `src`.
pub fn compress(src: &[u8]) -> Vec<u8> {
    let num_bytes = compute_num_bytes_rle(src);
    let mut out = Vec::with_capacity(num_bytes);

    for_each_run(src, |run| match run {
        Run::Literal { start, len } => {
            out.extend_from_slice(&(len as i16).to_le_bytes());
            out.extend_from_slice(&src[start..start + len]);
        }
        Run::Repeat { byte, len } => {
            out.extend_from_slice(&(-(len as i16)).to_le_bytes());
            out.push(byte);
        }
    });
    out.extend_from_slice(&EOF_COUNT.to_le_bytes());

    debug_assert_eq!(out.len(), num_bytes);
    out
}

/// Decompress from `cursor` into `dst`.
///
/// Returns the number of bytes written to `dst`. Fails if the stream ends
/// before its end marker or describes more output than `dst` can hold.
pub fn decompress(cursor: &mut ByteCursor<'_>, dst: &mut [u8]) -> Result<usize> {
    let mut idx = 0;
    let mut cnt = cursor.read_i16()?;

    while cnt != EOF_COUNT {
        let n = cnt.unsigned_abs() as usize;
        if idx + n > dst.len() {
            return Err(LercError::failed(format!(
                "rle run of {n} bytes overflows destination of {} bytes at {idx}",
                dst.len()
            )));
        }

        if cnt > 0 {
            dst[idx..idx + n].copy_from_slice(cursor.read_bytes(n)?);
        } else {
            let b = cursor.read_u8()?;
            dst[idx..idx + n].fill(b);
        }
        idx += n;
        cnt = cursor.read_i16()?;
    }

    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(src: &[u8]) -> Vec<u8> {
        let encoded = compress(src);
        assert_eq!(encoded.len(), compute_num_bytes_rle(src));
        let mut dst = vec![0u8; src.len()];
        let mut cursor = ByteCursor::new(&encoded);
        let n = decompress(&mut cursor, &mut dst).unwrap();
        assert_eq!(n, src.len());
        assert_eq!(cursor.remaining(), 0);
        dst
    }

    #[test]
    fn test_empty() {
        assert_eq!(compress(&[]), vec![0x00, 0x80]);
        assert!(roundtrip(&[]).is_empty());
    }

    #[test]
    fn test_single_byte() {
        assert_eq!(compress(&[0x42]), vec![1, 0, 0x42, 0x00, 0x80]);
        assert_eq!(roundtrip(&[0x42]), vec![0x42]);
    }

    #[test]
    fn test_long_run_compresses() {
        let src = vec![0xFFu8; 1000];
        let encoded = compress(&src);
        assert_eq!(encoded.len(), 2 + 1 + 2);
        assert_eq!(roundtrip(&src), src);
    }

    #[test]
    fn test_short_runs_stay_literal() {
        let src = [1u8, 1, 1, 1, 2, 2, 2, 2, 3];
        // 9 literal bytes in one odd run, plus count and end marker
        assert_eq!(compute_num_bytes_rle(&src), 2 + 9 + 2);
        assert_eq!(roundtrip(&src), src);
    }

    #[test]
    fn test_alternating_pattern() {
        let src: Vec<u8> = (0..5000).map(|i| if i % 2 == 0 { 0x00 } else { 0xFF }).collect();
        assert_eq!(compute_num_bytes_rle(&src), 2 + 5000 + 2);
        assert_eq!(roundtrip(&src), src);
    }

    #[test]
    fn test_mixed_runs() {
        let mut src = Vec::new();
        src.extend_from_slice(&[1, 2, 3]);
        src.extend(std::iter::repeat(0u8).take(40));
        src.extend_from_slice(&[9, 9, 9, 9]);
        src.extend(std::iter::repeat(0xFFu8).take(5));
        src.push(7);
        assert_eq!(roundtrip(&src), src);
    }

    #[test]
    fn test_counts_split_at_cap() {
        let src = vec![0u8; 70_000];
        assert_eq!(roundtrip(&src), src);

        let literal: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
        let encoded = compress(&literal);
        assert_eq!(encoded.len(), 70_000 + 3 * 2 + 2);
        assert_eq!(roundtrip(&literal), literal);
    }

    #[test]
    fn test_truncated_stream_fails() {
        let src: Vec<u8> = (0..100u8).collect();
        let encoded = compress(&src);
        for cut in 0..encoded.len() {
            let mut dst = vec![0u8; src.len()];
            let mut cursor = ByteCursor::new(&encoded[..cut]);
            assert!(decompress(&mut cursor, &mut dst).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_overrun_rejected() {
        let encoded = compress(&[5u8; 64]);
        let mut dst = vec![0u8; 63];
        let mut cursor = ByteCursor::new(&encoded);
        assert!(matches!(
            decompress(&mut cursor, &mut dst),
            Err(LercError::Failed(_))
        ));
    }
}
