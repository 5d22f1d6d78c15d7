//! Error types for LERC encoding/decoding operations.

use thiserror::Error;

/// Coarse error classification exposed to host applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid dimensions, unsupported data type, or a bad error bound.
    WrongParam,
    /// Internal inconsistency or a malformed / corrupt blob.
    Failed,
    /// The destination buffer cannot hold the result.
    BufferTooSmall,
    /// A valid pixel holds a non-finite float value.
    NaN,
}

/// Errors that can occur during LERC operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LercError {
    /// A caller-supplied parameter is invalid.
    #[error("wrong parameter: {0}")]
    WrongParam(String),

    /// The operation failed, usually because the blob is malformed.
    #[error("lerc failed: {0}")]
    Failed(String),

    /// The Fletcher-32 checksum stored in the header does not match the blob.
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum read from the header.
        stored: u32,
        /// Checksum computed over the blob.
        computed: u32,
    },

    /// A read would run past the end of the input.
    #[error("unexpected end of data: needed {needed} bytes, only {available} available")]
    UnexpectedEof {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the input.
        available: usize,
    },

    /// The destination buffer is too small.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// A valid pixel of a float raster is NaN or infinite.
    #[error("non-finite value at index {index}")]
    NaN {
        /// Flat index of the offending value.
        index: usize,
    },
}

impl LercError {
    /// Shorthand for a [`LercError::Failed`] with a message.
    pub(crate) fn failed(msg: impl Into<String>) -> Self {
        LercError::Failed(msg.into())
    }

    /// Shorthand for a [`LercError::WrongParam`] with a message.
    pub(crate) fn wrong_param(msg: impl Into<String>) -> Self {
        LercError::WrongParam(msg.into())
    }

    /// Map this error onto the four-way [`ErrorCode`] taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            LercError::WrongParam(_) => ErrorCode::WrongParam,
            LercError::Failed(_)
            | LercError::ChecksumMismatch { .. }
            | LercError::UnexpectedEof { .. } => ErrorCode::Failed,
            LercError::BufferTooSmall { .. } => ErrorCode::BufferTooSmall,
            LercError::NaN { .. } => ErrorCode::NaN,
        }
    }
}
