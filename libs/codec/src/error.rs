//! Codec errors with enough context to name the field at fault.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// The stream ran out of bytes while reading a named field.
    #[error("invalid read at {field}: need {need} bytes, {remaining} remaining")]
    ShortRead {
        field: &'static str,
        need: usize,
        remaining: usize,
    },

    /// The buffer ran out of space while writing a named field.
    #[error("invalid write at {field}: need {need} bytes, {remaining} remaining")]
    ShortWrite {
        field: &'static str,
        need: usize,
        remaining: usize,
    },

    /// A version gate rejected the input.
    #[error("unknown {format} version: {version}")]
    UnknownVersion { format: &'static str, version: u32 },

    /// A length prefix exceeded its allowed maximum.
    #[error("{field} length {got} exceeds limit {limit}")]
    LengthOverflow {
        field: &'static str,
        got: usize,
        limit: usize,
    },

    /// A tagged value (address family, enum byte) was not recognized.
    #[error("invalid {field} value: {value}")]
    InvalidValue { field: &'static str, value: u64 },
}

pub type CodecResult<T> = Result<T, CodecError>;
