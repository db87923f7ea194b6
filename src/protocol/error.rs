//! Codec error types

use std::fmt;

/// Errors raised while encoding or decoding bus records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The record could not be serialized
    Encode(String),
    /// The bytes are not a valid record of the expected type
    Decode(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "encode failed: {}", msg),
            Self::Decode(msg) => write!(f, "decode failed: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<bincode::error::EncodeError> for CodecError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for CodecError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Decode(err.to_string())
    }
}
