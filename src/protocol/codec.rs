//! Record codec
//!
//! Bus request, response and data records are serialized with the format
//! selected in configuration. Both sides of a deployment must agree on it.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::CodecError;

/// Serialization format for records on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Compact binary records (bincode, standard config)
    #[default]
    Bincode,
    /// JSON documents, handy for debugging with the nats CLI
    Json,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Bincode => write!(f, "bincode"),
            WireFormat::Json => write!(f, "json"),
        }
    }
}

impl WireFormat {
    /// Serialize a record
    pub fn encode<T: Serialize>(&self, record: &T) -> Result<Bytes, CodecError> {
        let buf = match self {
            WireFormat::Bincode => {
                bincode::serde::encode_to_vec(record, bincode::config::standard())?
            }
            WireFormat::Json => {
                serde_json::to_vec(record).map_err(|e| CodecError::Encode(e.to_string()))?
            }
        };
        Ok(Bytes::from(buf))
    }

    /// Deserialize a record, rejecting trailing garbage
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        match self {
            WireFormat::Bincode => {
                let (record, read) =
                    bincode::serde::decode_from_slice(data, bincode::config::standard())?;
                if read != data.len() {
                    return Err(CodecError::Decode(format!(
                        "{} trailing bytes after record",
                        data.len() - read
                    )));
                }
                Ok(record)
            }
            WireFormat::Json => {
                serde_json::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
            }
        }
    }
}
