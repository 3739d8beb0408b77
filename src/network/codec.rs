//! Codec Boundary
//!
//! Byte encoding is pluggable: this layer only calls `encode` and
//! `decode`. JSON is the wire default; bincode is available for compact
//! snapshots. Internally tagged enums (the wire messages) only round-trip
//! through JSON.

use std::fmt;
use std::str::FromStr;
use serde::{de::DeserializeOwned, Serialize, Deserialize};
use thiserror::Error;

use crate::error::{ErrorKind, SerializationFault};

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Value could not be encoded.
    #[error("{codec} encode failed: {message}")]
    Encode {
        /// Codec name.
        codec: &'static str,
        /// Underlying error.
        message: String,
    },
    /// Bytes could not be decoded.
    #[error("{codec} decode failed: {message}")]
    Decode {
        /// Codec name.
        codec: &'static str,
        /// Underlying error.
        message: String,
    },
    /// Unknown codec name in configuration.
    #[error("unknown codec: {0}")]
    UnknownCodec(String),
}

impl CodecError {
    /// Taxonomy kind.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            CodecError::Encode { .. } => ErrorKind::Serialization(SerializationFault::Encode),
            CodecError::Decode { .. } => ErrorKind::Serialization(SerializationFault::Decode),
            CodecError::UnknownCodec(_) => ErrorKind::Serialization(SerializationFault::VersionMismatch),
        }
    }
}

/// Opaque byte codec.
pub trait Codec: Send + Sync {
    /// Short name.
    fn name(&self) -> &'static str;

    /// Encode a value.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode a value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// serde_json codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

/// bincode codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::Encode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

/// Codec selected by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireCodec {
    /// JSON.
    #[default]
    Json,
    /// bincode.
    Bincode,
}

impl Codec for WireCodec {
    fn name(&self) -> &'static str {
        match self {
            WireCodec::Json => JsonCodec.name(),
            WireCodec::Bincode => BincodeCodec.name(),
        }
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            WireCodec::Json => JsonCodec.encode(value),
            WireCodec::Bincode => BincodeCodec.encode(value),
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            WireCodec::Json => JsonCodec.decode(bytes),
            WireCodec::Bincode => BincodeCodec.decode(bytes),
        }
    }
}

impl FromStr for WireCodec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(WireCodec::Json),
            "bincode" => Ok(WireCodec::Bincode),
            other => Err(CodecError::UnknownCodec(other.to_string())),
        }
    }
}

impl fmt::Display for WireCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ParticipantId;
    use crate::security::table::{Card, TableState, ZoneKind};

    #[test]
    fn test_table_through_both_codecs() {
        let alice = ParticipantId::new([1; 16]);
        let mut table = TableState::new(&[alice]);
        table.cards.push(Card::new(1, "Opt", alice, ZoneKind::Hand).with_attribute("cost", "U"));

        for codec in [WireCodec::Json, WireCodec::Bincode] {
            let bytes = codec.encode(&table).unwrap();
            let back: TableState = codec.decode(&bytes).unwrap();
            assert_eq!(back, table, "{codec}");
        }
    }

    #[test]
    fn test_decode_error_kind() {
        let err = JsonCodec.decode::<TableState>(b"{oops").unwrap_err();
        assert!(matches!(err, CodecError::Decode { codec: "json", .. }));
        assert_eq!(err.error_kind(), ErrorKind::Serialization(SerializationFault::Decode));

        let err = BincodeCodec.decode::<TableState>(&[1, 2]).unwrap_err();
        assert!(matches!(err, CodecError::Decode { codec: "bincode", .. }));
    }

    #[test]
    fn test_parse_codec_name() {
        assert_eq!("JSON".parse::<WireCodec>(), Ok(WireCodec::Json));
        assert_eq!("bincode".parse::<WireCodec>(), Ok(WireCodec::Bincode));
        assert!(matches!("msgpack".parse::<WireCodec>(), Err(CodecError::UnknownCodec(_))));
    }
}
