//! Pluggable snapshot encoding across the byte boundary.
//!
//! # Responsibility
//! - Serialize entity snapshots to bytes and back for the storage layer.
//! - Offer a compact binary default and a human-readable alternative.
//!
//! # Invariants
//! - Swapping codecs never changes entity semantics.
//! - Field names are stable across save/load round trips for a given codec
//!   (the binary codec therefore writes named maps, not positional arrays).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CodecResult<T> = Result<T, CodecError>;

/// Encode/decode failures at the byte boundary.
#[derive(Debug)]
pub enum CodecError {
    /// Decode was handed an empty byte slice.
    EmptyInput,
    Encode {
        codec: &'static str,
        message: String,
    },
    Decode {
        codec: &'static str,
        message: String,
    },
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "cannot decode empty input"),
            Self::Encode { codec, message } => {
                write!(f, "{codec} encode failed: {message}")
            }
            Self::Decode { codec, message } => {
                write!(f, "{codec} decode failed: {message}")
            }
        }
    }
}

impl Error for CodecError {}

/// Snapshot codec selection.
///
/// `MessagePack` is the production default; `Json` exists for debugging and
/// fixture inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    MessagePack,
    Json,
}

impl Codec {
    /// Stable format name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::MessagePack => "messagepack",
            Self::Json => "json",
        }
    }

    pub fn encode<T>(self, value: &T) -> CodecResult<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        match self {
            Self::MessagePack => rmp_serde::to_vec_named(value).map_err(|err| CodecError::Encode {
                codec: self.name(),
                message: err.to_string(),
            }),
            Self::Json => serde_json::to_vec(value).map_err(|err| CodecError::Encode {
                codec: self.name(),
                message: err.to_string(),
            }),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> CodecResult<T> {
        if bytes.is_empty() {
            return Err(CodecError::EmptyInput);
        }

        match self {
            Self::MessagePack => rmp_serde::from_slice(bytes).map_err(|err| CodecError::Decode {
                codec: self.name(),
                message: err.to_string(),
            }),
            Self::Json => serde_json::from_slice(bytes).map_err(|err| CodecError::Decode {
                codec: self.name(),
                message: err.to_string(),
            }),
        }
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::{Codec, CodecError};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: String,
        version: i64,
        active: bool,
    }

    fn sample() -> Sample {
        Sample {
            id: "c-1".to_string(),
            version: 4,
            active: true,
        }
    }

    #[test]
    fn messagepack_roundtrip_preserves_fields() {
        let encoded = Codec::MessagePack.encode(&sample()).expect("encode");
        let decoded: Sample = Codec::MessagePack.decode(&encoded).expect("decode");
        assert_eq!(decoded, sample());
    }

    #[test]
    fn json_roundtrip_is_human_readable() {
        let encoded = Codec::Json.encode(&sample()).expect("encode");
        let text = String::from_utf8(encoded.clone()).expect("json is utf-8");
        assert!(text.contains("\"version\""));

        let decoded: Sample = Codec::Json.decode(&encoded).expect("decode");
        assert_eq!(decoded, sample());
    }

    #[test]
    fn decode_rejects_empty_input() {
        for codec in [Codec::MessagePack, Codec::Json] {
            let err = codec.decode::<Sample>(&[]).expect_err("empty must fail");
            assert!(matches!(err, CodecError::EmptyInput));
        }
    }

    #[test]
    fn decode_rejects_malformed_bytes() {
        let garbage = [0xff, 0x00, 0x13, 0x37];
        for codec in [Codec::MessagePack, Codec::Json] {
            let err = codec
                .decode::<Sample>(&garbage)
                .expect_err("garbage must fail");
            assert!(matches!(err, CodecError::Decode { .. }));
        }
    }

    #[test]
    fn codecs_report_stable_names() {
        assert_eq!(Codec::MessagePack.name(), "messagepack");
        assert_eq!(Codec::Json.name(), "json");
        assert_eq!(Codec::default(), Codec::MessagePack);
    }
}
