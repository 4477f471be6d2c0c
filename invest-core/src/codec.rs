//! Record codecs for the local store.
//!
//! Record layout written by [`RecordCodec`]:
//!
//! ```text
//! +-------+---------+----------------+-------------+-----------------+
//! | "IVR" | version | blake3(payload) | len (u64 LE) | payload (JSON) |
//! | 3 B   | 1 B     | 32 B            | 8 B          | len B          |
//! +-------+---------+----------------+-------------+-----------------+
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAGIC: &[u8; 3] = b"IVR";
const VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1 + 32 + 8;

/// Why a record could not be decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bad magic bytes")]
    BadMagic,

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),

    #[error("truncated record: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Encodes values to bytes and back.
pub trait Codec<T>: Send + Sync {
    /// File extension for records written with this codec.
    fn extension(&self) -> &str;

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Versioned, checksummed binary envelope around a JSON payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for RecordCodec {
    fn extension(&self) -> &str {
        "rec"
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let payload = serde_json::to_vec(value)?;
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(blake3::hash(&payload).as_bytes());
        out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if &bytes[..3] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        if bytes[3] != VERSION {
            return Err(CodecError::UnsupportedVersion(bytes[3]));
        }

        let digest = &bytes[4..36];
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[36..HEADER_LEN]);
        let len = u64::from_le_bytes(len_bytes) as usize;

        let payload = &bytes[HEADER_LEN..];
        if payload.len() != len {
            return Err(CodecError::Truncated {
                expected: HEADER_LEN.saturating_add(len),
                actual: bytes.len(),
            });
        }
        if blake3::hash(payload).as_bytes() != digest {
            return Err(CodecError::ChecksumMismatch);
        }

        Ok(serde_json::from_slice(payload)?)
    }
}

/// Plain pretty-printed JSON, for stores meant to be read by humans.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec {
    fn extension(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// On-disk format selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFormat {
    #[default]
    Record,
    Json,
}

impl<T: Serialize + DeserializeOwned> Codec<T> for StoreFormat {
    fn extension(&self) -> &str {
        match self {
            StoreFormat::Record => Codec::<T>::extension(&RecordCodec),
            StoreFormat::Json => Codec::<T>::extension(&JsonCodec),
        }
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            StoreFormat::Record => RecordCodec.encode(value),
            StoreFormat::Json => JsonCodec.encode(value),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            StoreFormat::Record => RecordCodec.decode(bytes),
            StoreFormat::Json => JsonCodec.decode(bytes),
        }
    }
}
