//! Serialized form of a cache entry.
//!
//! Stored as JSON `{"data", "expiresAt", "tags", "compressed"}`. A compressed
//! entry holds its payload as base64 of the zstd-compressed JSON value.

use crate::error::CacheError;
use base64::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serialized payloads above this many bytes are compressed when enabled.
pub const COMPRESSION_THRESHOLD: usize = 1024;

const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Envelope {
    pub data: Value,
    /// Epoch milliseconds after which the entry is treated as absent.
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub compressed: bool,
}

impl Envelope {
    pub fn new<T: Serialize>(
        value: &T,
        expires_at: u64,
        tags: Vec<String>,
        compress: bool,
    ) -> Result<Self, CacheError> {
        let data = serde_json::to_value(value)?;
        if compress {
            let raw = serde_json::to_vec(&data)?;
            if raw.len() > COMPRESSION_THRESHOLD {
                let packed = zstd::encode_all(raw.as_slice(), COMPRESSION_LEVEL)
                    .map_err(|e| CacheError::Compression(e.to_string()))?;
                return Ok(Self {
                    data: Value::String(BASE64_STANDARD.encode(packed)),
                    expires_at,
                    tags,
                    compressed: true,
                });
            }
        }
        Ok(Self {
            data,
            expires_at,
            tags,
            compressed: false,
        })
    }

    pub fn decode(key: &str, raw: &str) -> Result<Self, CacheError> {
        serde_json::from_str(raw).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    pub fn encode(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }

    /// Decodes the payload, decompressing it first if needed.
    pub fn into_value<T: DeserializeOwned>(self, key: &str) -> Result<T, CacheError> {
        let corrupt = |message: String| CacheError::Corrupt {
            key: key.to_string(),
            message,
        };
        if !self.compressed {
            return serde_json::from_value(self.data).map_err(|e| corrupt(e.to_string()));
        }
        let Value::String(encoded) = self.data else {
            return Err(corrupt("compressed payload is not a string".to_string()));
        };
        let packed = BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| corrupt(e.to_string()))?;
        let raw = zstd::decode_all(packed.as_slice()).map_err(|e| corrupt(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))
    }
}
