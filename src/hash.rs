//! Content addressing
//!
//! A `Hash` is a fixed-width content address produced by a `HashSpec` over
//! the canonical serialization of an entry or header. The text form is
//! multibase: an `f` prefix followed by lowercase hex.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Digest width in bytes.
pub const HASH_LEN: usize = 32;

/// Multibase prefix for lowercase hex.
const MULTIBASE_HEX: char = 'f';

/// A fixed-width content address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", MULTIBASE_HEX, hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form for logs
        write!(f, "Hash({}{}…)", MULTIBASE_HEX, &hex::encode(self.0)[..8])
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix(MULTIBASE_HEX)
            .ok_or_else(|| Error::InvalidHash(format!("missing multibase prefix: {s}")))?;
        let bytes = hex::decode(body).map_err(|e| Error::InvalidHash(e.to_string()))?;
        let arr: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidHash(format!("wrong length: {s}")))?;
        Ok(Hash(arr))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// The configured hash algorithm of a DNA. All peers of a DNA must agree on
/// it for content addresses to line up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSpec {
    pub algorithm: String,
}

impl HashSpec {
    pub fn sha2_256() -> Self {
        HashSpec {
            algorithm: "sha2-256".to_string(),
        }
    }

    /// Hash raw bytes under this spec.
    pub fn sum(&self, bytes: &[u8]) -> Result<Hash> {
        match self.algorithm.as_str() {
            "sha2-256" => {
                let digest = Sha256::digest(bytes);
                Ok(Hash(digest.into()))
            }
            other => Err(Error::UnknownHashAlgorithm(other.to_string())),
        }
    }
}

impl Default for HashSpec {
    fn default() -> Self {
        Self::sha2_256()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_is_deterministic() {
        let spec = HashSpec::default();
        let a = spec.sum(b"hello").unwrap();
        let b = spec.sum(b"hello").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, spec.sum(b"world").unwrap());
    }

    #[test]
    fn test_text_roundtrip() {
        let spec = HashSpec::default();
        let h = spec.sum(b"hello").unwrap();
        let text = h.to_string();
        assert!(text.starts_with('f'));
        assert_eq!(text.len(), 1 + HASH_LEN * 2);
        let parsed: Hash = text.parse().unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Hash>().is_err());
        assert!("zdeadbeef".parse::<Hash>().is_err());
        assert!("fdeadbeef".parse::<Hash>().is_err()); // too short
    }

    #[test]
    fn test_unknown_algorithm() {
        let spec = HashSpec {
            algorithm: "md5".to_string(),
        };
        assert!(matches!(
            spec.sum(b"x"),
            Err(Error::UnknownHashAlgorithm(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let spec = HashSpec::default();
        let h = spec.sum(b"hello").unwrap();
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
