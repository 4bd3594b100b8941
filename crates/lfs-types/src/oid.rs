use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::TypeError;

/// Length of an [`Oid`] in raw bytes (SHA-256).
pub const OID_LEN: usize = 32;

/// Content identifier for a stored object.
///
/// An `Oid` is the SHA-256 digest of an object's bytes. It is both the
/// object's identity on the wire and its key in the local store, so two
/// objects with the same `Oid` are the same object regardless of the name
/// they were added under.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; OID_LEN]);

impl Oid {
    /// Compute the `Oid` of an in-memory buffer.
    pub fn digest(data: &[u8]) -> Self {
        let mut out = [0u8; OID_LEN];
        out.copy_from_slice(&Sha256::digest(data));
        Self(out)
    }

    /// Create an `Oid` from a pre-computed digest.
    pub fn from_hash(hash: [u8; OID_LEN]) -> Self {
        Self(hash)
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; OID_LEN] {
        &self.0
    }

    /// Lowercase hex representation (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// The two shard directory names for this id: hex characters `0..2`
    /// and `2..4`.
    pub fn shard(&self) -> (String, String) {
        (hex::encode(&self.0[..1]), hex::encode(&self.0[1..2]))
    }

    /// Parse from a hex string. Upper-case digits are accepted.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != OID_LEN {
            return Err(TypeError::InvalidLength {
                expected: OID_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; OID_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.short_hex())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Oid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; OID_LEN]> for Oid {
    fn from(bytes: [u8; OID_LEN]) -> Self {
        Self(bytes)
    }
}

// On the wire an oid is always its hex string.
impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
