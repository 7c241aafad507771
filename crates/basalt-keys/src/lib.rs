//! # basalt-keys
//!
//! Text formatting and parsing of secp256k1 public keys.
//!
//! A key renders as `K1_<hex>` where the hex body is the 33-byte compressed
//! SEC1 point followed by a 4-byte checksum. The checksum is the leading four
//! bytes of Blake2b-256 over the point bytes and the type prefix, so a key
//! pasted under the wrong prefix fails to parse.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use k256::ecdsa::VerifyingKey;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Type prefix for secp256k1 keys.
const K1_PREFIX: &str = "K1";

/// Length of a compressed SEC1 point.
const POINT_LEN: usize = 33;

/// Length of the trailing checksum.
const CHECKSUM_LEN: usize = 4;

/// Key parse/format errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    /// Missing or unknown type prefix.
    #[error("Unknown key prefix in {0}")]
    UnknownPrefix(String),

    /// The hex body failed to decode or has the wrong length.
    #[error("Malformed key body")]
    MalformedBody,

    /// The checksum does not match the key bytes.
    #[error("Key checksum mismatch")]
    ChecksumMismatch,

    /// The bytes do not describe a valid curve point.
    #[error("Invalid public key point")]
    InvalidPoint,
}

fn checksum(point: &[u8], prefix: &str) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(point);
    hasher.update(prefix.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// A secp256k1 public key with a checksummed text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Wrap a verifying key.
    pub fn new(key: VerifyingKey) -> Self {
        Self(key)
    }

    /// Parse from raw SEC1 bytes, compressed or uncompressed.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidPoint)
    }

    /// The 33-byte compressed point.
    pub fn to_bytes(&self) -> [u8; POINT_LEN] {
        let point = self.0.to_encoded_point(true);
        let mut out = [0u8; POINT_LEN];
        out.copy_from_slice(point.as_bytes());
        out
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let point = self.to_bytes();
        let check = checksum(&point, K1_PREFIX);
        let mut body = Vec::with_capacity(POINT_LEN + CHECKSUM_LEN);
        body.extend_from_slice(&point);
        body.extend_from_slice(&check);
        write!(f, "{}_{}", K1_PREFIX, hex::encode(body))
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let body = text
            .strip_prefix(K1_PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
            .ok_or_else(|| KeyError::UnknownPrefix(text.to_string()))?;

        let bytes = hex::decode(body).map_err(|_| KeyError::MalformedBody)?;
        if bytes.len() != POINT_LEN + CHECKSUM_LEN {
            return Err(KeyError::MalformedBody);
        }
        let (point, check) = bytes.split_at(POINT_LEN);
        if checksum(point, K1_PREFIX) != check[..] {
            return Err(KeyError::ChecksumMismatch);
        }
        Self::from_sec1_bytes(point)
    }
}
