//! 32-byte content digests.

use std::fmt;

/// An opaque 32-byte digest, usable as a map key and totally ordered.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest32(pub [u8; 32]);

/// Content hash identifying a block.
pub type BlockId = Digest32;

/// Content hash identifying a transaction.
pub type TransactionId = Digest32;

/// Identifier of a chain (genesis digest).
pub type ChainId = Digest32;

/// Identifier of a node, used to detect self-connects and duplicates.
pub type NodeId = Digest32;

impl Digest32 {
    pub const LEN: usize = 32;

    /// The all-zero digest.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = slice.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl From<[u8; 32]> for Digest32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Digest32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form, enough to tell ids apart in logs
        write!(f, "{}..", hex::encode(&self.0[..6]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_total() {
        let a = Digest32([1u8; 32]);
        let b = Digest32([2u8; 32]);
        assert!(a < b);
        assert_eq!(a.max(b), b);
    }

    #[test]
    fn test_from_slice() {
        assert!(Digest32::from_slice(&[0u8; 31]).is_none());
        let d = Digest32::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(d, Digest32([7u8; 32]));
    }

    #[test]
    fn test_display_is_hex() {
        let d = Digest32([0xabu8; 32]);
        assert_eq!(d.to_string().len(), 64);
        assert!(d.to_string().starts_with("abab"));
    }
}
