//! Signed blocks and packed transactions.
//!
//! Both types carry an injective little-endian binary encoding; the content
//! id of a value is the Blake2b-256 digest of that encoding. Strings and
//! opaque payloads are length-prefixed with a `u32`.

use crate::{BlockId, ChainError, ChainResult, Digest32, TransactionId};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use bytes::{Buf, BufMut, Bytes, BytesMut};

fn put_bytes(buf: &mut BytesMut, field: &[u8]) {
    buf.put_u32_le(field.len() as u32);
    buf.put_slice(field);
}

fn get_bytes(buf: &mut Bytes, field: &'static str) -> ChainResult<Bytes> {
    if buf.remaining() < 4 {
        return Err(ChainError::Truncated(field));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(ChainError::InvalidLength(field));
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_string(buf: &mut Bytes, field: &'static str) -> ChainResult<String> {
    let bytes = get_bytes(buf, field)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ChainError::InvalidUtf8(field))
}

fn get_digest(buf: &mut Bytes, field: &'static str) -> ChainResult<Digest32> {
    if buf.remaining() < Digest32::LEN {
        return Err(ChainError::Truncated(field));
    }
    let mut bytes = [0u8; 32];
    buf.copy_to_slice(&mut bytes);
    Ok(Digest32(bytes))
}

fn digest_of(encoded: &[u8]) -> Digest32 {
    let hash = Blake2b::<U32>::digest(encoded);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hash);
    Digest32(out)
}

/// A produced block as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlock {
    /// Id of the preceding block.
    pub previous: BlockId,
    /// Height of this block.
    pub number: u32,
    /// Production time, milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Producer name.
    pub producer: String,
    /// Opaque block body.
    pub payload: Bytes,
}

impl SignedBlock {
    /// Content id of this block.
    pub fn id(&self) -> BlockId {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        digest_of(&buf)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.previous.as_bytes());
        buf.put_u32_le(self.number);
        buf.put_u64_le(self.timestamp_ms);
        put_bytes(buf, self.producer.as_bytes());
        put_bytes(buf, &self.payload);
    }

    pub fn decode(buf: &mut Bytes) -> ChainResult<Self> {
        let previous = get_digest(buf, "block previous")?;
        if buf.remaining() < 4 + 8 {
            return Err(ChainError::Truncated("block header"));
        }
        let number = buf.get_u32_le();
        let timestamp_ms = buf.get_u64_le();
        let producer = get_string(buf, "block producer")?;
        let payload = get_bytes(buf, "block payload")?;
        Ok(Self {
            previous,
            number,
            timestamp_ms,
            producer,
            payload,
        })
    }
}

/// A transaction as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedTransaction {
    /// Time after which the transaction is no longer relayed, ms since epoch.
    pub expiration_ms: u64,
    /// Opaque serialized transaction body.
    pub payload: Bytes,
}

impl PackedTransaction {
    /// Content id of this transaction.
    pub fn id(&self) -> TransactionId {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        digest_of(&buf)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.expiration_ms);
        put_bytes(buf, &self.payload);
    }

    pub fn decode(buf: &mut Bytes) -> ChainResult<Self> {
        if buf.remaining() < 8 {
            return Err(ChainError::Truncated("transaction expiration"));
        }
        let expiration_ms = buf.get_u64_le();
        let payload = get_bytes(buf, "transaction payload")?;
        Ok(Self {
            expiration_ms,
            payload,
        })
    }
}
