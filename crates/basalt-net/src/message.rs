//! P2P wire messages.
//!
//! Every message is a single discriminant byte followed by the variant body.
//! Integers are little-endian; strings are `u32` length-prefixed UTF-8;
//! digests are 32 raw bytes.

use crate::{NetError, NetResult};
use basalt_chain::{
    BlockId, ChainId, Digest32, NodeId, PackedTransaction, SignedBlock, TransactionId,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;

/// Handshake message, sent once by each side when a connection comes up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Network protocol revision.
    pub network_version: i16,
    /// Chain this node is on.
    pub chain_id: ChainId,
    /// Identifies the peer and prevents self-connects.
    pub node_id: NodeId,
    /// Externally reachable endpoint of the sender.
    pub p2p_address: String,
    /// Operating system of the sender.
    pub os: String,
    /// Agent string of the sender.
    pub agent: String,
}

/// Why a peer is terminating the relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GoodbyeReason {
    /// No reason given.
    NoReason = 0,
    /// The connection is to ourselves.
    SelfConnect = 1,
    /// The connection is redundant.
    Duplicate = 2,
    /// The peer's chain id doesn't match.
    WrongChain = 3,
    /// The peer's network version doesn't match.
    WrongVersion = 4,
    /// The peer's irreversible blocks are different.
    Forked = 5,
    /// The peer sent a block we couldn't link.
    Unlinkable = 6,
    /// The peer sent a transaction that failed verification.
    BadTransaction = 7,
    /// The peer sent a block that failed validation.
    Validation = 8,
    /// A non-fatal condition such as a timeout.
    BenignOther = 9,
    /// A catch-all for undiscriminated failures.
    FatalOther = 10,
    /// The peer failed authentication.
    Authentication = 11,
}

impl GoodbyeReason {
    /// Short human-readable description.
    pub fn as_str(&self) -> &'static str {
        match self {
            GoodbyeReason::NoReason => "no reason",
            GoodbyeReason::SelfConnect => "self connect",
            GoodbyeReason::Duplicate => "duplicate",
            GoodbyeReason::WrongChain => "wrong chain",
            GoodbyeReason::WrongVersion => "wrong version",
            GoodbyeReason::Forked => "chain is forked",
            GoodbyeReason::Unlinkable => "unlinkable block received",
            GoodbyeReason::BadTransaction => "bad transaction",
            GoodbyeReason::Validation => "invalid block",
            GoodbyeReason::BenignOther => "some other non-fatal condition",
            GoodbyeReason::FatalOther => "some other failure",
            GoodbyeReason::Authentication => "authentication failure",
        }
    }

    fn from_u8(value: u8) -> NetResult<Self> {
        Ok(match value {
            0 => GoodbyeReason::NoReason,
            1 => GoodbyeReason::SelfConnect,
            2 => GoodbyeReason::Duplicate,
            3 => GoodbyeReason::WrongChain,
            4 => GoodbyeReason::WrongVersion,
            5 => GoodbyeReason::Forked,
            6 => GoodbyeReason::Unlinkable,
            7 => GoodbyeReason::BadTransaction,
            8 => GoodbyeReason::Validation,
            9 => GoodbyeReason::BenignOther,
            10 => GoodbyeReason::FatalOther,
            11 => GoodbyeReason::Authentication,
            _ => return Err(NetError::Decode(format!("unknown goodbye reason {value}"))),
        })
    }
}

impl std::fmt::Display for GoodbyeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chain heartbeat, sent periodically while connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Highest block number the sender considers final.
    pub last_irreversible_block_number: u32,
    /// Tip of the sender's preferred fork.
    pub head_block_id: BlockId,
}

/// The tagged wire-message union.
#[derive(Debug, Clone)]
pub enum Message {
    /// Handshake.
    Hello(Hello),
    /// Terminate with a reason.
    Goodbye {
        reason: GoodbyeReason,
        node_id: NodeId,
    },
    /// Chain heartbeat.
    Status(Status),
    /// Request the broadcast feed.
    Subscribe,
    /// Cease the broadcast feed.
    Unsubscribe,
    /// Reject a subscription.
    SubscriptionRefused,
    /// Block acknowledgment (reserved).
    BlockReceived { block_id: BlockId },
    /// Transaction acknowledgment (reserved).
    TransactionReceived { transaction_id: TransactionId },
    /// Full signed block.
    Block(Arc<SignedBlock>),
    /// Packed transaction.
    Transaction(Arc<PackedTransaction>),
}

const TAG_HELLO: u8 = 0;
const TAG_GOODBYE: u8 = 1;
const TAG_STATUS: u8 = 2;
const TAG_SUBSCRIBE: u8 = 3;
const TAG_UNSUBSCRIBE: u8 = 4;
const TAG_SUBSCRIPTION_REFUSED: u8 = 5;
const TAG_BLOCK_RECEIVED: u8 = 6;
const TAG_TRANSACTION_RECEIVED: u8 = 7;
const TAG_BLOCK: u8 = 8;
const TAG_TRANSACTION: u8 = 9;

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn get_string(buf: &mut Bytes, field: &'static str) -> NetResult<String> {
    if buf.remaining() < 4 {
        return Err(NetError::Decode(format!("truncated {field}")));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(NetError::Decode(format!("bad length for {field}")));
    }
    String::from_utf8(buf.copy_to_bytes(len).to_vec())
        .map_err(|_| NetError::Decode(format!("invalid utf-8 in {field}")))
}

fn get_digest(buf: &mut Bytes, field: &'static str) -> NetResult<Digest32> {
    if buf.remaining() < Digest32::LEN {
        return Err(NetError::Decode(format!("truncated {field}")));
    }
    let mut bytes = [0u8; 32];
    buf.copy_to_slice(&mut bytes);
    Ok(Digest32(bytes))
}

impl Message {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Hello(_) => "hello",
            Message::Goodbye { .. } => "goodbye",
            Message::Status(_) => "status",
            Message::Subscribe => "subscribe",
            Message::Unsubscribe => "unsubscribe",
            Message::SubscriptionRefused => "subscription_refused",
            Message::BlockReceived { .. } => "block_received",
            Message::TransactionReceived { .. } => "transaction_received",
            Message::Block(_) => "block",
            Message::Transaction(_) => "transaction",
        }
    }

    /// Encode the message, discriminant byte included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Message::Hello(hello) => {
                buf.put_u8(TAG_HELLO);
                buf.put_i16_le(hello.network_version);
                buf.put_slice(hello.chain_id.as_bytes());
                buf.put_slice(hello.node_id.as_bytes());
                put_string(&mut buf, &hello.p2p_address);
                put_string(&mut buf, &hello.os);
                put_string(&mut buf, &hello.agent);
            }
            Message::Goodbye { reason, node_id } => {
                buf.put_u8(TAG_GOODBYE);
                buf.put_u8(*reason as u8);
                buf.put_slice(node_id.as_bytes());
            }
            Message::Status(status) => {
                buf.put_u8(TAG_STATUS);
                buf.put_u32_le(status.last_irreversible_block_number);
                buf.put_slice(status.head_block_id.as_bytes());
            }
            Message::Subscribe => buf.put_u8(TAG_SUBSCRIBE),
            Message::Unsubscribe => buf.put_u8(TAG_UNSUBSCRIBE),
            Message::SubscriptionRefused => buf.put_u8(TAG_SUBSCRIPTION_REFUSED),
            Message::BlockReceived { block_id } => {
                buf.put_u8(TAG_BLOCK_RECEIVED);
                buf.put_slice(block_id.as_bytes());
            }
            Message::TransactionReceived { transaction_id } => {
                buf.put_u8(TAG_TRANSACTION_RECEIVED);
                buf.put_slice(transaction_id.as_bytes());
            }
            Message::Block(block) => {
                buf.put_u8(TAG_BLOCK);
                block.encode(&mut buf);
            }
            Message::Transaction(tx) => {
                buf.put_u8(TAG_TRANSACTION);
                tx.encode(&mut buf);
            }
        }
        buf.freeze()
    }

    /// Decode a message from a full frame body, discriminant byte included.
    pub fn decode(mut bytes: Bytes) -> NetResult<Self> {
        if bytes.is_empty() {
            return Err(NetError::Decode("empty frame".to_string()));
        }
        let tag = bytes.get_u8();
        let message = match tag {
            TAG_HELLO => {
                if bytes.remaining() < 2 {
                    return Err(NetError::Decode("truncated hello".to_string()));
                }
                let network_version = bytes.get_i16_le();
                let chain_id = get_digest(&mut bytes, "chain id")?;
                let node_id = get_digest(&mut bytes, "node id")?;
                let p2p_address = get_string(&mut bytes, "p2p address")?;
                let os = get_string(&mut bytes, "os")?;
                let agent = get_string(&mut bytes, "agent")?;
                Message::Hello(Hello {
                    network_version,
                    chain_id,
                    node_id,
                    p2p_address,
                    os,
                    agent,
                })
            }
            TAG_GOODBYE => {
                if bytes.remaining() < 1 {
                    return Err(NetError::Decode("truncated goodbye".to_string()));
                }
                let reason = GoodbyeReason::from_u8(bytes.get_u8())?;
                let node_id = get_digest(&mut bytes, "node id")?;
                Message::Goodbye { reason, node_id }
            }
            TAG_STATUS => {
                if bytes.remaining() < 4 {
                    return Err(NetError::Decode("truncated status".to_string()));
                }
                let last_irreversible_block_number = bytes.get_u32_le();
                let head_block_id = get_digest(&mut bytes, "head block id")?;
                Message::Status(Status {
                    last_irreversible_block_number,
                    head_block_id,
                })
            }
            TAG_SUBSCRIBE => Message::Subscribe,
            TAG_UNSUBSCRIBE => Message::Unsubscribe,
            TAG_SUBSCRIPTION_REFUSED => Message::SubscriptionRefused,
            TAG_BLOCK_RECEIVED => Message::BlockReceived {
                block_id: get_digest(&mut bytes, "block id")?,
            },
            TAG_TRANSACTION_RECEIVED => Message::TransactionReceived {
                transaction_id: get_digest(&mut bytes, "transaction id")?,
            },
            TAG_BLOCK => Message::Block(Arc::new(SignedBlock::decode(&mut bytes)?)),
            TAG_TRANSACTION => {
                Message::Transaction(Arc::new(PackedTransaction::decode(&mut bytes)?))
            }
            _ => return Err(NetError::Decode(format!("unknown message tag {tag}"))),
        };
        Ok(message)
    }
}
