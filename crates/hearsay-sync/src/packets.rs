//! Sync wire packets.
//!
//! Packets are exchanged between contacts over whatever transport connects
//! them. They are encoded as CBOR.

use std::io::{self, Write};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use hearsay_core::{BatchId, Group, Message, MessageId, TransportProperties};

use crate::error::{Result, SyncError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Packet size limits.
pub mod limits {
    /// Max encoded size of any packet.
    pub const MAX_PACKET_LENGTH: usize = 1024 * 1024;
    /// Max batch IDs in one Ack.
    pub const MAX_ACK_IDS: usize = 1000;
    /// Max message IDs in one Offer (and so bits in one Request).
    pub const MAX_OFFER_IDS: usize = 1000;
    /// Max groups in one subscription update.
    pub const MAX_GROUPS: usize = 5000;
    /// Max properties in one transport update.
    pub const MAX_PROPERTIES: usize = 100;
}

/// Sync protocol packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Ack(Ack),
    Batch(Batch),
    Offer(Offer),
    Request(Request),
    Subscriptions(SubscriptionUpdate),
    Transports(TransportUpdate),
}

/// Batches the sender has received in full.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub batches: Vec<BatchId>,
}

/// Random bytes that make each transmitted batch's ID unique.
pub type BatchNonce = [u8; 16];

/// Raw messages sent together.
///
/// A resend of the same messages carries a fresh nonce, so an ack for the
/// earlier transmission never matches the later one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub nonce: BatchNonce,
    pub messages: Vec<Bytes>,
}

impl Batch {
    /// The batch's content address.
    pub fn id(&self) -> io::Result<BatchId> {
        batch_id(&self.nonce, &self.messages)
    }
}

/// Compute the ID of a batch carrying `messages`, in order, under `nonce`.
pub fn batch_id(nonce: &BatchNonce, messages: &[Bytes]) -> io::Result<BatchId> {
    let mut body = Vec::new();
    ciborium::into_writer(&(nonce, messages), &mut body).map_err(cbor_to_io)?;
    Ok(BatchId::for_body(&body))
}

/// Message IDs the sender could send. Order defines Request bit indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub ids: Vec<MessageId>,
}

/// Which offered messages the sender wants: bit `i` set means "send
/// offered message `i`". Bits are packed MSB-first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    length: u32,
    bitmap: Vec<u8>,
}

impl Request {
    /// Build a request from one flag per offered message.
    pub fn from_bits(bits: &[bool]) -> Self {
        let mut bitmap = vec![0u8; bits.len().div_ceil(8)];
        for (i, _) in bits.iter().enumerate().filter(|(_, b)| **b) {
            bitmap[i / 8] |= 0x80 >> (i % 8);
        }
        Self {
            length: bits.len() as u32,
            bitmap,
        }
    }

    /// Number of offered messages this request answers.
    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether offered message `i` is requested. Out-of-range indices are not.
    pub fn is_requested(&self, i: usize) -> bool {
        i < self.len()
            && self
                .bitmap
                .get(i / 8)
                .map_or(false, |byte| byte & (0x80 >> (i % 8)) != 0)
    }

    /// Number of requested messages.
    pub fn count(&self) -> usize {
        (0..self.len()).filter(|i| self.is_requested(*i)).count()
    }

    /// The requested IDs of the offer this request answers, in offer order.
    pub fn requested_ids(&self, offer: &Offer) -> Result<Vec<MessageId>> {
        if offer.ids.len() != self.len() {
            return Err(SyncError::ProtocolViolation(format!(
                "request has {} bits for an offer of {} ids",
                self.len(),
                offer.ids.len()
            )));
        }
        Ok(offer
            .ids
            .iter()
            .enumerate()
            .filter(|(i, _)| self.is_requested(*i))
            .map(|(_, id)| *id)
            .collect())
    }

    fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.len() > limits::MAX_OFFER_IDS {
            return Err("too many request bits");
        }
        if self.bitmap.len() != self.len().div_ceil(8) {
            return Err("request bitmap length does not match bit count");
        }
        Ok(())
    }
}

impl std::fmt::Display for Request {
    /// Bits as a string of `0`s and `1`s, offer order.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.len() {
            f.write_str(if self.is_requested(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// A peer's subscription set, versioned by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    pub groups: Vec<Group>,
    pub timestamp: i64,
}

/// A peer's transport properties, versioned by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportUpdate {
    pub properties: TransportProperties,
    pub timestamp: i64,
}

impl Packet {
    /// Check if this packet respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        match self {
            Packet::Ack(ack) => {
                if ack.batches.len() > limits::MAX_ACK_IDS {
                    return Err("too many ack IDs");
                }
            }
            Packet::Batch(_) => {}
            Packet::Offer(offer) => {
                if offer.ids.len() > limits::MAX_OFFER_IDS {
                    return Err("too many offered IDs");
                }
            }
            Packet::Request(request) => request.validate()?,
            Packet::Subscriptions(update) => {
                if update.groups.len() > limits::MAX_GROUPS {
                    return Err("too many groups");
                }
            }
            Packet::Transports(update) => {
                if update.properties.len() > limits::MAX_PROPERTIES {
                    return Err("too many transport properties");
                }
            }
        }
        Ok(())
    }

    /// Encode this packet to a sink.
    pub fn encode<W: Write>(&self, sink: W) -> io::Result<()> {
        ciborium::into_writer(self, sink).map_err(cbor_to_io)
    }

    /// Decode and validate a packet.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > limits::MAX_PACKET_LENGTH {
            return Err(SyncError::ProtocolViolation(format!(
                "packet of {} bytes exceeds limit",
                bytes.len()
            )));
        }
        let packet: Packet = ciborium::from_reader(bytes)
            .map_err(|e| SyncError::ProtocolViolation(format!("malformed packet: {}", e)))?;
        packet
            .validate_limits()
            .map_err(|e| SyncError::ProtocolViolation(e.to_string()))?;
        Ok(packet)
    }
}

fn cbor_to_io(e: ciborium::ser::Error<io::Error>) -> io::Error {
    match e {
        ciborium::ser::Error::Io(e) => e,
        ciborium::ser::Error::Value(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
    }
}

/// Turns verified raw bytes into a [`Message`].
///
/// Signature checking and message parsing live outside the sync core; the
/// engine only sees their result.
pub trait MessageParser: Send + Sync {
    fn parse(&self, raw: Bytes) -> Result<Message>;
}

/// A batch received from a contact, its messages parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedBatch {
    pub id: BatchId,
    pub messages: Vec<Message>,
}

impl ReceivedBatch {
    /// Parse every message of a batch packet. One bad message rejects the
    /// batch, so it is never acknowledged.
    pub fn parse(batch: &Batch, parser: &dyn MessageParser) -> Result<Self> {
        let id = batch.id()?;
        let messages = batch
            .messages
            .iter()
            .map(|raw| parser.parse(raw.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { id, messages })
    }
}
