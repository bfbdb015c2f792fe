//! Packet writers.
//!
//! The engine fills a writer item by item while it holds locks, so writers
//! must only serialize to a local sink. Network I/O happens after the
//! engine returns.

use std::io::{self, Write};

use bytes::Bytes;

use hearsay_core::{BatchId, MessageId};

use crate::packets::{
    batch_id, limits, Ack, Batch, BatchNonce, Offer, Packet, Request, SubscriptionUpdate,
    TransportUpdate,
};

/// Builds one batch of raw messages.
pub trait BatchWriter {
    /// Remaining space for raw message bytes.
    fn capacity(&self) -> usize;

    /// Add a message. Returns false, leaving the batch unchanged, if it
    /// doesn't fit.
    fn write_message(&mut self, raw: &[u8]) -> io::Result<bool>;

    /// Emit the batch under `nonce` and return its ID.
    fn finish(&mut self, nonce: BatchNonce) -> io::Result<BatchId>;
}

/// Builds one ack.
pub trait AckWriter {
    /// Add a batch ID. Returns false if it doesn't fit.
    fn write_batch_id(&mut self, id: &BatchId) -> io::Result<bool>;

    fn finish(&mut self) -> io::Result<()>;
}

/// Builds one offer.
pub trait OfferWriter {
    /// Add a message ID. Returns false if it doesn't fit.
    fn write_message_id(&mut self, id: &MessageId) -> io::Result<bool>;

    fn finish(&mut self) -> io::Result<()>;
}

pub trait RequestWriter {
    fn write_request(&mut self, request: &Request) -> io::Result<()>;
}

pub trait SubscriptionWriter {
    fn write_subscriptions(&mut self, update: &SubscriptionUpdate) -> io::Result<()>;
}

pub trait TransportWriter {
    fn write_transports(&mut self, update: &TransportUpdate) -> io::Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// CBOR writers
// ─────────────────────────────────────────────────────────────────────────────

/// Writes a batch packet to a sink, bounded by raw message bytes and
/// optionally by message count.
pub struct CborBatchWriter<W: Write> {
    sink: W,
    capacity: usize,
    max_messages: Option<usize>,
    used: usize,
    messages: Vec<Bytes>,
}

impl<W: Write> CborBatchWriter<W> {
    pub fn new(sink: W, capacity: usize) -> Self {
        Self {
            sink,
            capacity: capacity.min(limits::MAX_PACKET_LENGTH),
            max_messages: None,
            used: 0,
            messages: Vec::new(),
        }
    }

    /// Also stop after `n` messages.
    pub fn with_max_messages(mut self, n: usize) -> Self {
        self.max_messages = Some(n);
        self
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> BatchWriter for CborBatchWriter<W> {
    fn capacity(&self) -> usize {
        self.capacity - self.used
    }

    fn write_message(&mut self, raw: &[u8]) -> io::Result<bool> {
        let full = self
            .max_messages
            .map_or(false, |max| self.messages.len() >= max);
        if full || raw.len() > self.capacity() {
            return Ok(false);
        }
        self.used += raw.len();
        self.messages.push(Bytes::copy_from_slice(raw));
        Ok(true)
    }

    fn finish(&mut self, nonce: BatchNonce) -> io::Result<BatchId> {
        let messages = std::mem::take(&mut self.messages);
        self.used = 0;
        let id = batch_id(&nonce, &messages)?;
        Packet::Batch(Batch { nonce, messages }).encode(&mut self.sink)?;
        self.sink.flush()?;
        Ok(id)
    }
}

/// Writes an ack packet to a sink.
pub struct CborAckWriter<W: Write> {
    sink: W,
    max_ids: usize,
    batches: Vec<BatchId>,
}

impl<W: Write> CborAckWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            max_ids: limits::MAX_ACK_IDS,
            batches: Vec::new(),
        }
    }

    pub fn with_max_ids(mut self, n: usize) -> Self {
        self.max_ids = n.min(limits::MAX_ACK_IDS);
        self
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> AckWriter for CborAckWriter<W> {
    fn write_batch_id(&mut self, id: &BatchId) -> io::Result<bool> {
        if self.batches.len() >= self.max_ids {
            return Ok(false);
        }
        self.batches.push(*id);
        Ok(true)
    }

    fn finish(&mut self) -> io::Result<()> {
        let batches = std::mem::take(&mut self.batches);
        Packet::Ack(Ack { batches }).encode(&mut self.sink)?;
        self.sink.flush()
    }
}

/// Writes an offer packet to a sink.
pub struct CborOfferWriter<W: Write> {
    sink: W,
    max_ids: usize,
    ids: Vec<MessageId>,
}

impl<W: Write> CborOfferWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            max_ids: limits::MAX_OFFER_IDS,
            ids: Vec::new(),
        }
    }

    pub fn with_max_ids(mut self, n: usize) -> Self {
        self.max_ids = n.min(limits::MAX_OFFER_IDS);
        self
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> OfferWriter for CborOfferWriter<W> {
    fn write_message_id(&mut self, id: &MessageId) -> io::Result<bool> {
        if self.ids.len() >= self.max_ids {
            return Ok(false);
        }
        self.ids.push(*id);
        Ok(true)
    }

    fn finish(&mut self) -> io::Result<()> {
        let ids = std::mem::take(&mut self.ids);
        Packet::Offer(Offer { ids }).encode(&mut self.sink)?;
        self.sink.flush()
    }
}

/// Writes single-shot packets (requests and gossip) to a sink.
pub struct CborPacketWriter<W: Write> {
    sink: W,
}

impl<W: Write> CborPacketWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    fn write(&mut self, packet: &Packet) -> io::Result<()> {
        packet.encode(&mut self.sink)?;
        self.sink.flush()
    }
}

impl<W: Write> RequestWriter for CborPacketWriter<W> {
    fn write_request(&mut self, request: &Request) -> io::Result<()> {
        self.write(&Packet::Request(request.clone()))
    }
}

impl<W: Write> SubscriptionWriter for CborPacketWriter<W> {
    fn write_subscriptions(&mut self, update: &SubscriptionUpdate) -> io::Result<()> {
        self.write(&Packet::Subscriptions(update.clone()))
    }
}

impl<W: Write> TransportWriter for CborPacketWriter<W> {
    fn write_transports(&mut self, update: &TransportUpdate) -> io::Result<()> {
        self.write(&Packet::Transports(update.clone()))
    }
}
