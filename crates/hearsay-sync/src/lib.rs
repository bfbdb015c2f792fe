//! # Hearsay Sync
//!
//! The reconciliation core: decides what to send each contact, records what
//! was sent, and learns what each contact already has.
//!
//! ## Overview
//!
//! Two peers exchange packets over any delay-tolerant transport. Nothing is
//! assumed about ordering or delivery: a batch that is never acknowledged is
//! eventually declared lost and its messages are offered again.
//!
//! - [`SyncEngine`] - every operation, each one transaction under the
//!   domain locks it needs
//! - [`Locks`] - six domain locks, always taken in one order
//! - [`WriteGate`] - pauses message writers while space is reclaimed
//! - [`ConnectionWindow`](hearsay_core::ConnectionWindow) tracking through
//!   [`SyncEngine::accept_incoming_connection`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hearsay_store::MemoryDatabase;
//! use hearsay_sync::{CborBatchWriter, SyncConfig, SyncEngine};
//!
//! # fn example(contact: hearsay_core::ContactId) -> hearsay_sync::Result<()> {
//! let engine = SyncEngine::new(MemoryDatabase::new(), SyncConfig::default());
//! let mut writer = CborBatchWriter::new(Vec::new(), 64 * 1024);
//! if let Some(batch) = engine.generate_batch(contact, &mut writer)? {
//!     println!("sent {} messages in {}", batch.messages.len(), batch.id);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Packet Flow
//!
//! ```text
//! Node A                              Node B
//!   |-------- Subscriptions ---------->|
//!   |-------- Transports ------------->|
//!   |-------- Offer ------------------>|
//!   |<------- Request -----------------|
//!   |-------- Batch ------------------>|
//!   |<------- Ack ---------------------|
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod gossip;
pub mod locks;
pub mod packets;
pub mod secrets;
pub mod sendability;
pub mod writers;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use engine::{Expired, SentBatch, SyncEngine};
pub use error::{Result, SyncError};
pub use events::{Event, EventListener, NoopListener};
pub use gate::WriteGate;
pub use locks::{Domain, LockGuard, LockSet, Locks};
pub use packets::{
    batch_id, limits, Ack, Batch, BatchNonce, MessageParser, Offer, Packet, ReceivedBatch,
    Request, SubscriptionUpdate, TransportUpdate, PROTOCOL_VERSION,
};
pub use writers::{
    AckWriter, BatchWriter, CborAckWriter, CborBatchWriter, CborOfferWriter, CborPacketWriter,
    OfferWriter, RequestWriter, SubscriptionWriter, TransportWriter,
};
