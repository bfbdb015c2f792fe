//! The reconciliation engine.
//!
//! Every operation follows the same shape: take the domain locks it needs,
//! check the contact inside the transaction, do the work, commit (or abort
//! on any error), release the locks, then report events. A contact moves
//! through these states:
//!
//! ```text
//! Idle ──generate_batch/generate_offer──▶ Batching/Offering ──▶ AwaitingAck
//!   ▲                                                              │
//!   └──────────────── receive_ack / find_lost_batches ◀────────────┘
//! ```
//!
//! The only suspension point is the write gate, awaited by the operations
//! that store new messages before they take any lock.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use hearsay_core::{BatchId, ContactId, Group, GroupId, Message, MessageId, TransportProperties};
use hearsay_store::Database;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{Event, EventListener, NoopListener};
use crate::gate::WriteGate;
use crate::locks::{LockSet, Locks};
use crate::packets::{Ack, Offer, ReceivedBatch, Request};
use crate::writers::{AckWriter, BatchWriter, OfferWriter, RequestWriter};

/// A batch that was written and recorded as outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentBatch {
    pub id: BatchId,
    pub messages: Vec<MessageId>,
}

/// Space freed by [`SyncEngine::expire_messages`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expired {
    pub count: usize,
    pub bytes: u64,
}

/// The sync core over a store.
pub struct SyncEngine<D: Database> {
    pub(crate) db: D,
    pub(crate) locks: Locks,
    gate: WriteGate,
    pub(crate) clock: Arc<dyn Clock>,
    events: Arc<dyn EventListener>,
    config: SyncConfig,
    /// Contacts with an offer being answered right now.
    offer_rounds: Mutex<HashSet<ContactId>>,
}

/// Marks a contact's offer round as in progress until dropped.
struct OfferRound<'a> {
    rounds: &'a Mutex<HashSet<ContactId>>,
    contact: ContactId,
}

impl Drop for OfferRound<'_> {
    fn drop(&mut self) {
        let mut rounds = self.rounds.lock().unwrap_or_else(|p| p.into_inner());
        rounds.remove(&self.contact);
    }
}

impl<D: Database> SyncEngine<D> {
    /// Create an engine with the system clock and no event listener.
    pub fn new(db: D, config: SyncConfig) -> Self {
        Self {
            db,
            locks: Locks::new(),
            gate: WriteGate::new(),
            clock: Arc::new(SystemClock),
            events: Arc::new(NoopListener),
            config,
            offer_rounds: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_listener(mut self, events: Arc<dyn EventListener>) -> Self {
        self.events = events;
        self
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn gate(&self) -> &WriteGate {
        &self.gate
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run `f` in a transaction: commit if it succeeds, abort if it fails.
    pub(crate) fn with_txn<'s, T>(
        &'s self,
        f: impl FnOnce(&mut D::Txn<'s>) -> Result<T>,
    ) -> Result<T> {
        let mut txn = self.db.start_transaction()?;
        match f(&mut txn) {
            Ok(value) => {
                self.db.commit_transaction(txn)?;
                Ok(value)
            }
            Err(e) => {
                self.db.abort_transaction(txn);
                Err(e)
            }
        }
    }

    pub(crate) fn require_contact(&self, txn: &mut D::Txn<'_>, c: ContactId) -> Result<()> {
        if self.db.contains_contact(txn, c)? {
            Ok(())
        } else {
            Err(SyncError::NoSuchContact(c))
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        self.events.event_occurred(&event);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Contacts
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a contact with its initial transport properties.
    pub fn add_contact(&self, transports: &TransportProperties) -> Result<ContactId> {
        let locks = self.locks.acquire(LockSet::CONTACT | LockSet::TRANSPORT);
        let c = self.with_txn(|txn| Ok(self.db.add_contact(txn, transports)?))?;
        drop(locks);
        info!(contact = %c, "added contact");
        self.emit(Event::ContactAdded(c));
        Ok(c)
    }

    /// Remove a contact with everything it owns, in one transaction.
    pub fn remove_contact(&self, c: ContactId) -> Result<()> {
        let locks = self.locks.acquire(
            LockSet::CONTACT
                | LockSet::MESSAGE_STATUS
                | LockSet::SUBSCRIPTION
                | LockSet::TRANSPORT,
        );
        self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            Ok(self.db.remove_contact(txn, c)?)
        })?;
        drop(locks);
        info!(contact = %c, "removed contact");
        self.emit(Event::ContactRemoved(c));
        Ok(())
    }

    pub fn get_contacts(&self) -> Result<Vec<ContactId>> {
        let _locks = self.locks.acquire(LockSet::CONTACT);
        self.with_txn(|txn| Ok(self.db.get_contacts(txn)?))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to a group. Returns false if already subscribed.
    pub fn subscribe(&self, group: &Group) -> Result<bool> {
        let locks = self.locks.acquire(LockSet::SUBSCRIPTION);
        let now = self.clock.now_millis();
        let added = self.with_txn(|txn| Ok(self.db.add_subscription(txn, group, now)?))?;
        drop(locks);
        if added {
            debug!(group = %group.id, name = %group.name, "subscribed");
            self.emit(Event::LocalSubscriptionsUpdated);
        }
        Ok(added)
    }

    /// Unsubscribe from a group, deleting its messages. Returns false if not
    /// subscribed.
    pub fn unsubscribe(&self, g: &GroupId) -> Result<bool> {
        let locks = self.locks.acquire(
            LockSet::CONTACT | LockSet::MESSAGE | LockSet::MESSAGE_STATUS | LockSet::SUBSCRIPTION,
        );
        let now = self.clock.now_millis();
        let removed = self.with_txn(|txn| Ok(self.db.remove_subscription(txn, g, now)?))?;
        drop(locks);
        if removed {
            debug!(group = %g, "unsubscribed");
            self.emit(Event::LocalSubscriptionsUpdated);
        }
        Ok(removed)
    }

    pub fn get_subscriptions(&self) -> Result<Vec<Group>> {
        let _locks = self.locks.acquire(LockSet::SUBSCRIPTION);
        self.with_txn(|txn| Ok(self.db.get_subscriptions(txn)?))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Storing messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a locally generated message if we subscribe to its group.
    pub async fn add_local_message(&self, m: &Message) -> Result<bool> {
        self.gate.wait_for_permission_to_write().await?;
        let locks = self.locks.acquire(
            LockSet::CONTACT
                | LockSet::MESSAGE
                | LockSet::MESSAGE_STATUS
                | LockSet::RATING
                | LockSet::SUBSCRIPTION,
        );
        let stored = self.with_txn(|txn| {
            if !self.db.contains_subscription(txn, &m.group)? {
                return Ok(false);
            }
            Ok(self.db.add_message(txn, m, None)?)
        })?;
        drop(locks);
        if stored {
            debug!(message = %m.id, "stored local message");
            self.emit(Event::MessagesAdded {
                contact: None,
                count: 1,
            });
        }
        Ok(stored)
    }

    /// Store the messages of a received batch that belong to subscribed
    /// groups, and remember to acknowledge the batch. Returns how many
    /// messages were new.
    pub async fn receive_batch(&self, c: ContactId, batch: &ReceivedBatch) -> Result<usize> {
        self.gate.wait_for_permission_to_write().await?;
        let locks = self.locks.acquire(
            LockSet::CONTACT
                | LockSet::MESSAGE
                | LockSet::MESSAGE_STATUS
                | LockSet::RATING
                | LockSet::SUBSCRIPTION,
        );
        let stored = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let mut stored = 0;
            for m in &batch.messages {
                if self.db.contains_subscription(txn, &m.group)?
                    && self.db.add_message(txn, m, Some(c))?
                {
                    stored += 1;
                } else {
                    // Already known or unwanted: the sender has it either way
                    self.db.set_status_seen_if_visible(txn, c, &m.id)?;
                }
            }
            self.db.add_batch_to_ack(txn, c, &batch.id)?;
            Ok(stored)
        })?;
        drop(locks);
        debug!(
            contact = %c,
            batch = %batch.id,
            received = batch.messages.len(),
            stored,
            "received batch"
        );
        if stored > 0 {
            self.emit(Event::MessagesAdded {
                contact: Some(c),
                count: stored,
            });
        }
        Ok(stored)
    }

    /// Delete the oldest messages until at least `bytes` are freed.
    pub fn expire_messages(&self, bytes: u64) -> Result<Expired> {
        let locks = self
            .locks
            .acquire(LockSet::CONTACT | LockSet::MESSAGE | LockSet::MESSAGE_STATUS);
        let expired = self.with_txn(|txn| {
            let mut expired = Expired::default();
            for id in self.db.get_old_messages(txn, bytes)? {
                if let Some(raw) = self.db.get_message(txn, &id)? {
                    expired.bytes += raw.len() as u64;
                }
                self.db.remove_message(txn, &id)?;
                expired.count += 1;
            }
            Ok(expired)
        })?;
        drop(locks);
        if expired.count > 0 {
            info!(count = expired.count, bytes = expired.bytes, "expired old messages");
            self.emit(Event::MessagesExpired {
                count: expired.count,
                bytes: expired.bytes,
            });
        }
        Ok(expired)
    }

    /// Total size of stored messages.
    pub fn stored_bytes(&self) -> Result<u64> {
        let _locks = self.locks.acquire(LockSet::MESSAGE);
        self.with_txn(|txn| Ok(self.db.get_total_message_size(txn)?))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Batches and acks
    // ─────────────────────────────────────────────────────────────────────────

    /// Fill a batch with the oldest messages sendable to the contact.
    ///
    /// The batch is always finished. It is recorded as outstanding, and
    /// returned, only if it holds at least one message.
    pub fn generate_batch(
        &self,
        c: ContactId,
        writer: &mut dyn BatchWriter,
    ) -> Result<Option<SentBatch>> {
        let locks = self
            .locks
            .acquire(LockSet::CONTACT | LockSet::MESSAGE | LockSet::MESSAGE_STATUS);
        let now = self.clock.now_millis();
        let sent = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let candidates = self.db.get_sendable_messages(txn, c, writer.capacity())?;
            let mut sent = Vec::with_capacity(candidates.len());
            for id in candidates {
                let Some(raw) = self.db.get_message(txn, &id)? else {
                    continue;
                };
                if !writer.write_message(&raw)? {
                    break;
                }
                sent.push(id);
            }
            self.finish_batch(txn, c, writer, sent, now)
        })?;
        drop(locks);
        self.report_sent(c, sent.as_ref());
        Ok(sent)
    }

    /// Like [`generate_batch`](Self::generate_batch), restricted to the
    /// requested messages that are still sendable. Each message is sent at
    /// most once, even if requested twice. Returns the IDs actually sent.
    pub fn generate_batch_from(
        &self,
        c: ContactId,
        writer: &mut dyn BatchWriter,
        requested: &[MessageId],
    ) -> Result<Vec<MessageId>> {
        let locks = self
            .locks
            .acquire(LockSet::CONTACT | LockSet::MESSAGE | LockSet::MESSAGE_STATUS);
        let now = self.clock.now_millis();
        let sent = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let mut sent = Vec::new();
            let mut seen = HashSet::with_capacity(requested.len());
            for id in requested {
                if !seen.insert(*id) {
                    continue;
                }
                let Some(raw) = self.db.get_message_if_sendable(txn, c, id)? else {
                    continue;
                };
                if !writer.write_message(&raw)? {
                    break;
                }
                sent.push(*id);
            }
            self.finish_batch(txn, c, writer, sent, now)
        })?;
        drop(locks);
        self.report_sent(c, sent.as_ref());
        Ok(sent.map(|b| b.messages).unwrap_or_default())
    }

    fn finish_batch(
        &self,
        txn: &mut D::Txn<'_>,
        c: ContactId,
        writer: &mut dyn BatchWriter,
        sent: Vec<MessageId>,
        now: i64,
    ) -> Result<Option<SentBatch>> {
        let id = writer.finish(rand::random())?;
        if sent.is_empty() {
            return Ok(None);
        }
        self.db.add_outstanding_batch(txn, c, &id, &sent, now)?;
        Ok(Some(SentBatch { id, messages: sent }))
    }

    fn report_sent(&self, c: ContactId, sent: Option<&SentBatch>) {
        if let Some(batch) = sent {
            debug!(contact = %c, batch = %batch.id, messages = batch.messages.len(), "sent batch");
            self.emit(Event::BatchSent {
                contact: c,
                batch: batch.id,
                messages: batch.messages.len(),
            });
        }
    }

    /// Acknowledge received batches. Batches that don't fit stay queued.
    /// Returns how many were acknowledged.
    pub fn generate_ack(&self, c: ContactId, writer: &mut dyn AckWriter) -> Result<usize> {
        let _locks = self
            .locks
            .acquire(LockSet::CONTACT | LockSet::MESSAGE_STATUS);
        let max = self.config.max_ack_ids;
        let acked = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let mut acked = Vec::new();
            for id in self.db.get_batches_to_ack(txn, c)?.into_iter().take(max) {
                if !writer.write_batch_id(&id)? {
                    break;
                }
                acked.push(id);
            }
            writer.finish()?;
            self.db.remove_batches_to_ack(txn, c, &acked)?;
            Ok(acked.len())
        })?;
        debug!(contact = %c, acked, "generated ack");
        Ok(acked)
    }

    /// Process an ack: each known batch stops being outstanding and its
    /// messages become seen. Unknown batch IDs are ignored.
    pub fn receive_ack(&self, c: ContactId, ack: &Ack) -> Result<()> {
        let locks = self
            .locks
            .acquire(LockSet::CONTACT | LockSet::MESSAGE | LockSet::MESSAGE_STATUS);
        let acked = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let mut acked = Vec::new();
            for id in &ack.batches {
                if !self.db.remove_acked_batch(txn, c, id)?.is_empty() {
                    acked.push(*id);
                }
            }
            Ok(acked)
        })?;
        drop(locks);
        debug!(contact = %c, received = ack.batches.len(), acked = acked.len(), "received ack");
        for batch in acked {
            self.emit(Event::BatchAcked { contact: c, batch });
        }
        Ok(())
    }

    /// Declare batches unacknowledged for longer than `retransmit_after`
    /// lost, making their messages sendable again. Returns the lost batches.
    ///
    /// Each batch is removed in its own transaction, after checking it is
    /// still outstanding and still old: an ack may have arrived in between.
    pub fn find_lost_batches(&self, c: ContactId) -> Result<Vec<BatchId>> {
        let after = i64::try_from(self.config.retransmit_after.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.clock.now_millis().saturating_sub(after);
        let candidates = {
            let _locks = self
                .locks
                .acquire(LockSet::CONTACT | LockSet::MESSAGE | LockSet::MESSAGE_STATUS);
            self.with_txn(|txn| {
                self.require_contact(txn, c)?;
                Ok(self.db.get_lost_batches(txn, c, cutoff)?)
            })?
        };

        let mut lost = Vec::new();
        for batch in candidates {
            let locks = self
                .locks
                .acquire(LockSet::CONTACT | LockSet::MESSAGE | LockSet::MESSAGE_STATUS);
            let removed = self.with_txn(|txn| {
                self.require_contact(txn, c)?;
                Ok(self.db.remove_lost_batch(txn, c, &batch, cutoff)?)
            })?;
            drop(locks);
            if let Some(messages) = removed {
                info!(contact = %c, batch = %batch, messages = messages.len(), "batch lost");
                self.emit(Event::BatchLost {
                    contact: c,
                    batch,
                    messages: messages.len(),
                });
                lost.push(batch);
            }
        }
        Ok(lost)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Offers and requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Offer the IDs of messages sendable to the contact, oldest first,
    /// until the writer is full. Returns the offered IDs.
    pub fn generate_offer(
        &self,
        c: ContactId,
        writer: &mut dyn OfferWriter,
    ) -> Result<Vec<MessageId>> {
        let _locks = self
            .locks
            .acquire(LockSet::CONTACT | LockSet::MESSAGE | LockSet::MESSAGE_STATUS);
        let max = self.config.max_offer_ids;
        let offered = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let mut offered = Vec::new();
            for id in self
                .db
                .get_sendable_messages(txn, c, usize::MAX)?
                .into_iter()
                .take(max)
            {
                if !writer.write_message_id(&id)? {
                    break;
                }
                offered.push(id);
            }
            writer.finish()?;
            Ok(offered)
        })?;
        debug!(contact = %c, offered = offered.len(), "generated offer");
        Ok(offered)
    }

    /// Answer an offer with a request for the messages we lack.
    ///
    /// Offered messages already visible to the contact are marked seen; the
    /// rest are requested. The check-and-mark of the whole offer happens in
    /// one transaction, and only one offer per contact is answered at a
    /// time: a concurrent round is a [`SyncError::ProtocolViolation`].
    pub fn receive_offer(
        &self,
        c: ContactId,
        offer: &Offer,
        writer: &mut dyn RequestWriter,
    ) -> Result<Request> {
        let _round = self.begin_offer_round(c)?;
        let _locks = self.locks.acquire(
            LockSet::CONTACT | LockSet::MESSAGE | LockSet::MESSAGE_STATUS | LockSet::SUBSCRIPTION,
        );
        let bits = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let mut bits = Vec::with_capacity(offer.ids.len());
            for id in &offer.ids {
                bits.push(!self.db.set_status_seen_if_visible(txn, c, id)?);
            }
            Ok(bits)
        })?;
        let request = Request::from_bits(&bits);
        writer.write_request(&request)?;
        debug!(contact = %c, offered = offer.ids.len(), requested = request.count(), "received offer");
        Ok(request)
    }

    /// Send the messages a contact requested from our offer. Returns the IDs
    /// actually sent.
    pub fn receive_request(
        &self,
        c: ContactId,
        offer: &Offer,
        request: &Request,
        writer: &mut dyn BatchWriter,
    ) -> Result<Vec<MessageId>> {
        let requested = request.requested_ids(offer)?;
        self.emit(Event::MessagesRequested {
            contact: c,
            count: requested.len(),
        });
        self.generate_batch_from(c, writer, &requested)
    }

    fn begin_offer_round(&self, c: ContactId) -> Result<OfferRound<'_>> {
        let mut rounds = self
            .offer_rounds
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if !rounds.insert(c) {
            return Err(SyncError::ProtocolViolation(format!(
                "concurrent offer from {}",
                c
            )));
        }
        Ok(OfferRound {
            rounds: &self.offer_rounds,
            contact: c,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::packets::Packet;
    use crate::writers::{CborAckWriter, CborBatchWriter, CborOfferWriter, CborPacketWriter};
    use hearsay_core::Status;
    use hearsay_store::MemoryDatabase;
    use std::io;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl EventListener for Recorder {
        fn event_occurred(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    struct BrokenSink;

    impl io::Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Setup {
        engine: SyncEngine<MemoryDatabase>,
        clock: Arc<ManualClock>,
        events: Arc<Recorder>,
        contact: ContactId,
        group: Group,
    }

    fn setup() -> Setup {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let events = Arc::new(Recorder::default());
        let engine = SyncEngine::new(MemoryDatabase::new(), SyncConfig::default())
            .with_clock(clock.clone())
            .with_listener(events.clone());
        let group = Group::new("g", b"");
        engine.subscribe(&group).unwrap();
        let contact = engine.add_contact(&TransportProperties::new()).unwrap();
        {
            let mut txn = engine.db.start_transaction().unwrap();
            engine
                .db
                .set_subscriptions(&mut txn, contact, &[group.clone()], 1)
                .unwrap();
            engine.db.commit_transaction(txn).unwrap();
        }
        Setup {
            engine,
            clock,
            events,
            contact,
            group,
        }
    }

    async fn store(s: &Setup, n: usize) -> Vec<Message> {
        let mut out = Vec::new();
        for i in 0..n {
            let m = Message::new(s.group.id, None, i as i64, format!("m{}", i + 1).into_bytes());
            assert!(s.engine.add_local_message(&m).await.unwrap());
            out.push(m);
        }
        out
    }

    fn status(s: &Setup, id: &MessageId) -> Option<Status> {
        let mut txn = s.engine.db.start_transaction().unwrap();
        s.engine
            .db
            .get_status(&mut txn, s.contact, id)
            .unwrap()
            .map(|st| st.status)
    }

    #[tokio::test]
    async fn test_batch_then_ack_then_next_batch() {
        let s = setup();
        let ms = store(&s, 5).await;

        let mut writer = CborBatchWriter::new(Vec::new(), 1024).with_max_messages(3);
        let b1 = s.engine.generate_batch(s.contact, &mut writer).unwrap().unwrap();
        assert_eq!(b1.messages, vec![ms[0].id, ms[1].id, ms[2].id]);

        s.engine
            .receive_ack(s.contact, &Ack { batches: vec![b1.id] })
            .unwrap();
        for m in &ms[..3] {
            assert_eq!(status(&s, &m.id), Some(Status::Seen));
        }

        let mut writer = CborBatchWriter::new(Vec::new(), 1024).with_max_messages(3);
        let b2 = s.engine.generate_batch(s.contact, &mut writer).unwrap().unwrap();
        assert_eq!(b2.messages, vec![ms[3].id, ms[4].id]);

        let mut writer = CborBatchWriter::new(Vec::new(), 1024);
        assert!(s.engine.generate_batch(s.contact, &mut writer).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_failure_leaves_nothing_outstanding() {
        let s = setup();
        let ms = store(&s, 2).await;

        let mut writer = CborBatchWriter::new(BrokenSink, 1024);
        let err = s.engine.generate_batch(s.contact, &mut writer).unwrap_err();
        assert!(matches!(err, SyncError::Serialization(_)));

        let mut txn = s.engine.db.start_transaction().unwrap();
        assert!(s
            .engine
            .db
            .get_outstanding_batches(&mut txn, s.contact)
            .unwrap()
            .is_empty());
        drop(txn);
        assert_eq!(status(&s, &ms[0].id), Some(Status::New));
    }

    #[tokio::test]
    async fn test_unknown_ack_is_ignored() {
        let s = setup();
        s.engine
            .receive_ack(
                s.contact,
                &Ack {
                    batches: vec![BatchId::from_bytes([7; 32])],
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_contact() {
        let s = setup();
        let ghost = ContactId(99);
        let mut writer = CborBatchWriter::new(Vec::new(), 1024);
        assert!(matches!(
            s.engine.generate_batch(ghost, &mut writer),
            Err(SyncError::NoSuchContact(c)) if c == ghost
        ));
        assert!(matches!(
            s.engine.receive_ack(ghost, &Ack::default()),
            Err(SyncError::NoSuchContact(_))
        ));
    }

    #[tokio::test]
    async fn test_lost_batch_is_resent_once() {
        let s = setup();
        let ms = store(&s, 2).await;

        let mut writer = CborBatchWriter::new(Vec::new(), 1024);
        let first = s.engine.generate_batch(s.contact, &mut writer).unwrap().unwrap();
        // Not yet old enough
        assert!(s.engine.find_lost_batches(s.contact).unwrap().is_empty());

        s.clock.advance(s.engine.config().retransmit_after);
        assert_eq!(s.engine.find_lost_batches(s.contact).unwrap(), vec![first.id]);
        assert!(s.engine.find_lost_batches(s.contact).unwrap().is_empty());

        let mut writer = CborBatchWriter::new(Vec::new(), 1024);
        let second = s.engine.generate_batch(s.contact, &mut writer).unwrap().unwrap();
        assert_eq!(second.messages, vec![ms[0].id, ms[1].id]);

        assert_ne!(second.id, first.id);

        // A late ack for the lost batch is ignored
        s.engine
            .receive_ack(s.contact, &Ack { batches: vec![first.id] })
            .unwrap();
        assert_eq!(status(&s, &ms[0].id), Some(Status::Sent));
        assert_eq!(status(&s, &ms[1].id), Some(Status::Sent));

        s.engine
            .receive_ack(s.contact, &Ack { batches: vec![second.id] })
            .unwrap();
        assert_eq!(status(&s, &ms[0].id), Some(Status::Seen));

        assert!(s
            .events
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::BatchLost { batch, .. } if *batch == first.id)));
    }

    #[tokio::test]
    async fn test_offer_request_round_trip() {
        let s = setup();
        let ms = store(&s, 3).await;
        let offer = Offer {
            ids: ms.iter().map(|m| m.id).collect(),
        };

        // m2 is already visible to the contact; m1 and m3 are unknown here
        let remote = setup();
        let m2 = ms[1].clone();
        assert!(remote.engine.add_local_message(&m2).await.unwrap());

        let mut sink = CborPacketWriter::new(Vec::new());
        let request = remote
            .engine
            .receive_offer(remote.contact, &offer, &mut sink)
            .unwrap();
        assert_eq!(request.to_string(), "101");
        assert_eq!(status(&remote, &m2.id), Some(Status::Seen));
        assert_eq!(
            Packet::decode(&sink.into_inner()).unwrap(),
            Packet::Request(request.clone())
        );

        let mut writer = CborBatchWriter::new(Vec::new(), 1024);
        let sent = s
            .engine
            .receive_request(s.contact, &offer, &request, &mut writer)
            .unwrap();
        assert_eq!(sent, vec![ms[0].id, ms[2].id]);
    }

    #[tokio::test]
    async fn test_mismatched_request_is_rejected() {
        let s = setup();
        let ms = store(&s, 2).await;
        let offer = Offer {
            ids: ms.iter().map(|m| m.id).collect(),
        };
        let mut writer = CborBatchWriter::new(Vec::new(), 1024);
        let result = s.engine.receive_request(
            s.contact,
            &offer,
            &Request::from_bits(&[true]),
            &mut writer,
        );
        assert!(matches!(result, Err(SyncError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_concurrent_offer_round_is_rejected() {
        let s = setup();
        let round = s.engine.begin_offer_round(s.contact).unwrap();
        let mut sink = CborPacketWriter::new(Vec::new());
        assert!(matches!(
            s.engine.receive_offer(s.contact, &Offer::default(), &mut sink),
            Err(SyncError::ProtocolViolation(_))
        ));
        drop(round);
        s.engine
            .receive_offer(s.contact, &Offer::default(), &mut sink)
            .unwrap();
    }

    #[tokio::test]
    async fn test_offer_respects_writer_limit() {
        let s = setup();
        let ms = store(&s, 3).await;
        let mut writer = CborOfferWriter::new(Vec::new()).with_max_ids(2);
        let offered = s.engine.generate_offer(s.contact, &mut writer).unwrap();
        assert_eq!(offered, vec![ms[0].id, ms[1].id]);
    }

    #[tokio::test]
    async fn test_received_batch_is_acked() {
        let s = setup();
        let m = Message::new(s.group.id, None, 5, b"remote".to_vec());
        let unwanted = Message::new(GroupId::from_bytes([9; 32]), None, 5, b"other".to_vec());
        let batch = ReceivedBatch {
            id: BatchId::from_bytes([3; 32]),
            messages: vec![m.clone(), unwanted.clone()],
        };
        assert_eq!(s.engine.receive_batch(s.contact, &batch).await.unwrap(), 1);
        assert_eq!(status(&s, &m.id), Some(Status::Seen));

        let mut writer = CborAckWriter::new(Vec::new());
        assert_eq!(s.engine.generate_ack(s.contact, &mut writer).unwrap(), 1);
        assert_eq!(
            Packet::decode(&writer.into_inner()).unwrap(),
            Packet::Ack(Ack {
                batches: vec![batch.id]
            })
        );

        let mut writer = CborAckWriter::new(Vec::new());
        assert_eq!(s.engine.generate_ack(s.contact, &mut writer).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_gate_refuses_writes() {
        let s = setup();
        s.engine.gate().close();
        let m = Message::new(s.group.id, None, 1, b"late".to_vec());
        assert!(matches!(
            s.engine.add_local_message(&m).await,
            Err(SyncError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_expire_oldest_messages() {
        let s = setup();
        let ms = store(&s, 3).await;
        assert_eq!(s.engine.stored_bytes().unwrap(), 6);
        let expired = s.engine.expire_messages(3).unwrap();
        assert_eq!(expired, Expired { count: 2, bytes: 4 });
        assert_eq!(status(&s, &ms[0].id), None);
        assert_eq!(status(&s, &ms[2].id), Some(Status::New));
    }

    #[tokio::test]
    async fn test_expiry_waits_for_contact_lock() {
        let s = setup();
        store(&s, 2).await;
        let engine = Arc::new(s.engine);

        let held = engine.locks.acquire(LockSet::CONTACT);
        let expiring = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.expire_messages(1).unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!expiring.is_finished());
        drop(held);

        assert_eq!(expiring.join().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_remove_contact_then_operate() {
        let s = setup();
        store(&s, 1).await;
        s.engine.remove_contact(s.contact).unwrap();
        let mut writer = CborBatchWriter::new(Vec::new(), 1024);
        assert!(matches!(
            s.engine.generate_batch(s.contact, &mut writer),
            Err(SyncError::NoSuchContact(_))
        ));
        assert!(matches!(
            s.engine.remove_contact(s.contact),
            Err(SyncError::NoSuchContact(_))
        ));
    }

    #[tokio::test]
    async fn test_request_naming_a_message_twice_sends_it_once() {
        let s = setup();
        let ms = store(&s, 2).await;
        let offer = Offer {
            ids: vec![ms[0].id, ms[0].id, ms[1].id],
        };
        let mut writer = CborBatchWriter::new(Vec::new(), 1024);
        let sent = s
            .engine
            .receive_request(
                s.contact,
                &offer,
                &Request::from_bits(&[true, true, true]),
                &mut writer,
            )
            .unwrap();
        assert_eq!(sent, vec![ms[0].id, ms[1].id]);

        let Packet::Batch(batch) = Packet::decode(&writer.into_inner()).unwrap() else {
            panic!("expected batch");
        };
        assert_eq!(batch.messages.len(), 2);
        let mut txn = s.engine.db.start_transaction().unwrap();
        let outstanding = s
            .engine
            .db
            .get_outstanding_batches(&mut txn, s.contact)
            .unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].messages, vec![ms[0].id, ms[1].id]);
    }

    #[tokio::test]
    async fn test_huge_retransmit_delay_never_loses_batches() {
        for millis in [u64::MAX, 1 << 63] {
            let clock = Arc::new(ManualClock::new(1_000_000));
            let config = SyncConfig {
                retransmit_after: std::time::Duration::from_millis(millis),
                ..SyncConfig::default()
            };
            let engine = SyncEngine::new(MemoryDatabase::new(), config).with_clock(clock.clone());
            let group = Group::new("g", b"");
            engine.subscribe(&group).unwrap();
            let c = engine.add_contact(&TransportProperties::new()).unwrap();
            {
                let mut txn = engine.db.start_transaction().unwrap();
                engine
                    .db
                    .set_subscriptions(&mut txn, c, &[group.clone()], 1)
                    .unwrap();
                engine.db.commit_transaction(txn).unwrap();
            }
            let m = Message::new(group.id, None, 1, b"slow".to_vec());
            engine.add_local_message(&m).await.unwrap();

            let mut writer = CborBatchWriter::new(Vec::new(), 1024);
            assert!(engine.generate_batch(c, &mut writer).unwrap().is_some());
            clock.advance(std::time::Duration::from_secs(3600));
            assert!(engine.find_lost_batches(c).unwrap().is_empty());
        }
    }
}
