//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngCore;

use hearsay_core::{AuthorId, BatchId, ContactId, Group, Message, MessageId, MessageStatus};
use hearsay_store::{Database, MemoryDatabase, OutstandingBatch};
use hearsay_sync::{
    CborAckWriter, CborBatchWriter, Clock, Event, EventListener, ManualClock, Packet, ReceivedBatch,
    SubscriptionUpdate, SyncConfig, SyncEngine,
};

use crate::messages::{test_message, TestMessageParser};

/// Start of time for every test clock.
pub const TEST_EPOCH: i64 = 1_700_000_000_000;

/// Room for every test batch.
pub const TEST_BATCH_CAPACITY: usize = 64 * 1024;

/// Records every event it is told about.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// How many recorded events match.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventListener for RecordingListener {
    fn event_occurred(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A sink that fails every write, for exercising abort paths.
#[derive(Debug, Default)]
pub struct FailingSink;

impl io::Write for FailingSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }
}

/// One node: an engine over a store, a manual clock, an event recorder and
/// the group every test message is posted to.
pub struct TestPeer<D: Database = MemoryDatabase> {
    pub engine: Arc<SyncEngine<D>>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingListener>,
    pub group: Group,
}

impl TestPeer<MemoryDatabase> {
    /// A peer over an in-memory store.
    pub fn new() -> Self {
        Self::with_database(MemoryDatabase::new(), SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self::with_database(MemoryDatabase::new(), config)
    }
}

impl Default for TestPeer<MemoryDatabase> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Database> TestPeer<D> {
    /// A peer over the given store, subscribed to the shared test group.
    pub fn with_database(db: D, config: SyncConfig) -> Self {
        let clock = Arc::new(ManualClock::new(TEST_EPOCH));
        let events = Arc::new(RecordingListener::new());
        let engine = SyncEngine::new(db, config)
            .with_clock(clock.clone())
            .with_listener(events.clone());
        let group = Group::new("testkit", b"shared");
        engine.subscribe(&group).unwrap();
        Self {
            engine: Arc::new(engine),
            clock,
            events,
            group,
        }
    }

    /// Add a contact that shares the test group.
    pub fn add_contact(&self) -> ContactId {
        let c = self.engine.add_contact(&Default::default()).unwrap();
        let update = SubscriptionUpdate {
            groups: vec![self.group.clone()],
            timestamp: 1,
        };
        self.engine.receive_subscriptions(c, &update).unwrap();
        c
    }

    /// Post an anonymous message to the test group. Each post is one
    /// millisecond after the previous one, so posts sort in order.
    pub async fn post(&self, body: &[u8]) -> Message {
        self.post_as(None, body).await
    }

    pub async fn post_by(&self, author: AuthorId, body: &[u8]) -> Message {
        self.post_as(Some(author), body).await
    }

    /// Post `len` random bytes.
    pub async fn post_random(&self, len: usize) -> Message {
        let mut body = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut body);
        self.post(&body).await
    }

    async fn post_as(&self, author: Option<AuthorId>, body: &[u8]) -> Message {
        self.clock.advance(Duration::from_millis(1));
        let m = test_message(self.group.id, author, self.clock.now_millis(), body);
        self.engine.add_local_message(&m).await.unwrap();
        m
    }

    pub fn status(&self, c: ContactId, id: &MessageId) -> Option<MessageStatus> {
        let db = self.engine.database();
        let mut txn = db.start_transaction().unwrap();
        db.get_status(&mut txn, c, id).unwrap()
    }

    pub fn outstanding(&self, c: ContactId) -> Vec<OutstandingBatch> {
        let db = self.engine.database();
        let mut txn = db.start_transaction().unwrap();
        db.get_outstanding_batches(&mut txn, c).unwrap()
    }

    pub fn has_message(&self, id: &MessageId) -> bool {
        let db = self.engine.database();
        let mut txn = db.start_transaction().unwrap();
        db.contains_message(&mut txn, id).unwrap()
    }
}

/// Send a batch from `from` to `to` and store it there. Returns the batch ID,
/// or `None` if there was nothing to send.
pub async fn deliver_batch<A: Database, B: Database>(
    from: &TestPeer<A>,
    to_at_from: ContactId,
    to: &TestPeer<B>,
    from_at_to: ContactId,
) -> hearsay_sync::Result<Option<BatchId>> {
    let mut writer = CborBatchWriter::new(Vec::new(), TEST_BATCH_CAPACITY);
    let Some(sent) = from.engine.generate_batch(to_at_from, &mut writer)? else {
        return Ok(None);
    };
    let Packet::Batch(batch) = Packet::decode(&writer.into_inner())? else {
        unreachable!("batch writer wrote another packet");
    };
    let received = ReceivedBatch::parse(&batch, &TestMessageParser)?;
    assert_eq!(received.id, sent.id);
    to.engine.receive_batch(from_at_to, &received).await?;
    Ok(Some(sent.id))
}

/// Send `from`'s pending acks to `to`. Returns how many batches were acked.
pub fn deliver_ack<A: Database, B: Database>(
    from: &TestPeer<A>,
    to_at_from: ContactId,
    to: &TestPeer<B>,
    from_at_to: ContactId,
) -> hearsay_sync::Result<usize> {
    let mut writer = CborAckWriter::new(Vec::new());
    let acked = from.engine.generate_ack(to_at_from, &mut writer)?;
    let Packet::Ack(ack) = Packet::decode(&writer.into_inner())? else {
        unreachable!("ack writer wrote another packet");
    };
    to.engine.receive_ack(from_at_to, &ack)?;
    Ok(acked)
}
