//! Database trait: the abstract transactional store the sync core runs on.
//!
//! Every operation takes an open transaction handle. A transaction is
//! started with [`Database::start_transaction`] and ended with exactly one
//! of [`Database::commit_transaction`] or [`Database::abort_transaction`].
//! Dropping a handle without committing discards its changes.
//!
//! The trait owns no business logic and takes no domain locks. Callers are
//! responsible for holding the right locks (see `hearsay_sync::locks`) for
//! as long as the transaction is open.

use bytes::Bytes;
use hearsay_core::{
    AuthorId, BatchId, ContactId, Group, GroupId, Message, MessageId, MessageStatus, Rating,
    TemporarySecret, TransportId, TransportProperties, ConnectionWindow,
};

use crate::error::Result;

/// A sent, not yet acknowledged batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingBatch {
    pub contact: ContactId,
    pub id: BatchId,
    pub messages: Vec<MessageId>,
    /// When the batch was recorded (Unix ms).
    pub sent_at: i64,
}

/// The transactional store contract.
pub trait Database: Send + Sync {
    /// An open transaction. Borrowing the database keeps the transaction from
    /// outliving it.
    type Txn<'a>
    where
        Self: 'a;

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    fn start_transaction(&self) -> Result<Self::Txn<'_>>;

    /// Make the transaction's changes visible to later transactions.
    fn commit_transaction(&self, txn: Self::Txn<'_>) -> Result<()>;

    /// Discard the transaction's changes.
    fn abort_transaction(&self, txn: Self::Txn<'_>);

    // ─────────────────────────────────────────────────────────────────────────
    // Contacts
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a contact with an initial set of transport properties.
    fn add_contact(
        &self,
        txn: &mut Self::Txn<'_>,
        transports: &TransportProperties,
    ) -> Result<ContactId>;

    fn contains_contact(&self, txn: &mut Self::Txn<'_>, c: ContactId) -> Result<bool>;

    fn get_contacts(&self, txn: &mut Self::Txn<'_>) -> Result<Vec<ContactId>>;

    /// Remove a contact with its statuses, batches, subscriptions,
    /// transports and secrets.
    fn remove_contact(&self, txn: &mut Self::Txn<'_>, c: ContactId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Local subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to a group. Returns false if already subscribed.
    fn add_subscription(&self, txn: &mut Self::Txn<'_>, group: &Group, timestamp: i64)
        -> Result<bool>;

    fn contains_subscription(&self, txn: &mut Self::Txn<'_>, g: &GroupId) -> Result<bool>;

    fn get_subscriptions(&self, txn: &mut Self::Txn<'_>) -> Result<Vec<Group>>;

    /// When the local subscription set last changed (Unix ms).
    fn get_subscriptions_timestamp(&self, txn: &mut Self::Txn<'_>) -> Result<i64>;

    /// Unsubscribe from a group, deleting its messages and their statuses.
    /// Returns false if not subscribed.
    fn remove_subscription(&self, txn: &mut Self::Txn<'_>, g: &GroupId, timestamp: i64)
        -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Contact subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace a contact's subscription set if `timestamp` is newer than the
    /// stored one. Status rows are added for messages in newly shared groups
    /// and removed for groups no longer shared. Returns whether it replaced.
    fn set_subscriptions(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        groups: &[Group],
        timestamp: i64,
    ) -> Result<bool>;

    fn get_contact_subscriptions(&self, txn: &mut Self::Txn<'_>, c: ContactId)
        -> Result<Vec<Group>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Transports
    // ─────────────────────────────────────────────────────────────────────────

    fn set_local_transports(
        &self,
        txn: &mut Self::Txn<'_>,
        transports: &TransportProperties,
        timestamp: i64,
    ) -> Result<()>;

    /// Local transport properties and when they last changed.
    fn get_local_transports(&self, txn: &mut Self::Txn<'_>)
        -> Result<(TransportProperties, i64)>;

    /// Replace a contact's transports if `timestamp` is newer than the
    /// stored one. Returns whether it replaced.
    fn set_transports(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        transports: &TransportProperties,
        timestamp: i64,
    ) -> Result<bool>;

    fn get_contact_transports(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
    ) -> Result<TransportProperties>;

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a message. Creates a status row for every contact subscribed to
    /// the message's group; the sender's row starts as seen. Returns false
    /// if the message was already stored.
    fn add_message(
        &self,
        txn: &mut Self::Txn<'_>,
        m: &Message,
        sender: Option<ContactId>,
    ) -> Result<bool>;

    fn contains_message(&self, txn: &mut Self::Txn<'_>, id: &MessageId) -> Result<bool>;

    /// Raw bytes of a message.
    fn get_message(&self, txn: &mut Self::Txn<'_>, id: &MessageId) -> Result<Option<Bytes>>;

    /// Raw bytes of a message if it is new and sendable to the contact.
    fn get_message_if_sendable(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        id: &MessageId,
    ) -> Result<Option<Bytes>>;

    /// New, sendable messages for a contact, oldest first, whose total raw
    /// size fits in `capacity` bytes.
    fn get_sendable_messages(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        capacity: usize,
    ) -> Result<Vec<MessageId>>;

    /// The oldest messages whose total size is at least `size` bytes (or
    /// every message if there are not that many bytes stored).
    fn get_old_messages(&self, txn: &mut Self::Txn<'_>, size: u64) -> Result<Vec<MessageId>>;

    /// Total raw size of all stored messages.
    fn get_total_message_size(&self, txn: &mut Self::Txn<'_>) -> Result<u64>;

    /// Delete a message and its status rows.
    fn remove_message(&self, txn: &mut Self::Txn<'_>, id: &MessageId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Message status
    // ─────────────────────────────────────────────────────────────────────────

    fn get_status(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        id: &MessageId,
    ) -> Result<Option<MessageStatus>>;

    /// If the message is stored and visible to the contact, mark it seen and
    /// return true.
    fn set_status_seen_if_visible(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        id: &MessageId,
    ) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Ratings
    // ─────────────────────────────────────────────────────────────────────────

    fn get_rating(&self, txn: &mut Self::Txn<'_>, author: &AuthorId) -> Result<Rating>;

    /// Store a rating and return the previous one.
    fn set_rating(&self, txn: &mut Self::Txn<'_>, author: &AuthorId, rating: Rating)
        -> Result<Rating>;

    /// Set the sendable flag on every status row of the author's messages.
    /// Returns the number of rows that changed.
    fn set_sendability(
        &self,
        txn: &mut Self::Txn<'_>,
        author: &AuthorId,
        sendable: bool,
    ) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Batches
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a sent batch and mark its messages sent.
    fn add_outstanding_batch(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        id: &BatchId,
        messages: &[MessageId],
        sent_at: i64,
    ) -> Result<()>;

    fn get_outstanding_batches(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
    ) -> Result<Vec<OutstandingBatch>>;

    /// Outstanding batches recorded at or before `cutoff`.
    fn get_lost_batches(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        cutoff: i64,
    ) -> Result<Vec<BatchId>>;

    /// Delete an acknowledged batch and mark its messages seen. Unknown
    /// batches are ignored. Returns the messages marked seen.
    fn remove_acked_batch(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        id: &BatchId,
    ) -> Result<Vec<MessageId>>;

    /// Delete a batch if it is still outstanding and still recorded at or
    /// before `cutoff`, returning its sent messages to new. Returns the
    /// messages made eligible again, or `None` if the batch was not removed.
    fn remove_lost_batch(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        id: &BatchId,
        cutoff: i64,
    ) -> Result<Option<Vec<MessageId>>>;

    /// Remember that a received batch needs acknowledging.
    fn add_batch_to_ack(&self, txn: &mut Self::Txn<'_>, c: ContactId, id: &BatchId)
        -> Result<()>;

    fn get_batches_to_ack(&self, txn: &mut Self::Txn<'_>, c: ContactId) -> Result<Vec<BatchId>>;

    fn remove_batches_to_ack(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        ids: &[BatchId],
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Transport secrets
    // ─────────────────────────────────────────────────────────────────────────

    /// Store secrets, replacing any with the same (contact, transport, period).
    fn add_secrets(&self, txn: &mut Self::Txn<'_>, secrets: &[TemporarySecret]) -> Result<()>;

    fn get_secrets(&self, txn: &mut Self::Txn<'_>) -> Result<Vec<TemporarySecret>>;

    fn get_secret(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<Option<TemporarySecret>>;

    /// Increment the outgoing counter and return the new value, or `None`
    /// if there is no such secret.
    fn increment_connection_counter(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<Option<u64>>;

    /// Overwrite the incoming window. Returns false if there is no such
    /// secret.
    fn set_connection_window(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
        window: &ConnectionWindow,
    ) -> Result<bool>;

    /// Delete a pair's secrets for periods before `period`. Returns how many
    /// were deleted.
    fn remove_secrets_before(
        &self,
        txn: &mut Self::Txn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<usize>;
}
