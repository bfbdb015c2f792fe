//! Proptest generators for property-based testing.

use std::time::Duration;

use proptest::prelude::*;

use hearsay_core::{AuthorId, BatchId, GroupId, MessageId, Rating};

/// Generate a random MessageId.
pub fn message_id() -> impl Strategy<Value = MessageId> {
    any::<[u8; 32]>().prop_map(MessageId::from_bytes)
}

/// Generate a random BatchId.
pub fn batch_id() -> impl Strategy<Value = BatchId> {
    any::<[u8; 32]>().prop_map(BatchId::from_bytes)
}

/// Generate a random GroupId.
pub fn group_id() -> impl Strategy<Value = GroupId> {
    any::<[u8; 32]>().prop_map(GroupId::from_bytes)
}

/// Generate a random AuthorId.
pub fn author_id() -> impl Strategy<Value = AuthorId> {
    any::<[u8; 32]>().prop_map(AuthorId::from_bytes)
}

/// Generate a Rating.
pub fn rating() -> impl Strategy<Value = Rating> {
    prop_oneof![Just(Rating::Unrated), Just(Rating::Good), Just(Rating::Bad)]
}

/// Generate up to `max` distinct, non-empty message bodies.
pub fn bodies(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::hash_set(prop::collection::vec(any::<u8>(), 1..64), 1..=max)
        .prop_map(|set| set.into_iter().collect())
}

/// One step of a sync session between a sender and a receiver that may
/// lose packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    /// Sender writes a batch of at most this many messages.
    SendBatch { max_messages: usize },
    /// The last sent batch never arrives.
    DropLastBatch,
    /// The receiver acks everything it has received.
    Ack,
    /// Time passes.
    Wait(Duration),
    /// The sender declares overdue batches lost.
    FindLost,
}

/// Generate a sync step.
pub fn sync_step() -> impl Strategy<Value = SyncStep> {
    prop_oneof![
        4 => (1usize..4).prop_map(|max_messages| SyncStep::SendBatch { max_messages }),
        1 => Just(SyncStep::DropLastBatch),
        2 => Just(SyncStep::Ack),
        1 => (0u64..120).prop_map(|s| SyncStep::Wait(Duration::from_secs(s))),
        1 => Just(SyncStep::FindLost),
    ]
}

/// Generate a sequence of sync steps.
pub fn sync_steps(max_len: usize) -> impl Strategy<Value = Vec<SyncStep>> {
    prop::collection::vec(sync_step(), 1..=max_len)
}

/// Generate a sequence of rating changes.
pub fn ratings(max_len: usize) -> impl Strategy<Value = Vec<Rating>> {
    prop::collection::vec(rating(), 1..=max_len)
}
