//! Events raised by the sync core.
//!
//! The core reports what it did to an [`EventListener`] handed to it at
//! construction. Listeners run on the caller's thread, after the
//! transaction that caused the event has committed and its locks are
//! released.

use hearsay_core::{AuthorId, BatchId, ContactId, Rating};

/// Something the sync core did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ContactAdded(ContactId),
    ContactRemoved(ContactId),
    /// New messages were stored, from a contact or generated locally.
    MessagesAdded {
        contact: Option<ContactId>,
        count: usize,
    },
    BatchSent {
        contact: ContactId,
        batch: BatchId,
        messages: usize,
    },
    BatchAcked {
        contact: ContactId,
        batch: BatchId,
    },
    /// An unacknowledged batch timed out; its messages may be sent again.
    BatchLost {
        contact: ContactId,
        batch: BatchId,
        messages: usize,
    },
    /// A contact asked for some of the messages we offered.
    MessagesRequested {
        contact: ContactId,
        count: usize,
    },
    RatingChanged {
        author: AuthorId,
        rating: Rating,
    },
    SubscriptionsUpdated(ContactId),
    TransportsUpdated(ContactId),
    LocalSubscriptionsUpdated,
    LocalTransportsUpdated,
    /// Old messages were deleted to free space.
    MessagesExpired {
        count: usize,
        bytes: u64,
    },
}

/// Receives [`Event`]s.
pub trait EventListener: Send + Sync {
    fn event_occurred(&self, event: &Event);
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl EventListener for NoopListener {
    fn event_occurred(&self, _event: &Event) {}
}
