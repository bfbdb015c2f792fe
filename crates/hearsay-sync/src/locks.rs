//! Ordered domain locks.
//!
//! The store is shared by every connection and the maintenance task.
//! Operations declare the domains they touch as a [`LockSet`] and take them
//! all at once through [`Locks::acquire`], which always locks in the order
//!
//! ```text
//! contact → message → message-status → rating → subscription → transport
//! ```
//!
//! Since no code path takes a domain lock any other way, there is no
//! circular wait. Locks are released together when the [`LockGuard`] drops,
//! which callers arrange to happen after their transaction has ended.

use std::fmt;
use std::ops::BitOr;
use std::sync::{Mutex, MutexGuard};

/// A lockable domain of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Domain {
    Contact = 0,
    Message = 1,
    MessageStatus = 2,
    Rating = 3,
    Subscription = 4,
    Transport = 5,
}

impl Domain {
    /// All domains in lock order.
    pub const ALL: [Domain; 6] = [
        Domain::Contact,
        Domain::Message,
        Domain::MessageStatus,
        Domain::Rating,
        Domain::Subscription,
        Domain::Transport,
    ];

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// A set of domains to lock together.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LockSet(u8);

impl LockSet {
    pub const EMPTY: LockSet = LockSet(0);
    pub const CONTACT: LockSet = LockSet(Domain::Contact.bit());
    pub const MESSAGE: LockSet = LockSet(Domain::Message.bit());
    pub const MESSAGE_STATUS: LockSet = LockSet(Domain::MessageStatus.bit());
    pub const RATING: LockSet = LockSet(Domain::Rating.bit());
    pub const SUBSCRIPTION: LockSet = LockSet(Domain::Subscription.bit());
    pub const TRANSPORT: LockSet = LockSet(Domain::Transport.bit());

    pub const fn union(self, other: LockSet) -> LockSet {
        LockSet(self.0 | other.0)
    }

    pub const fn contains(self, domain: Domain) -> bool {
        self.0 & domain.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The domains in the set, in lock order.
    pub fn domains(self) -> impl Iterator<Item = Domain> {
        Domain::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl BitOr for LockSet {
    type Output = LockSet;

    fn bitor(self, rhs: LockSet) -> LockSet {
        self.union(rhs)
    }
}

impl From<Domain> for LockSet {
    fn from(domain: Domain) -> Self {
        LockSet(domain.bit())
    }
}

impl fmt::Debug for LockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.domains()).finish()
    }
}

/// One mutex per domain.
#[derive(Debug, Default)]
pub struct Locks {
    domains: [Mutex<()>; 6],
}

impl Locks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every domain in `set`, in the fixed order.
    ///
    /// The domain mutexes guard no data, so a poisoned one is taken over
    /// rather than reported.
    pub fn acquire(&self, set: LockSet) -> LockGuard<'_> {
        let held = set
            .domains()
            .map(|d| {
                let guard = self.domains[d as usize]
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                (d, guard)
            })
            .collect();
        LockGuard { set, held }
    }
}

/// Held domain locks. Dropping it releases them in reverse order.
pub struct LockGuard<'a> {
    set: LockSet,
    held: Vec<(Domain, MutexGuard<'a, ()>)>,
}

impl LockGuard<'_> {
    pub fn set(&self) -> LockSet {
        self.set
    }

    pub fn holds(&self, domain: Domain) -> bool {
        self.set.contains(domain)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        while let Some((_, guard)) = self.held.pop() {
            drop(guard);
        }
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("set", &self.set).finish()
    }
}
