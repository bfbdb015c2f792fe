//! Rotating per-period transport secrets.
//!
//! Each (contact, transport) pair shares a secret per rotation period. The
//! secret for a period carries the outgoing connection counter and the
//! incoming replay window for that period.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ContactId, TransportId};
use crate::window::ConnectionWindow;

/// Transport secret for one (contact, transport, period).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporarySecret {
    pub contact: ContactId,
    pub transport: TransportId,
    /// Start of the first period (Unix ms), agreed during pairing.
    pub epoch: i64,
    /// Maximum expected clock difference between the peers (ms).
    pub clock_diff: i64,
    /// Maximum expected transport latency (ms).
    pub latency: i64,
    /// Which side of the pairing we were. Breaks the symmetry of derivation.
    pub alice: bool,
    pub period: u64,
    /// Derived secret bytes. Opaque to the sync core.
    pub secret: Vec<u8>,
    /// Last outgoing connection number handed out in this period.
    pub outgoing: u64,
    pub window: ConnectionWindow,
}

impl TemporarySecret {
    /// A secret with a zero outgoing counter and a fresh window.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        contact: ContactId,
        transport: TransportId,
        epoch: i64,
        clock_diff: i64,
        latency: i64,
        alice: bool,
        period: u64,
        secret: Vec<u8>,
    ) -> Self {
        Self {
            contact,
            transport,
            epoch,
            clock_diff,
            latency,
            alice,
            period,
            secret,
            outgoing: 0,
            window: ConnectionWindow::new(),
        }
    }

    /// Derive the secret for a later period.
    ///
    /// Role and timing estimates carry forward. The counter and window do
    /// not: each period starts from zero.
    pub fn rotate(&self, period: u64, secret: Vec<u8>) -> Self {
        Self::new(
            self.contact,
            self.transport,
            self.epoch,
            self.clock_diff,
            self.latency,
            self.alice,
            period,
            secret,
        )
    }

    /// Length of one rotation period in ms.
    pub fn rotation_period(&self) -> i64 {
        (2 * self.clock_diff + self.latency).max(1)
    }

    /// The period that contains `now` (Unix ms). Times before the epoch map
    /// to period zero.
    pub fn period_at(&self, now: i64) -> u64 {
        if now <= self.epoch {
            return 0;
        }
        ((now - self.epoch) / self.rotation_period()) as u64
    }
}

impl fmt::Debug for TemporarySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporarySecret")
            .field("contact", &self.contact)
            .field("transport", &self.transport)
            .field("period", &self.period)
            .field("alice", &self.alice)
            .field("outgoing", &self.outgoing)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
