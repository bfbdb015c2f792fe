//! Replay window tracking over transport secrets.
//!
//! Outgoing connections take the next value of a per-period counter.
//! Incoming connection numbers are checked against that period's window and
//! the updated window is written back in the same transaction, so a number
//! can be accepted at most once even when two connections race.

use tracing::{debug, warn};

use hearsay_core::{ContactId, TemporarySecret, TransportId};
use hearsay_store::Database;

use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::locks::LockSet;

impl<D: Database> SyncEngine<D> {
    /// Store secrets. Every secret's contact must exist.
    pub fn add_secrets(&self, secrets: &[TemporarySecret]) -> Result<()> {
        let _locks = self.locks.acquire(LockSet::CONTACT | LockSet::TRANSPORT);
        self.with_txn(|txn| {
            for s in secrets {
                self.require_contact(txn, s.contact)?;
            }
            Ok(self.db.add_secrets(txn, secrets)?)
        })
    }

    pub fn get_secrets(&self) -> Result<Vec<TemporarySecret>> {
        let _locks = self.locks.acquire(LockSet::TRANSPORT);
        self.with_txn(|txn| Ok(self.db.get_secrets(txn)?))
    }

    /// Take the next outgoing connection number for the period.
    pub fn next_outgoing_connection(
        &self,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<u64> {
        let _locks = self.locks.acquire(LockSet::CONTACT | LockSet::TRANSPORT);
        self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            self.db
                .increment_connection_counter(txn, c, t, period)?
                .ok_or(SyncError::NoSuchSecret {
                    contact: c,
                    transport: t,
                    period,
                })
        })
    }

    /// Consume incoming connection number `n` for the period.
    ///
    /// Fails with [`SyncError::ReplayRejected`] if `n` is below the window
    /// or was already consumed; the stored window is then unchanged.
    pub fn accept_incoming_connection(
        &self,
        c: ContactId,
        t: TransportId,
        period: u64,
        n: u64,
    ) -> Result<()> {
        let _locks = self.locks.acquire(LockSet::CONTACT | LockSet::TRANSPORT);
        let result = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let secret = self.secret(txn, c, t, period)?;
            let window = secret.window.accept(n)?;
            self.db.set_connection_window(txn, c, t, period, &window)?;
            Ok(window.centre())
        });
        match result {
            Ok(centre) => {
                debug!(contact = %c, transport = %t, period, n, centre, "accepted connection");
                Ok(())
            }
            Err(SyncError::ReplayRejected(e)) => {
                warn!(contact = %c, transport = %t, period, error = %e, "rejected connection");
                Err(SyncError::ReplayRejected(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Incoming connection numbers the transport should still listen for.
    pub fn unseen_connections(
        &self,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<Vec<u64>> {
        let _locks = self.locks.acquire(LockSet::CONTACT | LockSet::TRANSPORT);
        self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            Ok(self.secret(txn, c, t, period)?.window.unseen())
        })
    }

    /// Derive the next period's secret from the stored one. The new secret
    /// starts with a zero counter and a fresh window.
    pub fn rotate_secret(
        &self,
        c: ContactId,
        t: TransportId,
        old_period: u64,
        new_period: u64,
        secret: Vec<u8>,
    ) -> Result<TemporarySecret> {
        let _locks = self.locks.acquire(LockSet::CONTACT | LockSet::TRANSPORT);
        let rotated = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let rotated = self.secret(txn, c, t, old_period)?.rotate(new_period, secret);
            self.db.add_secrets(txn, std::slice::from_ref(&rotated))?;
            Ok(rotated)
        })?;
        debug!(contact = %c, transport = %t, old_period, new_period, "rotated secret");
        Ok(rotated)
    }

    /// Forget a pair's secrets for periods before `period`.
    pub fn remove_secrets_before(&self, c: ContactId, t: TransportId, period: u64) -> Result<usize> {
        let _locks = self.locks.acquire(LockSet::CONTACT | LockSet::TRANSPORT);
        let removed = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            Ok(self.db.remove_secrets_before(txn, c, t, period)?)
        })?;
        if removed > 0 {
            debug!(contact = %c, transport = %t, period, removed, "removed old secrets");
        }
        Ok(removed)
    }

    fn secret(
        &self,
        txn: &mut D::Txn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<TemporarySecret> {
        self.db
            .get_secret(txn, c, t, period)?
            .ok_or(SyncError::NoSuchSecret {
                contact: c,
                transport: t,
                period,
            })
    }
}
