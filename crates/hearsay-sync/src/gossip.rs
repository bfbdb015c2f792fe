//! Subscription and transport gossip.
//!
//! Each side advertises its subscription set and transport properties with
//! the time they last changed. The receiver keeps the newest version per
//! contact and ignores anything older or equally old.

use tracing::debug;

use hearsay_core::{ContactId, Group, TransportProperties};
use hearsay_store::Database;

use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::events::Event;
use crate::locks::LockSet;
use crate::packets::{limits, SubscriptionUpdate, TransportUpdate};
use crate::writers::{SubscriptionWriter, TransportWriter};

impl<D: Database> SyncEngine<D> {
    /// Advertise our subscriptions to a contact.
    pub fn generate_subscriptions(
        &self,
        c: ContactId,
        writer: &mut dyn SubscriptionWriter,
    ) -> Result<SubscriptionUpdate> {
        let _locks = self.locks.acquire(LockSet::CONTACT | LockSet::SUBSCRIPTION);
        self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let update = SubscriptionUpdate {
                groups: self.db.get_subscriptions(txn)?,
                timestamp: self.db.get_subscriptions_timestamp(txn)?,
            };
            writer.write_subscriptions(&update)?;
            Ok(update)
        })
    }

    /// Advertise our transport properties to a contact.
    pub fn generate_transports(
        &self,
        c: ContactId,
        writer: &mut dyn TransportWriter,
    ) -> Result<TransportUpdate> {
        let _locks = self.locks.acquire(LockSet::CONTACT | LockSet::TRANSPORT);
        self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            let (properties, timestamp) = self.db.get_local_transports(txn)?;
            let update = TransportUpdate {
                properties,
                timestamp,
            };
            writer.write_transports(&update)?;
            Ok(update)
        })
    }

    /// Apply a contact's subscription set if it is newer than the one we
    /// hold. Returns false for a stale update.
    pub fn receive_subscriptions(&self, c: ContactId, update: &SubscriptionUpdate) -> Result<bool> {
        if update.groups.len() > limits::MAX_GROUPS {
            return Err(SyncError::ProtocolViolation(format!(
                "{} groups in subscription update",
                update.groups.len()
            )));
        }
        let locks = self.locks.acquire(
            LockSet::CONTACT | LockSet::MESSAGE | LockSet::MESSAGE_STATUS | LockSet::SUBSCRIPTION,
        );
        let applied = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            Ok(self
                .db
                .set_subscriptions(txn, c, &update.groups, update.timestamp)?)
        })?;
        drop(locks);
        debug!(contact = %c, groups = update.groups.len(), timestamp = update.timestamp, applied, "received subscriptions");
        if applied {
            self.emit(Event::SubscriptionsUpdated(c));
        }
        Ok(applied)
    }

    /// Apply a contact's transport properties if they are newer than the
    /// ones we hold. Returns false for a stale update.
    pub fn receive_transports(&self, c: ContactId, update: &TransportUpdate) -> Result<bool> {
        if update.properties.len() > limits::MAX_PROPERTIES {
            return Err(SyncError::ProtocolViolation(format!(
                "{} transport properties",
                update.properties.len()
            )));
        }
        let locks = self.locks.acquire(LockSet::CONTACT | LockSet::TRANSPORT);
        let applied = self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            Ok(self
                .db
                .set_transports(txn, c, &update.properties, update.timestamp)?)
        })?;
        drop(locks);
        debug!(contact = %c, timestamp = update.timestamp, applied, "received transports");
        if applied {
            self.emit(Event::TransportsUpdated(c));
        }
        Ok(applied)
    }

    pub fn get_contact_subscriptions(&self, c: ContactId) -> Result<Vec<Group>> {
        let _locks = self.locks.acquire(LockSet::CONTACT | LockSet::SUBSCRIPTION);
        self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            Ok(self.db.get_contact_subscriptions(txn, c)?)
        })
    }

    /// Replace our transport properties, stamped with the current time.
    pub fn set_local_transports(&self, transports: &TransportProperties) -> Result<()> {
        let locks = self.locks.acquire(LockSet::TRANSPORT);
        let now = self.clock.now_millis();
        self.with_txn(|txn| Ok(self.db.set_local_transports(txn, transports, now)?))?;
        drop(locks);
        self.emit(Event::LocalTransportsUpdated);
        Ok(())
    }

    pub fn get_local_transports(&self) -> Result<TransportProperties> {
        let _locks = self.locks.acquire(LockSet::TRANSPORT);
        self.with_txn(|txn| Ok(self.db.get_local_transports(txn)?.0))
    }

    pub fn get_contact_transports(&self, c: ContactId) -> Result<TransportProperties> {
        let _locks = self.locks.acquire(LockSet::CONTACT | LockSet::TRANSPORT);
        self.with_txn(|txn| {
            self.require_contact(txn, c)?;
            Ok(self.db.get_contact_transports(txn, c)?)
        })
    }
}
