//! In-memory implementation of the Database trait.
//!
//! This is primarily for testing. A transaction works on a private copy of
//! the tables and swaps it in on commit, so an aborted or dropped
//! transaction leaves no trace. Transactions are serialized by the table
//! mutex, which the handle holds until it ends.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use hearsay_core::{
    is_sendable, AuthorId, BatchId, ConnectionWindow, ContactId, Group, GroupId, Message,
    MessageId, MessageStatus, Rating, Status, TemporarySecret, TransportId, TransportProperties,
};

use crate::error::{Result, StoreError};
use crate::traits::{Database, OutstandingBatch};

/// In-memory database. All data is lost when it is dropped.
///
/// A transaction works on a full copy of every table, taken by
/// [`start_transaction`](Database::start_transaction) and swapped in on
/// commit. Each transaction therefore costs O(n) in the size of the store,
/// which suits tests and small stores. Use [`SqliteDatabase`] for anything
/// larger.
///
/// [`SqliteDatabase`]: crate::SqliteDatabase
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
}

/// An open transaction on a [`MemoryDatabase`].
pub struct MemoryTxn<'a> {
    guard: MutexGuard<'a, Tables>,
    working: Tables,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    next_contact: u32,
    contacts: BTreeMap<ContactId, ContactRecord>,

    subscriptions: BTreeMap<GroupId, Group>,
    subscriptions_timestamp: i64,
    local_transports: TransportProperties,
    local_transports_timestamp: i64,

    messages: BTreeMap<MessageId, Message>,
    statuses: BTreeMap<(ContactId, MessageId), MessageStatus>,
    ratings: BTreeMap<AuthorId, Rating>,

    outstanding: BTreeMap<(ContactId, BatchId), OutstandingBatch>,
    to_ack: BTreeSet<(ContactId, BatchId)>,

    secrets: BTreeMap<(ContactId, TransportId, u64), TemporarySecret>,
}

#[derive(Debug, Clone, Default)]
struct ContactRecord {
    subscriptions: BTreeMap<GroupId, Group>,
    subscriptions_timestamp: i64,
    transports: TransportProperties,
    transports_timestamp: i64,
}

impl Tables {
    fn contact_mut(&mut self, c: ContactId) -> Result<&mut ContactRecord> {
        self.contacts
            .get_mut(&c)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown {}", c)))
    }

    fn rating_of(&self, author: Option<AuthorId>) -> Rating {
        author
            .and_then(|a| self.ratings.get(&a).copied())
            .unwrap_or_default()
    }

    fn sendable(&self, m: &Message) -> bool {
        is_sendable(m.author, self.rating_of(m.author))
    }

    fn oldest_first<'a>(&self, mut messages: Vec<&'a Message>) -> Vec<&'a Message> {
        messages.sort_by_key(|m| (m.timestamp, m.id));
        messages
    }

    fn remove_message(&mut self, id: &MessageId) {
        self.messages.remove(id);
        self.statuses.retain(|(_, m), _| m != id);
    }
}

impl MemoryDatabase {
    /// Create a new empty in-memory database.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                next_contact: 1,
                ..Tables::default()
            }),
        }
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl Database for MemoryDatabase {
    type Txn<'a> = MemoryTxn<'a>;

    fn start_transaction(&self) -> Result<MemoryTxn<'_>> {
        let guard = self
            .tables
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let working = guard.clone();
        Ok(MemoryTxn { guard, working })
    }

    fn commit_transaction(&self, txn: MemoryTxn<'_>) -> Result<()> {
        let MemoryTxn { mut guard, working } = txn;
        *guard = working;
        Ok(())
    }

    fn abort_transaction(&self, txn: MemoryTxn<'_>) {
        drop(txn);
    }

    fn add_contact(
        &self,
        txn: &mut MemoryTxn<'_>,
        transports: &TransportProperties,
    ) -> Result<ContactId> {
        let t = &mut txn.working;
        let c = ContactId(t.next_contact);
        t.next_contact += 1;
        t.contacts.insert(
            c,
            ContactRecord {
                transports: transports.clone(),
                ..ContactRecord::default()
            },
        );
        Ok(c)
    }

    fn contains_contact(&self, txn: &mut MemoryTxn<'_>, c: ContactId) -> Result<bool> {
        Ok(txn.working.contacts.contains_key(&c))
    }

    fn get_contacts(&self, txn: &mut MemoryTxn<'_>) -> Result<Vec<ContactId>> {
        Ok(txn.working.contacts.keys().copied().collect())
    }

    fn remove_contact(&self, txn: &mut MemoryTxn<'_>, c: ContactId) -> Result<()> {
        let t = &mut txn.working;
        t.contacts.remove(&c);
        t.statuses.retain(|(contact, _), _| *contact != c);
        t.outstanding.retain(|(contact, _), _| *contact != c);
        t.to_ack.retain(|(contact, _)| *contact != c);
        t.secrets.retain(|(contact, _, _), _| *contact != c);
        Ok(())
    }

    fn add_subscription(
        &self,
        txn: &mut MemoryTxn<'_>,
        group: &Group,
        timestamp: i64,
    ) -> Result<bool> {
        let t = &mut txn.working;
        if t.subscriptions.contains_key(&group.id) {
            return Ok(false);
        }
        t.subscriptions.insert(group.id, group.clone());
        t.subscriptions_timestamp = timestamp;
        Ok(true)
    }

    fn contains_subscription(&self, txn: &mut MemoryTxn<'_>, g: &GroupId) -> Result<bool> {
        Ok(txn.working.subscriptions.contains_key(g))
    }

    fn get_subscriptions(&self, txn: &mut MemoryTxn<'_>) -> Result<Vec<Group>> {
        Ok(txn.working.subscriptions.values().cloned().collect())
    }

    fn get_subscriptions_timestamp(&self, txn: &mut MemoryTxn<'_>) -> Result<i64> {
        Ok(txn.working.subscriptions_timestamp)
    }

    fn remove_subscription(
        &self,
        txn: &mut MemoryTxn<'_>,
        g: &GroupId,
        timestamp: i64,
    ) -> Result<bool> {
        let t = &mut txn.working;
        if t.subscriptions.remove(g).is_none() {
            return Ok(false);
        }
        t.subscriptions_timestamp = timestamp;
        let doomed: Vec<MessageId> = t
            .messages
            .values()
            .filter(|m| m.group == *g)
            .map(|m| m.id)
            .collect();
        for id in &doomed {
            t.remove_message(id);
        }
        Ok(true)
    }

    fn set_subscriptions(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        groups: &[Group],
        timestamp: i64,
    ) -> Result<bool> {
        let t = &mut txn.working;
        let record = t.contact_mut(c)?;
        if timestamp <= record.subscriptions_timestamp {
            return Ok(false);
        }
        record.subscriptions = groups.iter().map(|g| (g.id, g.clone())).collect();
        record.subscriptions_timestamp = timestamp;
        let shared: BTreeSet<GroupId> = record.subscriptions.keys().copied().collect();

        // Drop rows for groups no longer shared
        let messages = &t.messages;
        t.statuses.retain(|(contact, m), _| {
            *contact != c || messages.get(m).map_or(false, |m| shared.contains(&m.group))
        });

        // Add rows for messages in newly shared groups
        let missing: Vec<(MessageId, bool)> = t
            .messages
            .values()
            .filter(|m| shared.contains(&m.group) && !t.statuses.contains_key(&(c, m.id)))
            .map(|m| (m.id, t.sendable(m)))
            .collect();
        for (id, sendable) in missing {
            t.statuses.insert(
                (c, id),
                MessageStatus {
                    contact: c,
                    message: id,
                    status: Status::New,
                    sendable,
                },
            );
        }
        Ok(true)
    }

    fn get_contact_subscriptions(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
    ) -> Result<Vec<Group>> {
        Ok(txn
            .working
            .contacts
            .get(&c)
            .map(|r| r.subscriptions.values().cloned().collect())
            .unwrap_or_default())
    }

    fn set_local_transports(
        &self,
        txn: &mut MemoryTxn<'_>,
        transports: &TransportProperties,
        timestamp: i64,
    ) -> Result<()> {
        txn.working.local_transports = transports.clone();
        txn.working.local_transports_timestamp = timestamp;
        Ok(())
    }

    fn get_local_transports(
        &self,
        txn: &mut MemoryTxn<'_>,
    ) -> Result<(TransportProperties, i64)> {
        Ok((
            txn.working.local_transports.clone(),
            txn.working.local_transports_timestamp,
        ))
    }

    fn set_transports(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        transports: &TransportProperties,
        timestamp: i64,
    ) -> Result<bool> {
        let record = txn.working.contact_mut(c)?;
        if timestamp <= record.transports_timestamp {
            return Ok(false);
        }
        record.transports = transports.clone();
        record.transports_timestamp = timestamp;
        Ok(true)
    }

    fn get_contact_transports(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
    ) -> Result<TransportProperties> {
        Ok(txn
            .working
            .contacts
            .get(&c)
            .map(|r| r.transports.clone())
            .unwrap_or_default())
    }

    fn add_message(
        &self,
        txn: &mut MemoryTxn<'_>,
        m: &Message,
        sender: Option<ContactId>,
    ) -> Result<bool> {
        let t = &mut txn.working;
        if t.messages.contains_key(&m.id) {
            return Ok(false);
        }
        let sendable = t.sendable(m);
        let visible: Vec<ContactId> = t
            .contacts
            .iter()
            .filter(|(_, r)| r.subscriptions.contains_key(&m.group))
            .map(|(c, _)| *c)
            .collect();
        for c in visible {
            let status = if Some(c) == sender {
                Status::Seen
            } else {
                Status::New
            };
            t.statuses.insert(
                (c, m.id),
                MessageStatus {
                    contact: c,
                    message: m.id,
                    status,
                    sendable,
                },
            );
        }
        t.messages.insert(m.id, m.clone());
        Ok(true)
    }

    fn contains_message(&self, txn: &mut MemoryTxn<'_>, id: &MessageId) -> Result<bool> {
        Ok(txn.working.messages.contains_key(id))
    }

    fn get_message(&self, txn: &mut MemoryTxn<'_>, id: &MessageId) -> Result<Option<Bytes>> {
        Ok(txn.working.messages.get(id).map(|m| m.raw.clone()))
    }

    fn get_message_if_sendable(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        id: &MessageId,
    ) -> Result<Option<Bytes>> {
        let t = &txn.working;
        match t.statuses.get(&(c, *id)) {
            Some(s) if s.eligible() => Ok(t.messages.get(id).map(|m| m.raw.clone())),
            _ => Ok(None),
        }
    }

    fn get_sendable_messages(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        capacity: usize,
    ) -> Result<Vec<MessageId>> {
        let t = &txn.working;
        let eligible: Vec<&Message> = t
            .statuses
            .range((c, MessageId::ZERO)..=(c, MessageId::from_bytes([0xff; 32])))
            .filter(|(_, s)| s.eligible())
            .filter_map(|((_, id), _)| t.messages.get(id))
            .collect();

        let mut total = 0usize;
        let mut ids = Vec::new();
        for m in t.oldest_first(eligible) {
            if total + m.size() > capacity {
                break;
            }
            total += m.size();
            ids.push(m.id);
        }
        Ok(ids)
    }

    fn get_old_messages(&self, txn: &mut MemoryTxn<'_>, size: u64) -> Result<Vec<MessageId>> {
        let t = &txn.working;
        let mut total = 0u64;
        let mut ids = Vec::new();
        for m in t.oldest_first(t.messages.values().collect()) {
            if total >= size {
                break;
            }
            total += m.size() as u64;
            ids.push(m.id);
        }
        Ok(ids)
    }

    fn get_total_message_size(&self, txn: &mut MemoryTxn<'_>) -> Result<u64> {
        Ok(txn.working.messages.values().map(|m| m.size() as u64).sum())
    }

    fn remove_message(&self, txn: &mut MemoryTxn<'_>, id: &MessageId) -> Result<()> {
        txn.working.remove_message(id);
        Ok(())
    }

    fn get_status(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        id: &MessageId,
    ) -> Result<Option<MessageStatus>> {
        Ok(txn.working.statuses.get(&(c, *id)).copied())
    }

    fn set_status_seen_if_visible(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        id: &MessageId,
    ) -> Result<bool> {
        match txn.working.statuses.get_mut(&(c, *id)) {
            Some(s) => {
                s.status = Status::Seen;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_rating(&self, txn: &mut MemoryTxn<'_>, author: &AuthorId) -> Result<Rating> {
        Ok(txn.working.rating_of(Some(*author)))
    }

    fn set_rating(
        &self,
        txn: &mut MemoryTxn<'_>,
        author: &AuthorId,
        rating: Rating,
    ) -> Result<Rating> {
        Ok(txn
            .working
            .ratings
            .insert(*author, rating)
            .unwrap_or_default())
    }

    fn set_sendability(
        &self,
        txn: &mut MemoryTxn<'_>,
        author: &AuthorId,
        sendable: bool,
    ) -> Result<usize> {
        let t = &mut txn.working;
        let messages = &t.messages;
        let mut changed = 0;
        for ((_, id), status) in t.statuses.iter_mut() {
            let by_author = messages
                .get(id)
                .map_or(false, |m| m.author == Some(*author));
            if by_author && status.sendable != sendable {
                status.sendable = sendable;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn add_outstanding_batch(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        id: &BatchId,
        messages: &[MessageId],
        sent_at: i64,
    ) -> Result<()> {
        let t = &mut txn.working;
        for m in messages {
            if let Some(s) = t.statuses.get_mut(&(c, *m)) {
                if s.status == Status::New {
                    s.status = Status::Sent;
                }
            }
        }
        t.outstanding.insert(
            (c, *id),
            OutstandingBatch {
                contact: c,
                id: *id,
                messages: messages.to_vec(),
                sent_at,
            },
        );
        Ok(())
    }

    fn get_outstanding_batches(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
    ) -> Result<Vec<OutstandingBatch>> {
        let mut batches: Vec<OutstandingBatch> = txn
            .working
            .outstanding
            .values()
            .filter(|b| b.contact == c)
            .cloned()
            .collect();
        batches.sort_by_key(|b| (b.sent_at, b.id));
        Ok(batches)
    }

    fn get_lost_batches(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        cutoff: i64,
    ) -> Result<Vec<BatchId>> {
        Ok(self
            .get_outstanding_batches(txn, c)?
            .into_iter()
            .filter(|b| b.sent_at <= cutoff)
            .map(|b| b.id)
            .collect())
    }

    fn remove_acked_batch(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        id: &BatchId,
    ) -> Result<Vec<MessageId>> {
        let t = &mut txn.working;
        let Some(batch) = t.outstanding.remove(&(c, *id)) else {
            return Ok(Vec::new());
        };
        let mut seen = Vec::new();
        for m in batch.messages {
            if let Some(s) = t.statuses.get_mut(&(c, m)) {
                s.status = Status::Seen;
                seen.push(m);
            }
        }
        Ok(seen)
    }

    fn remove_lost_batch(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        id: &BatchId,
        cutoff: i64,
    ) -> Result<Option<Vec<MessageId>>> {
        let t = &mut txn.working;
        match t.outstanding.get(&(c, *id)) {
            Some(b) if b.sent_at <= cutoff => {}
            _ => return Ok(None),
        }
        let batch = t
            .outstanding
            .remove(&(c, *id))
            .ok_or_else(|| StoreError::InvalidData(format!("batch {} vanished", id)))?;
        let mut retry = Vec::new();
        for m in batch.messages {
            if let Some(s) = t.statuses.get_mut(&(c, m)) {
                if s.status == Status::Sent {
                    s.status = Status::New;
                    retry.push(m);
                }
            }
        }
        Ok(Some(retry))
    }

    fn add_batch_to_ack(&self, txn: &mut MemoryTxn<'_>, c: ContactId, id: &BatchId) -> Result<()> {
        txn.working.to_ack.insert((c, *id));
        Ok(())
    }

    fn get_batches_to_ack(&self, txn: &mut MemoryTxn<'_>, c: ContactId) -> Result<Vec<BatchId>> {
        Ok(txn
            .working
            .to_ack
            .iter()
            .filter(|(contact, _)| *contact == c)
            .map(|(_, b)| *b)
            .collect())
    }

    fn remove_batches_to_ack(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        ids: &[BatchId],
    ) -> Result<()> {
        for id in ids {
            txn.working.to_ack.remove(&(c, *id));
        }
        Ok(())
    }

    fn add_secrets(&self, txn: &mut MemoryTxn<'_>, secrets: &[TemporarySecret]) -> Result<()> {
        for s in secrets {
            txn.working
                .secrets
                .insert((s.contact, s.transport, s.period), s.clone());
        }
        Ok(())
    }

    fn get_secrets(&self, txn: &mut MemoryTxn<'_>) -> Result<Vec<TemporarySecret>> {
        Ok(txn.working.secrets.values().cloned().collect())
    }

    fn get_secret(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<Option<TemporarySecret>> {
        Ok(txn.working.secrets.get(&(c, t, period)).cloned())
    }

    fn increment_connection_counter(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<Option<u64>> {
        Ok(txn.working.secrets.get_mut(&(c, t, period)).map(|s| {
            s.outgoing += 1;
            s.outgoing
        }))
    }

    fn set_connection_window(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
        window: &ConnectionWindow,
    ) -> Result<bool> {
        match txn.working.secrets.get_mut(&(c, t, period)) {
            Some(s) => {
                s.window = *window;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_secrets_before(
        &self,
        txn: &mut MemoryTxn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<usize> {
        let before = txn.working.secrets.len();
        txn.working
            .secrets
            .retain(|(contact, transport, p), _| !(*contact == c && *transport == t && *p < period));
        Ok(before - txn.working.secrets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(group: GroupId, timestamp: i64, body: &[u8]) -> Message {
        Message::new(group, None, timestamp, body.to_vec())
    }

    #[test]
    fn test_abort_leaves_no_trace() {
        let db = MemoryDatabase::new();
        let mut txn = db.start_transaction().unwrap();
        db.add_contact(&mut txn, &TransportProperties::new()).unwrap();
        db.abort_transaction(txn);

        let mut txn = db.start_transaction().unwrap();
        assert!(db.get_contacts(&mut txn).unwrap().is_empty());
        db.commit_transaction(txn).unwrap();
    }

    #[test]
    fn test_dropped_transaction_is_aborted() {
        let db = MemoryDatabase::new();
        {
            let mut txn = db.start_transaction().unwrap();
            db.add_contact(&mut txn, &TransportProperties::new()).unwrap();
        }
        let mut txn = db.start_transaction().unwrap();
        assert!(db.get_contacts(&mut txn).unwrap().is_empty());
    }

    #[test]
    fn test_statuses_follow_contact_subscriptions() {
        let db = MemoryDatabase::new();
        let group = Group::new("g", b"");
        let other = Group::new("h", b"");
        let mut txn = db.start_transaction().unwrap();
        let c = db.add_contact(&mut txn, &TransportProperties::new()).unwrap();
        db.add_subscription(&mut txn, &group, 1).unwrap();
        let m = message(group.id, 10, b"m");
        db.add_message(&mut txn, &m, None).unwrap();
        assert!(db.get_status(&mut txn, c, &m.id).unwrap().is_none());

        assert!(db.set_subscriptions(&mut txn, c, &[group.clone()], 5).unwrap());
        let s = db.get_status(&mut txn, c, &m.id).unwrap().unwrap();
        assert_eq!(s.status, Status::New);
        assert!(s.sendable);

        // Stale update is ignored
        assert!(!db.set_subscriptions(&mut txn, c, &[other.clone()], 4).unwrap());
        assert!(db.get_status(&mut txn, c, &m.id).unwrap().is_some());

        assert!(db.set_subscriptions(&mut txn, c, &[other], 6).unwrap());
        assert!(db.get_status(&mut txn, c, &m.id).unwrap().is_none());
    }

    #[test]
    fn test_sendable_messages_respect_capacity_and_order() {
        let db = MemoryDatabase::new();
        let group = Group::new("g", b"");
        let mut txn = db.start_transaction().unwrap();
        let c = db.add_contact(&mut txn, &TransportProperties::new()).unwrap();
        db.set_subscriptions(&mut txn, c, &[group.clone()], 1).unwrap();
        let late = message(group.id, 20, b"late!");
        let early = message(group.id, 10, b"early");
        db.add_message(&mut txn, &late, None).unwrap();
        db.add_message(&mut txn, &early, None).unwrap();

        let ids = db.get_sendable_messages(&mut txn, c, 100).unwrap();
        assert_eq!(ids, vec![early.id, late.id]);
        let ids = db.get_sendable_messages(&mut txn, c, 7).unwrap();
        assert_eq!(ids, vec![early.id]);
    }

    #[test]
    fn test_lost_batch_returns_messages_to_new() {
        let db = MemoryDatabase::new();
        let group = Group::new("g", b"");
        let mut txn = db.start_transaction().unwrap();
        let c = db.add_contact(&mut txn, &TransportProperties::new()).unwrap();
        db.set_subscriptions(&mut txn, c, &[group.clone()], 1).unwrap();
        let m = message(group.id, 10, b"m");
        db.add_message(&mut txn, &m, None).unwrap();
        let b = BatchId::from_bytes([9; 32]);
        db.add_outstanding_batch(&mut txn, c, &b, &[m.id], 100).unwrap();
        assert!(db.get_sendable_messages(&mut txn, c, 100).unwrap().is_empty());

        assert_eq!(db.remove_lost_batch(&mut txn, c, &b, 99).unwrap(), None);
        assert_eq!(db.remove_lost_batch(&mut txn, c, &b, 100).unwrap(), Some(vec![m.id]));
        assert_eq!(db.get_sendable_messages(&mut txn, c, 100).unwrap(), vec![m.id]);
        assert_eq!(db.remove_lost_batch(&mut txn, c, &b, 100).unwrap(), None);
    }

    #[test]
    fn test_remove_contact_cascades() {
        let db = MemoryDatabase::new();
        let group = Group::new("g", b"");
        let mut txn = db.start_transaction().unwrap();
        let c = db.add_contact(&mut txn, &TransportProperties::new()).unwrap();
        db.set_subscriptions(&mut txn, c, &[group.clone()], 1).unwrap();
        let m = message(group.id, 10, b"m");
        db.add_message(&mut txn, &m, None).unwrap();
        db.add_outstanding_batch(&mut txn, c, &BatchId::ZERO, &[m.id], 1).unwrap();
        db.add_batch_to_ack(&mut txn, c, &BatchId::ZERO).unwrap();
        db.add_secrets(
            &mut txn,
            &[TemporarySecret::new(c, TransportId(1), 0, 1, 1, true, 0, vec![1])],
        )
        .unwrap();

        db.remove_contact(&mut txn, c).unwrap();
        assert!(!db.contains_contact(&mut txn, c).unwrap());
        assert!(db.get_status(&mut txn, c, &m.id).unwrap().is_none());
        assert!(db.get_outstanding_batches(&mut txn, c).unwrap().is_empty());
        assert!(db.get_batches_to_ack(&mut txn, c).unwrap().is_empty());
        assert!(db.get_secrets(&mut txn).unwrap().is_empty());
        assert!(db.contains_message(&mut txn, &m.id).unwrap());
    }
}
