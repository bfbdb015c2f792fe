//! SQLite implementation of the Database trait.
//!
//! This is the persistent backend. It uses rusqlite with bundled SQLite. A
//! transaction holds the connection mutex from `BEGIN IMMEDIATE` until it
//! commits, aborts or is dropped.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use hearsay_core::{
    AuthorId, BatchId, ConnectionWindow, ContactId, Group, GroupId, Message, MessageId,
    MessageStatus, Rating, Status, TemporarySecret, TransportId, TransportProperties,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{Database, OutstandingBatch};

/// SQLite-backed database.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

/// An open transaction on a [`SqliteDatabase`].
pub struct SqliteTxn<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl Drop for SqliteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback of dropped transaction failed");
            }
        }
    }
}

impl SqliteDatabase {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn blob32(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<[u8; 32]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes
        .try_into()
        .map_err(|_| rusqlite::Error::InvalidColumnType(idx, "id".into(), Type::Blob))
}

fn conversion(idx: usize, e: hearsay_core::CoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e))
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group::with_id(GroupId::from_bytes(blob32(row, 0)?), row.get::<_, String>(1)?))
}

fn row_to_secret(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemporarySecret> {
    let bitmap: Vec<u8> = row.get(10)?;
    let window = ConnectionWindow::from_parts(row.get::<_, i64>(9)? as u64, &bitmap)
        .map_err(|e| conversion(10, e))?;
    Ok(TemporarySecret {
        contact: ContactId(row.get(0)?),
        transport: TransportId(row.get(1)?),
        period: row.get::<_, i64>(2)? as u64,
        epoch: row.get(3)?,
        clock_diff: row.get(4)?,
        latency: row.get(5)?,
        alice: row.get(6)?,
        secret: row.get(7)?,
        outgoing: row.get::<_, i64>(8)? as u64,
        window,
    })
}

fn encode_properties(props: &TransportProperties) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(props, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_properties(bytes: &[u8]) -> Result<TransportProperties> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_status(value: u8) -> Result<Status> {
    Status::from_u8(value).ok_or_else(|| {
        hearsay_core::CoreError::InvalidEnum {
            kind: "status",
            value,
        }
        .into()
    })
}

fn decode_rating(value: u8) -> Result<Rating> {
    Rating::from_u8(value).ok_or_else(|| {
        hearsay_core::CoreError::InvalidEnum {
            kind: "rating",
            value,
        }
        .into()
    })
}

/// Walk (id, size) rows oldest first, keeping ids while `keep(total)` holds.
fn take_while_total(
    rows: Vec<([u8; 32], i64)>,
    mut keep: impl FnMut(u64, u64) -> bool,
) -> Vec<MessageId> {
    let mut total = 0u64;
    let mut ids = Vec::new();
    for (id, size) in rows {
        let size = size as u64;
        if !keep(total, size) {
            break;
        }
        total += size;
        ids.push(MessageId::from_bytes(id));
    }
    ids
}

impl SqliteDatabase {
    fn batch_messages(conn: &Connection, c: ContactId, id: &BatchId) -> Result<Vec<MessageId>> {
        let mut stmt = conn.prepare(
            "SELECT message_id FROM outstanding_messages
             WHERE contact_id = ?1 AND batch_id = ?2 ORDER BY position",
        )?;
        let ids = stmt
            .query_map(params![c.0, id.as_bytes().as_slice()], |row| blob32(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(MessageId::from_bytes).collect())
    }

    fn subscriptions_query(conn: &Connection, sql: &str, c: Option<ContactId>) -> Result<Vec<Group>> {
        let mut stmt = conn.prepare(sql)?;
        let groups = match c {
            Some(c) => stmt.query_map(params![c.0], row_to_group)?,
            None => stmt.query_map([], row_to_group)?,
        }
        .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }
}

impl Database for SqliteDatabase {
    type Txn<'a> = SqliteTxn<'a>;

    fn start_transaction(&self) -> Result<SqliteTxn<'_>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteTxn {
            conn,
            finished: false,
        })
    }

    fn commit_transaction(&self, mut txn: SqliteTxn<'_>) -> Result<()> {
        // On failure the drop below rolls back
        txn.conn.execute_batch("COMMIT")?;
        txn.finished = true;
        Ok(())
    }

    fn abort_transaction(&self, mut txn: SqliteTxn<'_>) {
        if let Err(e) = txn.conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "rollback failed");
        }
        txn.finished = true;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Contacts
    // ─────────────────────────────────────────────────────────────────────────

    fn add_contact(
        &self,
        txn: &mut SqliteTxn<'_>,
        transports: &TransportProperties,
    ) -> Result<ContactId> {
        txn.conn.execute(
            "INSERT INTO contacts (transports) VALUES (?1)",
            params![encode_properties(transports)?],
        )?;
        Ok(ContactId(txn.conn.last_insert_rowid() as u32))
    }

    fn contains_contact(&self, txn: &mut SqliteTxn<'_>, c: ContactId) -> Result<bool> {
        Ok(txn
            .conn
            .query_row(
                "SELECT 1 FROM contacts WHERE contact_id = ?1",
                params![c.0],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn get_contacts(&self, txn: &mut SqliteTxn<'_>) -> Result<Vec<ContactId>> {
        let mut stmt = txn
            .conn
            .prepare("SELECT contact_id FROM contacts ORDER BY contact_id")?;
        let ids = stmt
            .query_map([], |row| Ok(ContactId(row.get(0)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn remove_contact(&self, txn: &mut SqliteTxn<'_>, c: ContactId) -> Result<()> {
        txn.conn
            .execute("DELETE FROM contacts WHERE contact_id = ?1", params![c.0])?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    fn add_subscription(
        &self,
        txn: &mut SqliteTxn<'_>,
        group: &Group,
        timestamp: i64,
    ) -> Result<bool> {
        let added = txn.conn.execute(
            "INSERT OR IGNORE INTO subscriptions (group_id, name) VALUES (?1, ?2)",
            params![group.id.as_bytes().as_slice(), group.name],
        )?;
        if added == 0 {
            return Ok(false);
        }
        txn.conn.execute(
            "UPDATE local_state SET subscriptions_timestamp = ?1",
            params![timestamp],
        )?;
        Ok(true)
    }

    fn contains_subscription(&self, txn: &mut SqliteTxn<'_>, g: &GroupId) -> Result<bool> {
        Ok(txn
            .conn
            .query_row(
                "SELECT 1 FROM subscriptions WHERE group_id = ?1",
                params![g.as_bytes().as_slice()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn get_subscriptions(&self, txn: &mut SqliteTxn<'_>) -> Result<Vec<Group>> {
        Self::subscriptions_query(
            &txn.conn,
            "SELECT group_id, name FROM subscriptions ORDER BY group_id",
            None,
        )
    }

    fn get_subscriptions_timestamp(&self, txn: &mut SqliteTxn<'_>) -> Result<i64> {
        Ok(txn.conn.query_row(
            "SELECT subscriptions_timestamp FROM local_state",
            [],
            |row| row.get(0),
        )?)
    }

    fn remove_subscription(
        &self,
        txn: &mut SqliteTxn<'_>,
        g: &GroupId,
        timestamp: i64,
    ) -> Result<bool> {
        let removed = txn.conn.execute(
            "DELETE FROM subscriptions WHERE group_id = ?1",
            params![g.as_bytes().as_slice()],
        )?;
        if removed == 0 {
            return Ok(false);
        }
        txn.conn.execute(
            "DELETE FROM messages WHERE group_id = ?1",
            params![g.as_bytes().as_slice()],
        )?;
        txn.conn.execute(
            "UPDATE local_state SET subscriptions_timestamp = ?1",
            params![timestamp],
        )?;
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Contact subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    fn set_subscriptions(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        groups: &[Group],
        timestamp: i64,
    ) -> Result<bool> {
        let conn = &txn.conn;
        let stored: i64 = conn
            .query_row(
                "SELECT subscriptions_timestamp FROM contacts WHERE contact_id = ?1",
                params![c.0],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::InvalidData(format!("unknown {}", c)))?;
        if timestamp <= stored {
            return Ok(false);
        }

        conn.execute(
            "UPDATE contacts SET subscriptions_timestamp = ?2 WHERE contact_id = ?1",
            params![c.0, timestamp],
        )?;
        conn.execute(
            "DELETE FROM contact_subscriptions WHERE contact_id = ?1",
            params![c.0],
        )?;
        {
            let mut insert = conn.prepare(
                "INSERT OR REPLACE INTO contact_subscriptions (contact_id, group_id, name)
                 VALUES (?1, ?2, ?3)",
            )?;
            for g in groups {
                insert.execute(params![c.0, g.id.as_bytes().as_slice(), g.name])?;
            }
        }

        // Drop rows for groups no longer shared
        conn.execute(
            "DELETE FROM statuses WHERE contact_id = ?1 AND message_id IN (
                SELECT m.message_id FROM messages m WHERE m.group_id NOT IN (
                    SELECT group_id FROM contact_subscriptions WHERE contact_id = ?1))",
            params![c.0],
        )?;

        // Add rows for messages in newly shared groups
        conn.execute(
            "INSERT INTO statuses (contact_id, message_id, status, sendable)
             SELECT ?1, m.message_id, ?2,
                    CASE WHEN m.author IS NULL OR COALESCE(r.rating, 0) = ?3 THEN 1 ELSE 0 END
             FROM messages m
             JOIN contact_subscriptions cs ON cs.group_id = m.group_id AND cs.contact_id = ?1
             LEFT JOIN ratings r ON r.author = m.author
             WHERE NOT EXISTS (
                SELECT 1 FROM statuses s WHERE s.contact_id = ?1 AND s.message_id = m.message_id)",
            params![c.0, Status::New.to_u8(), Rating::Good.to_u8()],
        )?;
        Ok(true)
    }

    fn get_contact_subscriptions(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
    ) -> Result<Vec<Group>> {
        Self::subscriptions_query(
            &txn.conn,
            "SELECT group_id, name FROM contact_subscriptions
             WHERE contact_id = ?1 ORDER BY group_id",
            Some(c),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transports
    // ─────────────────────────────────────────────────────────────────────────

    fn set_local_transports(
        &self,
        txn: &mut SqliteTxn<'_>,
        transports: &TransportProperties,
        timestamp: i64,
    ) -> Result<()> {
        txn.conn.execute(
            "UPDATE local_state SET transports = ?1, transports_timestamp = ?2",
            params![encode_properties(transports)?, timestamp],
        )?;
        Ok(())
    }

    fn get_local_transports(&self, txn: &mut SqliteTxn<'_>) -> Result<(TransportProperties, i64)> {
        let (blob, timestamp): (Vec<u8>, i64) = txn.conn.query_row(
            "SELECT transports, transports_timestamp FROM local_state",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((decode_properties(&blob)?, timestamp))
    }

    fn set_transports(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        transports: &TransportProperties,
        timestamp: i64,
    ) -> Result<bool> {
        let stored: i64 = txn
            .conn
            .query_row(
                "SELECT transports_timestamp FROM contacts WHERE contact_id = ?1",
                params![c.0],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::InvalidData(format!("unknown {}", c)))?;
        if timestamp <= stored {
            return Ok(false);
        }
        txn.conn.execute(
            "UPDATE contacts SET transports = ?2, transports_timestamp = ?3 WHERE contact_id = ?1",
            params![c.0, encode_properties(transports)?, timestamp],
        )?;
        Ok(true)
    }

    fn get_contact_transports(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
    ) -> Result<TransportProperties> {
        let blob: Option<Vec<u8>> = txn
            .conn
            .query_row(
                "SELECT transports FROM contacts WHERE contact_id = ?1",
                params![c.0],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(blob) => decode_properties(&blob),
            None => Ok(TransportProperties::new()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    fn add_message(
        &self,
        txn: &mut SqliteTxn<'_>,
        m: &Message,
        sender: Option<ContactId>,
    ) -> Result<bool> {
        let added = txn.conn.execute(
            "INSERT OR IGNORE INTO messages (message_id, group_id, author, timestamp, size, raw)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                m.id.as_bytes().as_slice(),
                m.group.as_bytes().as_slice(),
                m.author.as_ref().map(|a| a.as_bytes().as_slice()),
                m.timestamp,
                m.size() as i64,
                m.raw.as_ref(),
            ],
        )?;
        if added == 0 {
            return Ok(false);
        }

        let rating = match &m.author {
            Some(a) => self.get_rating(txn, a)?,
            None => Rating::Unrated,
        };
        let sendable = hearsay_core::is_sendable(m.author, rating);
        txn.conn.execute(
            "INSERT INTO statuses (contact_id, message_id, status, sendable)
             SELECT cs.contact_id, ?2,
                    CASE WHEN cs.contact_id = ?3 THEN ?4 ELSE ?5 END, ?6
             FROM contact_subscriptions cs WHERE cs.group_id = ?1",
            params![
                m.group.as_bytes().as_slice(),
                m.id.as_bytes().as_slice(),
                sender.map(|c| c.0),
                Status::Seen.to_u8(),
                Status::New.to_u8(),
                sendable,
            ],
        )?;
        Ok(true)
    }

    fn contains_message(&self, txn: &mut SqliteTxn<'_>, id: &MessageId) -> Result<bool> {
        Ok(txn
            .conn
            .query_row(
                "SELECT 1 FROM messages WHERE message_id = ?1",
                params![id.as_bytes().as_slice()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn get_message(&self, txn: &mut SqliteTxn<'_>, id: &MessageId) -> Result<Option<Bytes>> {
        let raw: Option<Vec<u8>> = txn
            .conn
            .query_row(
                "SELECT raw FROM messages WHERE message_id = ?1",
                params![id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(Bytes::from))
    }

    fn get_message_if_sendable(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        id: &MessageId,
    ) -> Result<Option<Bytes>> {
        let raw: Option<Vec<u8>> = txn
            .conn
            .query_row(
                "SELECT m.raw FROM messages m
                 JOIN statuses s ON s.message_id = m.message_id
                 WHERE s.contact_id = ?1 AND m.message_id = ?2
                   AND s.status = ?3 AND s.sendable = 1",
                params![c.0, id.as_bytes().as_slice(), Status::New.to_u8()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(Bytes::from))
    }

    fn get_sendable_messages(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        capacity: usize,
    ) -> Result<Vec<MessageId>> {
        let mut stmt = txn.conn.prepare(
            "SELECT m.message_id, m.size FROM messages m
             JOIN statuses s ON s.message_id = m.message_id
             WHERE s.contact_id = ?1 AND s.status = ?2 AND s.sendable = 1
             ORDER BY m.timestamp, m.message_id",
        )?;
        let rows = stmt
            .query_map(params![c.0, Status::New.to_u8()], |row| {
                Ok((blob32(row, 0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let capacity = capacity as u64;
        Ok(take_while_total(rows, |total, size| total + size <= capacity))
    }

    fn get_old_messages(&self, txn: &mut SqliteTxn<'_>, size: u64) -> Result<Vec<MessageId>> {
        let mut stmt = txn.conn.prepare(
            "SELECT message_id, size FROM messages ORDER BY timestamp, message_id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((blob32(row, 0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(take_while_total(rows, |total, _| total < size))
    }

    fn get_total_message_size(&self, txn: &mut SqliteTxn<'_>) -> Result<u64> {
        let total: i64 = txn.conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM messages",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    fn remove_message(&self, txn: &mut SqliteTxn<'_>, id: &MessageId) -> Result<()> {
        txn.conn.execute(
            "DELETE FROM messages WHERE message_id = ?1",
            params![id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Message status
    // ─────────────────────────────────────────────────────────────────────────

    fn get_status(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        id: &MessageId,
    ) -> Result<Option<MessageStatus>> {
        let row: Option<(u8, bool)> = txn
            .conn
            .query_row(
                "SELECT status, sendable FROM statuses WHERE contact_id = ?1 AND message_id = ?2",
                params![c.0, id.as_bytes().as_slice()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(status, sendable)| -> Result<MessageStatus> {
            Ok(MessageStatus {
                contact: c,
                message: *id,
                status: decode_status(status)?,
                sendable,
            })
        })
        .transpose()
    }

    fn set_status_seen_if_visible(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        id: &MessageId,
    ) -> Result<bool> {
        let updated = txn.conn.execute(
            "UPDATE statuses SET status = ?3 WHERE contact_id = ?1 AND message_id = ?2",
            params![c.0, id.as_bytes().as_slice(), Status::Seen.to_u8()],
        )?;
        Ok(updated > 0)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ratings
    // ─────────────────────────────────────────────────────────────────────────

    fn get_rating(&self, txn: &mut SqliteTxn<'_>, author: &AuthorId) -> Result<Rating> {
        let value: Option<u8> = txn
            .conn
            .query_row(
                "SELECT rating FROM ratings WHERE author = ?1",
                params![author.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        value.map(decode_rating).unwrap_or(Ok(Rating::Unrated))
    }

    fn set_rating(
        &self,
        txn: &mut SqliteTxn<'_>,
        author: &AuthorId,
        rating: Rating,
    ) -> Result<Rating> {
        let old = self.get_rating(txn, author)?;
        txn.conn.execute(
            "INSERT OR REPLACE INTO ratings (author, rating) VALUES (?1, ?2)",
            params![author.as_bytes().as_slice(), rating.to_u8()],
        )?;
        Ok(old)
    }

    fn set_sendability(
        &self,
        txn: &mut SqliteTxn<'_>,
        author: &AuthorId,
        sendable: bool,
    ) -> Result<usize> {
        Ok(txn.conn.execute(
            "UPDATE statuses SET sendable = ?2
             WHERE sendable != ?2
               AND message_id IN (SELECT message_id FROM messages WHERE author = ?1)",
            params![author.as_bytes().as_slice(), sendable],
        )?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Batches
    // ─────────────────────────────────────────────────────────────────────────

    fn add_outstanding_batch(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        id: &BatchId,
        messages: &[MessageId],
        sent_at: i64,
    ) -> Result<()> {
        let conn = &txn.conn;
        let batch = id.as_bytes().as_slice();
        conn.execute(
            "DELETE FROM outstanding_batches WHERE contact_id = ?1 AND batch_id = ?2",
            params![c.0, batch],
        )?;
        conn.execute(
            "INSERT INTO outstanding_batches (contact_id, batch_id, sent_at) VALUES (?1, ?2, ?3)",
            params![c.0, batch, sent_at],
        )?;
        let mut insert = conn.prepare(
            "INSERT INTO outstanding_messages (contact_id, batch_id, position, message_id)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut mark = conn.prepare(
            "UPDATE statuses SET status = ?3
             WHERE contact_id = ?1 AND message_id = ?2 AND status = ?4",
        )?;
        for (position, m) in messages.iter().enumerate() {
            let m = m.as_bytes().as_slice();
            insert.execute(params![c.0, batch, position as i64, m])?;
            mark.execute(params![c.0, m, Status::Sent.to_u8(), Status::New.to_u8()])?;
        }
        Ok(())
    }

    fn get_outstanding_batches(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
    ) -> Result<Vec<OutstandingBatch>> {
        let heads = {
            let mut stmt = txn.conn.prepare(
                "SELECT batch_id, sent_at FROM outstanding_batches
                 WHERE contact_id = ?1 ORDER BY sent_at, batch_id",
            )?;
            let rows = stmt
                .query_map(params![c.0], |row| {
                    Ok((BatchId::from_bytes(blob32(row, 0)?), row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        heads
            .into_iter()
            .map(|(id, sent_at)| {
                Ok(OutstandingBatch {
                    contact: c,
                    id,
                    messages: Self::batch_messages(&txn.conn, c, &id)?,
                    sent_at,
                })
            })
            .collect()
    }

    fn get_lost_batches(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        cutoff: i64,
    ) -> Result<Vec<BatchId>> {
        let mut stmt = txn.conn.prepare(
            "SELECT batch_id FROM outstanding_batches
             WHERE contact_id = ?1 AND sent_at <= ?2 ORDER BY sent_at, batch_id",
        )?;
        let ids = stmt
            .query_map(params![c.0, cutoff], |row| {
                Ok(BatchId::from_bytes(blob32(row, 0)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn remove_acked_batch(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        id: &BatchId,
    ) -> Result<Vec<MessageId>> {
        let conn = &txn.conn;
        let messages = Self::batch_messages(conn, c, id)?;
        let removed = conn.execute(
            "DELETE FROM outstanding_batches WHERE contact_id = ?1 AND batch_id = ?2",
            params![c.0, id.as_bytes().as_slice()],
        )?;
        if removed == 0 {
            return Ok(Vec::new());
        }
        let mut mark = conn.prepare(
            "UPDATE statuses SET status = ?3 WHERE contact_id = ?1 AND message_id = ?2",
        )?;
        let mut seen = Vec::new();
        for m in messages {
            if mark.execute(params![c.0, m.as_bytes().as_slice(), Status::Seen.to_u8()])? > 0 {
                seen.push(m);
            }
        }
        Ok(seen)
    }

    fn remove_lost_batch(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        id: &BatchId,
        cutoff: i64,
    ) -> Result<Option<Vec<MessageId>>> {
        let conn = &txn.conn;
        let sent_at: Option<i64> = conn
            .query_row(
                "SELECT sent_at FROM outstanding_batches WHERE contact_id = ?1 AND batch_id = ?2",
                params![c.0, id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        match sent_at {
            Some(t) if t <= cutoff => {}
            _ => return Ok(None),
        }

        let messages = Self::batch_messages(conn, c, id)?;
        conn.execute(
            "DELETE FROM outstanding_batches WHERE contact_id = ?1 AND batch_id = ?2",
            params![c.0, id.as_bytes().as_slice()],
        )?;
        let mut mark = conn.prepare(
            "UPDATE statuses SET status = ?3
             WHERE contact_id = ?1 AND message_id = ?2 AND status = ?4",
        )?;
        let mut retry = Vec::new();
        for m in messages {
            let changed = mark.execute(params![
                c.0,
                m.as_bytes().as_slice(),
                Status::New.to_u8(),
                Status::Sent.to_u8()
            ])?;
            if changed > 0 {
                retry.push(m);
            }
        }
        Ok(Some(retry))
    }

    fn add_batch_to_ack(&self, txn: &mut SqliteTxn<'_>, c: ContactId, id: &BatchId) -> Result<()> {
        txn.conn.execute(
            "INSERT OR IGNORE INTO batches_to_ack (contact_id, batch_id) VALUES (?1, ?2)",
            params![c.0, id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    fn get_batches_to_ack(&self, txn: &mut SqliteTxn<'_>, c: ContactId) -> Result<Vec<BatchId>> {
        let mut stmt = txn.conn.prepare(
            "SELECT batch_id FROM batches_to_ack WHERE contact_id = ?1 ORDER BY batch_id",
        )?;
        let ids = stmt
            .query_map(params![c.0], |row| Ok(BatchId::from_bytes(blob32(row, 0)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn remove_batches_to_ack(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        ids: &[BatchId],
    ) -> Result<()> {
        let mut stmt = txn
            .conn
            .prepare("DELETE FROM batches_to_ack WHERE contact_id = ?1 AND batch_id = ?2")?;
        for id in ids {
            stmt.execute(params![c.0, id.as_bytes().as_slice()])?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport secrets
    // ─────────────────────────────────────────────────────────────────────────

    fn add_secrets(&self, txn: &mut SqliteTxn<'_>, secrets: &[TemporarySecret]) -> Result<()> {
        let mut stmt = txn.conn.prepare(
            "INSERT OR REPLACE INTO secrets (
                contact_id, transport_id, period, epoch, clock_diff, latency,
                alice, secret, outgoing, centre, bitmap
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for s in secrets {
            stmt.execute(params![
                s.contact.0,
                s.transport.0,
                s.period as i64,
                s.epoch,
                s.clock_diff,
                s.latency,
                s.alice,
                s.secret,
                s.outgoing as i64,
                s.window.centre() as i64,
                s.window.bitmap().as_slice(),
            ])?;
        }
        Ok(())
    }

    fn get_secrets(&self, txn: &mut SqliteTxn<'_>) -> Result<Vec<TemporarySecret>> {
        let mut stmt = txn.conn.prepare(
            "SELECT contact_id, transport_id, period, epoch, clock_diff, latency,
                    alice, secret, outgoing, centre, bitmap
             FROM secrets ORDER BY contact_id, transport_id, period",
        )?;
        let secrets = stmt
            .query_map([], row_to_secret)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(secrets)
    }

    fn get_secret(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<Option<TemporarySecret>> {
        Ok(txn
            .conn
            .query_row(
                "SELECT contact_id, transport_id, period, epoch, clock_diff, latency,
                        alice, secret, outgoing, centre, bitmap
                 FROM secrets WHERE contact_id = ?1 AND transport_id = ?2 AND period = ?3",
                params![c.0, t.0, period as i64],
                row_to_secret,
            )
            .optional()?)
    }

    fn increment_connection_counter(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<Option<u64>> {
        let updated = txn.conn.execute(
            "UPDATE secrets SET outgoing = outgoing + 1
             WHERE contact_id = ?1 AND transport_id = ?2 AND period = ?3",
            params![c.0, t.0, period as i64],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let outgoing: i64 = txn.conn.query_row(
            "SELECT outgoing FROM secrets WHERE contact_id = ?1 AND transport_id = ?2 AND period = ?3",
            params![c.0, t.0, period as i64],
            |row| row.get(0),
        )?;
        Ok(Some(outgoing as u64))
    }

    fn set_connection_window(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
        window: &ConnectionWindow,
    ) -> Result<bool> {
        let updated = txn.conn.execute(
            "UPDATE secrets SET centre = ?4, bitmap = ?5
             WHERE contact_id = ?1 AND transport_id = ?2 AND period = ?3",
            params![
                c.0,
                t.0,
                period as i64,
                window.centre() as i64,
                window.bitmap().as_slice()
            ],
        )?;
        Ok(updated > 0)
    }

    fn remove_secrets_before(
        &self,
        txn: &mut SqliteTxn<'_>,
        c: ContactId,
        t: TransportId,
        period: u64,
    ) -> Result<usize> {
        Ok(txn.conn.execute(
            "DELETE FROM secrets WHERE contact_id = ?1 AND transport_id = ?2 AND period < ?3",
            params![c.0, t.0, period as i64],
        )?)
    }
}
