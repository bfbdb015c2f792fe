//! SQLite schema and its upgrades.
//!
//! Each entry in [`STEPS`] moves the schema up by one version. Applied
//! versions are recorded in `schema_migrations`, so opening an existing file
//! only runs the steps it has not seen.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> Result<()>;

/// Upgrade steps, in version order. Version `n` is `STEPS[n - 1]`.
const STEPS: &[Step] = &[create_tables];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = STEPS.len() as u32;

/// Bring the schema of `conn` up to [`CURRENT_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );",
    )?;
    let found: u32 = conn.query_row(
        "SELECT IFNULL(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "schema version {found} is newer than supported version {CURRENT_VERSION}"
        )));
    }
    if found == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, step) in STEPS.iter().enumerate().skip(found as usize) {
        step(&tx)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version as u32 + 1, applied_at()],
        )?;
    }
    tx.commit()?;
    debug!(from = found, to = CURRENT_VERSION, "schema upgraded");
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Single row of local state
        CREATE TABLE local_state (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            subscriptions_timestamp INTEGER NOT NULL DEFAULT 0,
            transports BLOB NOT NULL,          -- CBOR map of property -> value
            transports_timestamp INTEGER NOT NULL DEFAULT 0
        );
        INSERT INTO local_state (id, transports) VALUES (0, X'A0');

        CREATE TABLE contacts (
            contact_id INTEGER PRIMARY KEY AUTOINCREMENT,
            transports BLOB NOT NULL,          -- CBOR map of property -> value
            transports_timestamp INTEGER NOT NULL DEFAULT 0,
            subscriptions_timestamp INTEGER NOT NULL DEFAULT 0
        );

        -- Groups we are subscribed to
        CREATE TABLE subscriptions (
            group_id BLOB PRIMARY KEY,         -- 32 bytes
            name TEXT NOT NULL
        );

        -- Groups each contact is subscribed to, as last advertised
        CREATE TABLE contact_subscriptions (
            contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
            group_id BLOB NOT NULL,
            name TEXT NOT NULL,
            PRIMARY KEY (contact_id, group_id)
        );

        CREATE TABLE messages (
            message_id BLOB PRIMARY KEY,       -- 32 bytes, hash of raw
            group_id BLOB NOT NULL,
            author BLOB,                       -- NULL for anonymous messages
            timestamp INTEGER NOT NULL,
            size INTEGER NOT NULL,
            raw BLOB NOT NULL
        );

        -- Per-contact delivery state; a row exists iff the message is visible
        CREATE TABLE statuses (
            contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
            message_id BLOB NOT NULL REFERENCES messages(message_id) ON DELETE CASCADE,
            status INTEGER NOT NULL,           -- 0=new, 1=sent, 2=seen
            sendable INTEGER NOT NULL,         -- 0 or 1
            PRIMARY KEY (contact_id, message_id)
        );

        CREATE TABLE ratings (
            author BLOB PRIMARY KEY,
            rating INTEGER NOT NULL            -- 0=unrated, 1=good, 2=bad
        );

        CREATE TABLE outstanding_batches (
            contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
            batch_id BLOB NOT NULL,
            sent_at INTEGER NOT NULL,
            PRIMARY KEY (contact_id, batch_id)
        );

        -- Messages of an outstanding batch. Not tied to the messages table:
        -- a batch may outlive the messages it carried.
        CREATE TABLE outstanding_messages (
            contact_id INTEGER NOT NULL,
            batch_id BLOB NOT NULL,
            position INTEGER NOT NULL,
            message_id BLOB NOT NULL,
            PRIMARY KEY (contact_id, batch_id, position),
            FOREIGN KEY (contact_id, batch_id)
                REFERENCES outstanding_batches(contact_id, batch_id) ON DELETE CASCADE
        );

        CREATE TABLE batches_to_ack (
            contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
            batch_id BLOB NOT NULL,
            PRIMARY KEY (contact_id, batch_id)
        );

        CREATE TABLE secrets (
            contact_id INTEGER NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
            transport_id INTEGER NOT NULL,
            period INTEGER NOT NULL,
            epoch INTEGER NOT NULL,
            clock_diff INTEGER NOT NULL,
            latency INTEGER NOT NULL,
            alice INTEGER NOT NULL,
            secret BLOB NOT NULL,
            outgoing INTEGER NOT NULL,
            centre INTEGER NOT NULL,
            bitmap BLOB NOT NULL,
            PRIMARY KEY (contact_id, transport_id, period)
        );

        CREATE INDEX idx_messages_timestamp ON messages(timestamp, message_id);
        CREATE INDEX idx_messages_group ON messages(group_id);
        CREATE INDEX idx_messages_author ON messages(author);
        CREATE INDEX idx_statuses_message ON statuses(message_id);
        CREATE INDEX idx_outstanding_sent ON outstanding_batches(contact_id, sent_at);
        "#,
    )?;

    Ok(())
}

fn applied_at() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .unwrap();
        let names = stmt.query_map([], |row| row.get(0)).unwrap();
        names.map(|n| n.unwrap()).collect()
    }

    #[test]
    fn test_fresh_database_gets_every_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let names = table_names(&conn);
        for table in [
            "local_state",
            "contacts",
            "subscriptions",
            "contact_subscriptions",
            "messages",
            "statuses",
            "ratings",
            "outstanding_batches",
            "outstanding_messages",
            "batches_to_ack",
            "secrets",
        ] {
            assert!(names.iter().any(|n| n == table), "no table {table}");
        }
    }

    #[test]
    fn test_second_open_changes_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let (versions, local_rows): (i64, i64) = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM schema_migrations),
                        (SELECT COUNT(*) FROM local_state)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(versions, i64::from(CURRENT_VERSION));
        assert_eq!(local_rows, 1);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, 0)",
            params![CURRENT_VERSION + 1],
        )
        .unwrap();

        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
