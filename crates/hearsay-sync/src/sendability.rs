//! Sendability propagation.
//!
//! A message is sendable when it is anonymous or its author is rated
//! [`Rating::Good`]. Status rows cache that flag, so a rating change that
//! crosses the Good boundary rewrites the flag on every row of the author's
//! messages, in the same transaction as the rating itself.

use tracing::debug;

use hearsay_core::{AuthorId, Rating};
use hearsay_store::Database;

use crate::engine::SyncEngine;
use crate::error::Result;
use crate::events::Event;
use crate::locks::LockSet;

impl<D: Database> SyncEngine<D> {
    pub fn get_rating(&self, author: &AuthorId) -> Result<Rating> {
        let _locks = self.locks.acquire(LockSet::RATING);
        self.with_txn(|txn| Ok(self.db.get_rating(txn, author)?))
    }

    /// Rate an author. Returns the previous rating.
    pub fn set_rating(&self, author: &AuthorId, rating: Rating) -> Result<Rating> {
        let locks = self
            .locks
            .acquire(LockSet::MESSAGE | LockSet::MESSAGE_STATUS | LockSet::RATING);
        let (old, changed) = self.with_txn(|txn| {
            let old = self.db.set_rating(txn, author, rating)?;
            let changed = if old.is_good() != rating.is_good() {
                self.db.set_sendability(txn, author, rating.is_good())?
            } else {
                0
            };
            Ok((old, changed))
        })?;
        drop(locks);
        if old != rating {
            debug!(author = %author, ?old, new = ?rating, rows = changed, "rating changed");
            self.emit(Event::RatingChanged {
                author: *author,
                rating,
            });
        }
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use hearsay_core::{ContactId, Group, Message, TransportProperties};
    use hearsay_store::MemoryDatabase;

    use super::*;
    use crate::config::SyncConfig;
    use crate::writers::CborBatchWriter;

    fn engine_with_contact() -> (SyncEngine<MemoryDatabase>, ContactId, Group) {
        let engine = SyncEngine::new(MemoryDatabase::new(), SyncConfig::default());
        let group = Group::new("rated", b"");
        engine.subscribe(&group).unwrap();
        let c = engine.add_contact(&TransportProperties::new()).unwrap();
        let mut txn = engine.db.start_transaction().unwrap();
        engine
            .db
            .set_subscriptions(&mut txn, c, &[group.clone()], 1)
            .unwrap();
        engine.db.commit_transaction(txn).unwrap();
        (engine, c, group)
    }

    fn sendable(engine: &SyncEngine<MemoryDatabase>, c: ContactId, m: &Message) -> bool {
        let mut txn = engine.db.start_transaction().unwrap();
        engine
            .db
            .get_status(&mut txn, c, &m.id)
            .unwrap()
            .unwrap()
            .sendable
    }

    #[tokio::test]
    async fn test_good_rating_makes_authored_messages_sendable() {
        let (engine, c, group) = engine_with_contact();
        let author = AuthorId::from_bytes([1; 32]);
        let m = Message::new(group.id, Some(author), 10, b"signed".to_vec());
        engine.add_local_message(&m).await.unwrap();
        assert!(!sendable(&engine, c, &m));

        let mut writer = CborBatchWriter::new(Vec::new(), 1024);
        assert!(engine.generate_batch(c, &mut writer).unwrap().is_none());

        assert_eq!(engine.set_rating(&author, Rating::Good).unwrap(), Rating::Unrated);
        assert!(sendable(&engine, c, &m));

        let mut writer = CborBatchWriter::new(Vec::new(), 1024);
        let sent = engine.generate_batch(c, &mut writer).unwrap().unwrap();
        assert_eq!(sent.messages, vec![m.id]);
    }

    #[tokio::test]
    async fn test_rating_flip_restores_flags() {
        let (engine, c, group) = engine_with_contact();
        let author = AuthorId::from_bytes([2; 32]);
        let m = Message::new(group.id, Some(author), 10, b"flip".to_vec());
        engine.add_local_message(&m).await.unwrap();

        engine.set_rating(&author, Rating::Good).unwrap();
        engine.set_rating(&author, Rating::Bad).unwrap();
        assert!(!sendable(&engine, c, &m));
        engine.set_rating(&author, Rating::Good).unwrap();
        assert!(sendable(&engine, c, &m));
        // Bad to Unrated does not cross the Good boundary
        engine.set_rating(&author, Rating::Bad).unwrap();
        engine.set_rating(&author, Rating::Unrated).unwrap();
        assert!(!sendable(&engine, c, &m));
        assert_eq!(engine.get_rating(&author).unwrap(), Rating::Unrated);
    }

    #[tokio::test]
    async fn test_anonymous_messages_ignore_ratings() {
        let (engine, c, group) = engine_with_contact();
        let m = Message::new(group.id, None, 10, b"anon".to_vec());
        engine.add_local_message(&m).await.unwrap();
        assert!(sendable(&engine, c, &m));
        engine
            .set_rating(&AuthorId::from_bytes([3; 32]), Rating::Bad)
            .unwrap();
        assert!(sendable(&engine, c, &m));
    }
}
