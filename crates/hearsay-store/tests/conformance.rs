//! Behaviour shared by every Database backend.
//!
//! Each scenario is written once against the trait and run on both the
//! in-memory and the SQLite implementation.

use hearsay_core::{
    AuthorId, BatchId, ContactId, Group, Message, Rating, Status, TemporarySecret, TransportId,
    TransportProperties,
};
use hearsay_store::{Database, MemoryDatabase, SqliteDatabase};
use proptest::prelude::*;

/// Run a scenario against every backend.
macro_rules! on_each_backend {
    ($($test:ident => $scenario:ident),* $(,)?) => {
        $(
            #[test]
            fn $test() {
                $scenario(&MemoryDatabase::new());
                $scenario(&SqliteDatabase::open_memory().unwrap());
            }
        )*
    };
}

on_each_backend! {
    test_visibility => visibility,
    test_batches => batches,
    test_ratings => ratings,
    test_old_messages => old_messages,
    test_secrets => secrets,
}

fn setup<D: Database>(db: &D, txn: &mut D::Txn<'_>, group: &Group) -> ContactId {
    let c = db.add_contact(txn, &TransportProperties::new()).unwrap();
    db.add_subscription(txn, group, 1).unwrap();
    db.set_subscriptions(txn, c, &[group.clone()], 1).unwrap();
    c
}

fn visibility<D: Database>(db: &D) {
    let group = Group::new("g", b"");
    let hidden = Group::new("hidden", b"");
    let mut txn = db.start_transaction().unwrap();
    let c = setup(db, &mut txn, &group);
    let other = db.add_contact(&mut txn, &TransportProperties::new()).unwrap();

    let shared = Message::new(group.id, None, 1, b"shared".to_vec());
    let private = Message::new(hidden.id, None, 2, b"private".to_vec());
    assert!(db.add_message(&mut txn, &shared, Some(other)).unwrap());
    assert!(!db.add_message(&mut txn, &shared, None).unwrap());
    assert!(db.add_message(&mut txn, &private, None).unwrap());

    assert!(db.get_status(&mut txn, other, &shared.id).unwrap().is_none());
    assert_eq!(
        db.get_status(&mut txn, c, &shared.id).unwrap().map(|s| s.status),
        Some(Status::New)
    );
    assert!(db.get_status(&mut txn, c, &private.id).unwrap().is_none());
    assert!(db.set_status_seen_if_visible(&mut txn, c, &shared.id).unwrap());
    assert!(!db.set_status_seen_if_visible(&mut txn, c, &private.id).unwrap());
    assert!(db.get_message_if_sendable(&mut txn, c, &shared.id).unwrap().is_none());
    db.commit_transaction(txn).unwrap();
}

fn batches<D: Database>(db: &D) {
    let group = Group::new("g", b"");
    let mut txn = db.start_transaction().unwrap();
    let c = setup(db, &mut txn, &group);
    let m1 = Message::new(group.id, None, 1, b"one".to_vec());
    let m2 = Message::new(group.id, None, 2, b"two".to_vec());
    db.add_message(&mut txn, &m1, None).unwrap();
    db.add_message(&mut txn, &m2, None).unwrap();

    let b1 = BatchId::from_bytes([1; 32]);
    let b2 = BatchId::from_bytes([2; 32]);
    db.add_outstanding_batch(&mut txn, c, &b1, &[m1.id], 100).unwrap();
    db.add_outstanding_batch(&mut txn, c, &b2, &[m2.id], 200).unwrap();

    let outstanding = db.get_outstanding_batches(&mut txn, c).unwrap();
    assert_eq!(outstanding.len(), 2);
    assert_eq!(outstanding[0].messages, vec![m1.id]);
    assert_eq!(db.get_lost_batches(&mut txn, c, 150).unwrap(), vec![b1]);

    assert_eq!(db.remove_acked_batch(&mut txn, c, &b2).unwrap(), vec![m2.id]);
    assert!(db.remove_acked_batch(&mut txn, c, &b2).unwrap().is_empty());
    assert_eq!(
        db.get_status(&mut txn, c, &m2.id).unwrap().map(|s| s.status),
        Some(Status::Seen)
    );

    db.add_batch_to_ack(&mut txn, c, &b2).unwrap();
    db.add_batch_to_ack(&mut txn, c, &b1).unwrap();
    db.add_batch_to_ack(&mut txn, c, &b1).unwrap();
    assert_eq!(db.get_batches_to_ack(&mut txn, c).unwrap(), vec![b1, b2]);
    db.remove_batches_to_ack(&mut txn, c, &[b1]).unwrap();
    assert_eq!(db.get_batches_to_ack(&mut txn, c).unwrap(), vec![b2]);
    db.commit_transaction(txn).unwrap();
}

fn ratings<D: Database>(db: &D) {
    let group = Group::new("g", b"");
    let author = AuthorId::from_bytes([5; 32]);
    let mut txn = db.start_transaction().unwrap();
    let c = setup(db, &mut txn, &group);
    let m = Message::new(group.id, Some(author), 1, b"signed".to_vec());
    db.add_message(&mut txn, &m, None).unwrap();

    assert!(!db.get_status(&mut txn, c, &m.id).unwrap().unwrap().sendable);
    assert_eq!(db.set_rating(&mut txn, &author, Rating::Good).unwrap(), Rating::Unrated);
    assert_eq!(db.set_sendability(&mut txn, &author, true).unwrap(), 1);
    assert_eq!(db.set_sendability(&mut txn, &author, true).unwrap(), 0);
    assert_eq!(db.get_sendable_messages(&mut txn, c, 1024).unwrap(), vec![m.id]);
    assert_eq!(db.get_rating(&mut txn, &author).unwrap(), Rating::Good);
    db.commit_transaction(txn).unwrap();
}

fn old_messages<D: Database>(db: &D) {
    let group = Group::new("g", b"");
    let mut txn = db.start_transaction().unwrap();
    db.add_subscription(&mut txn, &group, 1).unwrap();
    let ms: Vec<Message> = (0..4)
        .map(|i| Message::new(group.id, None, 10 - i, vec![i as u8; 10]))
        .collect();
    for m in &ms {
        db.add_message(&mut txn, m, None).unwrap();
    }
    assert_eq!(db.get_total_message_size(&mut txn).unwrap(), 40);
    // Oldest first: timestamps 7, 8, ...
    assert_eq!(db.get_old_messages(&mut txn, 15).unwrap(), vec![ms[3].id, ms[2].id]);
    assert_eq!(db.get_old_messages(&mut txn, 1_000).unwrap().len(), 4);
    assert!(db.get_old_messages(&mut txn, 0).unwrap().is_empty());
    db.commit_transaction(txn).unwrap();
}

fn secrets<D: Database>(db: &D) {
    let mut txn = db.start_transaction().unwrap();
    let c = db.add_contact(&mut txn, &TransportProperties::new()).unwrap();
    let t = TransportId(1);
    let base = TemporarySecret::new(c, t, 0, 100, 100, true, 0, vec![1; 32]);
    let secrets: Vec<TemporarySecret> =
        (0..4).map(|p| base.rotate(p, vec![p as u8; 32])).collect();
    db.add_secrets(&mut txn, &secrets).unwrap();
    assert_eq!(db.remove_secrets_before(&mut txn, c, t, 2).unwrap(), 2);
    let periods: Vec<u64> = db
        .get_secrets(&mut txn)
        .unwrap()
        .into_iter()
        .map(|s| s.period)
        .collect();
    assert_eq!(periods, vec![2, 3]);

    db.remove_contact(&mut txn, c).unwrap();
    assert!(db.get_secrets(&mut txn).unwrap().is_empty());
    db.commit_transaction(txn).unwrap();
}

proptest! {
    #[test]
    fn sendable_messages_fit_capacity(
        sizes in proptest::collection::vec(1usize..64, 1..12),
        capacity in 0usize..256,
    ) {
        let db = MemoryDatabase::new();
        let group = Group::new("g", b"");
        let mut txn = db.start_transaction().unwrap();
        let c = setup(&db, &mut txn, &group);
        for (i, size) in sizes.iter().enumerate() {
            let mut raw = vec![0u8; *size];
            raw[0] = i as u8;
            db.add_message(&mut txn, &Message::new(group.id, None, i as i64, raw), None).unwrap();
        }
        let ids = db.get_sendable_messages(&mut txn, c, capacity).unwrap();

        // A prefix of the oldest-first order, within capacity, stopping at
        // the first message that doesn't fit
        let mut total = 0;
        let mut expected = 0;
        for size in &sizes {
            if total + size > capacity {
                break;
            }
            total += size;
            expected += 1;
        }
        prop_assert_eq!(ids.len(), expected);
    }
}
