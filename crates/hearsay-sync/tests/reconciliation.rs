//! End-to-end reconciliation between two peers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use hearsay_core::{AuthorId, BatchId, ContactId, MessageId, Rating, Status};
use hearsay_store::Database;
use hearsay_sync::{
    Ack, BatchWriter, CborAckWriter, CborBatchWriter, CborOfferWriter, CborPacketWriter, Event,
    Offer, Packet, ReceivedBatch, SyncError,
};
use hearsay_testkit::generators::{bodies, ratings, sync_steps, SyncStep};
use hearsay_testkit::{deliver_ack, deliver_batch, FailingSink, TestMessageParser, TestPeer};

fn pair() -> (TestPeer, ContactId, TestPeer, ContactId) {
    let alice = TestPeer::new();
    let bob = TestPeer::new();
    let bob_at_alice = alice.add_contact();
    let alice_at_bob = bob.add_contact();
    (alice, bob_at_alice, bob, alice_at_bob)
}

fn write_batch(
    peer: &TestPeer,
    c: ContactId,
    max_messages: usize,
) -> Option<(Vec<MessageId>, ReceivedBatch)> {
    let mut writer = CborBatchWriter::new(Vec::new(), 64 * 1024).with_max_messages(max_messages);
    let sent = peer.engine.generate_batch(c, &mut writer).unwrap()?;
    let Packet::Batch(batch) = Packet::decode(&writer.into_inner()).unwrap() else {
        panic!("expected a batch packet");
    };
    let received = ReceivedBatch::parse(&batch, &TestMessageParser).unwrap();
    assert_eq!(received.id, sent.id);
    Some((sent.messages, received))
}

#[tokio::test]
async fn five_messages_in_batches_of_three() {
    let (alice, bob_at_alice, _, _) = pair();
    let mut ms = Vec::new();
    for body in [b"m1", b"m2", b"m3", b"m4", b"m5"] {
        ms.push(alice.post(body).await);
    }

    let (first, b1) = write_batch(&alice, bob_at_alice, 3).unwrap();
    assert_eq!(first, vec![ms[0].id, ms[1].id, ms[2].id]);

    alice
        .engine
        .receive_ack(bob_at_alice, &Ack { batches: vec![b1.id] })
        .unwrap();
    for m in &ms[..3] {
        assert_eq!(alice.status(bob_at_alice, &m.id).unwrap().status, Status::Seen);
    }

    let (second, _) = write_batch(&alice, bob_at_alice, 3).unwrap();
    assert_eq!(second, vec![ms[3].id, ms[4].id]);
    assert!(write_batch(&alice, bob_at_alice, 3).is_none());
}

#[tokio::test]
async fn offer_with_known_middle_message() {
    let (alice, bob_at_alice, bob, alice_at_bob) = pair();
    let m1 = alice.post(b"m1").await;
    let m2 = alice.post(b"m2").await;
    let m3 = alice.post(b"m3").await;
    bob.engine.add_local_message(&m2).await.unwrap();

    let mut writer = CborOfferWriter::new(Vec::new());
    let offered = alice.engine.generate_offer(bob_at_alice, &mut writer).unwrap();
    assert_eq!(offered, vec![m1.id, m2.id, m3.id]);
    let Packet::Offer(offer) = Packet::decode(&writer.into_inner()).unwrap() else {
        panic!("expected an offer packet");
    };

    let mut sink = CborPacketWriter::new(Vec::new());
    let request = bob.engine.receive_offer(alice_at_bob, &offer, &mut sink).unwrap();
    assert_eq!(request.to_string(), "101");
    assert_eq!(bob.status(alice_at_bob, &m2.id).unwrap().status, Status::Seen);
}

#[tokio::test]
async fn offer_request_sends_what_a_batch_would() {
    let (alice, bob_at_alice, bob, alice_at_bob) = pair();
    let (direct, direct_contact, _, _) = pair();
    for i in 0..4u8 {
        let m = alice.post(&[i; 8]).await;
        direct.engine.add_local_message(&m).await.unwrap();
    }

    let mut writer = CborOfferWriter::new(Vec::new());
    alice.engine.generate_offer(bob_at_alice, &mut writer).unwrap();
    let Packet::Offer(offer) = Packet::decode(&writer.into_inner()).unwrap() else {
        panic!("expected an offer packet");
    };
    let mut sink = CborPacketWriter::new(Vec::new());
    let request = bob.engine.receive_offer(alice_at_bob, &offer, &mut sink).unwrap();

    let mut writer = CborBatchWriter::new(Vec::new(), 64 * 1024);
    let via_request = alice
        .engine
        .receive_request(bob_at_alice, &offer, &request, &mut writer)
        .unwrap();

    let (via_batch, _) = write_batch(&direct, direct_contact, usize::MAX).unwrap();
    assert_eq!(via_request, via_batch);
    assert_eq!(
        alice.events.count(|e| matches!(e, Event::MessagesRequested { count: 4, .. })),
        1
    );
}

#[tokio::test]
async fn failed_write_leaves_no_trace() {
    let (alice, bob_at_alice, _, _) = pair();
    let m = alice.post(b"doomed").await;

    let mut writer = CborBatchWriter::new(FailingSink, 64 * 1024);
    let err = alice
        .engine
        .generate_batch(bob_at_alice, &mut writer)
        .unwrap_err();
    assert!(matches!(err, SyncError::Serialization(_)));
    assert!(alice.outstanding(bob_at_alice).is_empty());
    assert_eq!(alice.status(bob_at_alice, &m.id).unwrap().status, Status::New);
    assert_eq!(alice.events.count(|e| matches!(e, Event::BatchSent { .. })), 0);
}

#[tokio::test]
async fn removed_contact_is_gone_everywhere() {
    let (alice, bob_at_alice, _, _) = pair();
    alice.post(b"x").await;
    write_batch(&alice, bob_at_alice, 1).unwrap();

    alice.engine.remove_contact(bob_at_alice).unwrap();
    assert!(alice.outstanding(bob_at_alice).is_empty());
    assert!(matches!(
        alice.engine.find_lost_batches(bob_at_alice),
        Err(SyncError::NoSuchContact(_))
    ));
    assert!(matches!(
        alice.engine.get_contact_transports(bob_at_alice),
        Err(SyncError::NoSuchContact(_))
    ));
}

#[tokio::test]
async fn paused_gate_holds_incoming_batch() {
    let (alice, bob_at_alice, bob, alice_at_bob) = pair();
    let m = alice.post(b"held").await;
    let (_, batch) = write_batch(&alice, bob_at_alice, 1).unwrap();

    bob.engine.gate().disallow_writes();
    let receiver = {
        let engine = Arc::clone(&bob.engine);
        tokio::spawn(async move { engine.receive_batch(alice_at_bob, &batch).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!receiver.is_finished());
    assert!(!bob.has_message(&m.id));

    bob.engine.gate().allow_writes();
    assert_eq!(receiver.await.unwrap().unwrap(), 1);
    assert!(bob.has_message(&m.id));
}

#[tokio::test]
async fn duplicate_delivery_is_acked_but_not_stored_twice() {
    let (alice, bob_at_alice, bob, alice_at_bob) = pair();
    alice.post(b"once").await;
    let (_, batch) = write_batch(&alice, bob_at_alice, 1).unwrap();

    assert_eq!(bob.engine.receive_batch(alice_at_bob, &batch).await.unwrap(), 1);
    assert_eq!(bob.engine.receive_batch(alice_at_bob, &batch).await.unwrap(), 0);
    assert_eq!(deliver_ack(&bob, alice_at_bob, &alice, bob_at_alice).unwrap(), 1);
    assert_eq!(
        alice.events.count(|e| matches!(e, Event::BatchAcked { .. })),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_and_ackers_make_progress() {
    let (alice, bob_at_alice, bob, alice_at_bob) = pair();
    let alice = Arc::new(alice);
    let bob = Arc::new(bob);
    for i in 0..40u8 {
        alice.post(&[i; 4]).await;
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let alice = Arc::clone(&alice);
        let bob = Arc::clone(&bob);
        tasks.push(tokio::spawn(async move {
            for _ in 0..20 {
                deliver_batch(&alice, bob_at_alice, &bob, alice_at_bob)
                    .await
                    .unwrap();
                deliver_ack(&bob, alice_at_bob, &alice, bob_at_alice).unwrap();
                alice.engine.set_rating(&AuthorId::from_bytes([1; 32]), Rating::Good).unwrap();
                alice.engine.find_lost_batches(bob_at_alice).unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    deliver_ack(&bob, alice_at_bob, &alice, bob_at_alice).unwrap();
    assert!(alice.outstanding(bob_at_alice).is_empty());
    let db = alice.engine.database();
    let mut txn = db.start_transaction().unwrap();
    let left = db
        .get_sendable_messages(&mut txn, bob_at_alice, usize::MAX)
        .unwrap();
    assert!(left.is_empty());
}

/// Drive a sender and a lossy receiver through `steps`, checking after each
/// step that the sender's view of the receiver matches what was acked.
fn run_session(bodies: Vec<Vec<u8>>, steps: Vec<SyncStep>) -> Result<(), TestCaseError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async move {
        let (alice, bob_at_alice, bob, alice_at_bob) = pair();
        let mut ids = Vec::new();
        for body in &bodies {
            ids.push(alice.post(body).await.id);
        }

        let mut in_flight: Vec<ReceivedBatch> = Vec::new();
        let mut acked: HashSet<MessageId> = HashSet::new();

        for step in steps {
            match step {
                SyncStep::SendBatch { max_messages } => {
                    if let Some((_, batch)) = write_batch(&alice, bob_at_alice, max_messages) {
                        in_flight.push(batch);
                    }
                }
                SyncStep::DropLastBatch => {
                    in_flight.pop();
                }
                SyncStep::Ack => {
                    for batch in in_flight.drain(..) {
                        bob.engine.receive_batch(alice_at_bob, &batch).await.unwrap();
                    }
                    let outstanding = alice.outstanding(bob_at_alice);
                    let mut writer = CborAckWriter::new(Vec::new());
                    bob.engine.generate_ack(alice_at_bob, &mut writer).unwrap();
                    let Packet::Ack(ack) = Packet::decode(&writer.into_inner()).unwrap() else {
                        panic!("expected an ack packet");
                    };
                    let ack_ids: HashSet<BatchId> = ack.batches.iter().copied().collect();
                    for batch in outstanding.iter().filter(|b| ack_ids.contains(&b.id)) {
                        acked.extend(batch.messages.iter().copied());
                    }
                    alice.engine.receive_ack(bob_at_alice, &ack).unwrap();
                }
                SyncStep::Wait(d) => alice.clock.advance(d),
                SyncStep::FindLost => {
                    alice.engine.find_lost_batches(bob_at_alice).unwrap();
                }
            }

            let outstanding = alice.outstanding(bob_at_alice);
            let mut in_batches = HashSet::new();
            for batch in &outstanding {
                for id in &batch.messages {
                    prop_assert!(in_batches.insert(*id), "message in two outstanding batches");
                }
            }
            for id in &ids {
                let status = alice.status(bob_at_alice, id).unwrap().status;
                prop_assert_eq!(status == Status::Seen, acked.contains(id));
                prop_assert_eq!(status == Status::Sent, in_batches.contains(id));
            }
        }
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn seen_is_exactly_what_was_acked(bodies in bodies(12), steps in sync_steps(24)) {
        run_session(bodies, steps)?;
    }

    #[test]
    fn rating_history_decides_sendability(history in ratings(8)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async move {
            let (alice, bob_at_alice, _, _) = pair();
            let author = AuthorId::from_bytes([9; 32]);
            let m = alice.post_by(author, b"rated").await;
            for rating in &history {
                alice.engine.set_rating(&author, *rating).unwrap();
            }
            let last = *history.last().unwrap();
            let status = alice.status(bob_at_alice, &m.id).unwrap();
            prop_assert_eq!(status.sendable, last == Rating::Good);
            Ok(())
        })?;
    }
}

#[test]
fn unknown_offer_ids_are_all_requested() {
    let (_, _, bob, alice_at_bob) = pair();
    let offer = Offer {
        ids: vec![MessageId::from_bytes([1; 32]), MessageId::from_bytes([2; 32])],
    };
    let mut sink = CborPacketWriter::new(Vec::new());
    let request = bob.engine.receive_offer(alice_at_bob, &offer, &mut sink).unwrap();
    assert_eq!(request.to_string(), "11");
}

#[test]
fn batch_writer_reports_remaining_capacity() {
    let mut writer = CborBatchWriter::new(Vec::new(), 10);
    assert!(writer.write_message(b"12345").unwrap());
    assert_eq!(writer.capacity(), 5);
    assert!(!writer.write_message(b"123456").unwrap());
}
