//! # Hearsay Testkit
//!
//! Testing utilities for hearsay.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a [`TestPeer`] wrapping an engine with a manual clock and
//!   an event recorder, plus helpers to carry packets between peers
//! - **Test messages**: a small CBOR message format and its
//!   [`TestMessageParser`], standing in for signed messages
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust
//! use hearsay_testkit::{deliver_ack, deliver_batch, TestPeer};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let alice = TestPeer::new();
//! let bob = TestPeer::new();
//! let bob_at_alice = alice.add_contact();
//! let alice_at_bob = bob.add_contact();
//!
//! alice.post(b"hello").await;
//! deliver_batch(&alice, bob_at_alice, &bob, alice_at_bob).await.unwrap();
//! deliver_ack(&bob, alice_at_bob, &alice, bob_at_alice).unwrap();
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use hearsay_testkit::generators::bodies;
//!
//! proptest! {
//!     #[test]
//!     fn every_body_is_stored(bodies in bodies(20)) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod messages;

pub use fixtures::{deliver_ack, deliver_batch, FailingSink, RecordingListener, TestPeer};
pub use messages::{test_message, TestMessageParser};
