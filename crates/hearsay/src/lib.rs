//! # Hearsay
//!
//! The sync core of a delay-tolerant peer-to-peer messenger.
//!
//! ## Overview
//!
//! A node stores messages for the groups it subscribes to and forwards them
//! to contacts that share those groups, over whatever transport happens to
//! connect them:
//!
//! - **Batches and acks**: messages go out in batches; unacknowledged
//!   batches are declared lost and their messages sent again
//! - **Offers and requests**: a contact can be offered message IDs first
//!   and asked only for what it lacks
//! - **Sendability**: messages by authors rated anything but good stay put
//! - **Replay protection**: incoming connection numbers are accepted once
//!   per rotating transport secret
//! - **Gossip**: subscriptions and transport properties, last writer wins
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hearsay::{Hearsay, HearsayConfig};
//! use hearsay::core::Group;
//!
//! async fn example() -> hearsay::Result<()> {
//!     let node = Hearsay::open("hearsay.db", HearsayConfig::default())?;
//!     node.start()?;
//!
//!     let engine = node.engine();
//!     engine.subscribe(&Group::new("friends", b"salt"))?;
//!     let contact = engine.add_contact(&Default::default())?;
//!     println!("added {contact}");
//!
//!     node.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `hearsay::core` - identifiers, messages, secrets, replay windows
//! - `hearsay::store` - the transactional store and its backends
//! - `hearsay::sync` - the engine, packets, writers and events

pub mod cleaner;
pub mod config;
pub mod error;
pub mod node;

// Re-export component crates
pub use hearsay_core as core;
pub use hearsay_store as store;
pub use hearsay_sync as sync;

// Re-export main types for convenience
pub use cleaner::Cleaner;
pub use config::{CleanerConfig, HearsayConfig};
pub use error::{HearsayError, Result};
pub use node::Hearsay;

pub use hearsay_sync::{Event, EventListener, SyncConfig, SyncEngine, SyncError};
