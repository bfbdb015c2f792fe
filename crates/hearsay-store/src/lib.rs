//! # Hearsay Store
//!
//! Transactional storage for the hearsay sync core. Provides a trait-based
//! interface with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Database`] - The transactional store contract
//! - [`SqliteDatabase`] - SQLite-based persistent storage
//! - [`MemoryDatabase`] - In-memory storage for tests
//! - [`OutstandingBatch`] - A sent batch awaiting acknowledgement
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hearsay_core::{Group, TransportProperties};
//! use hearsay_store::{Database, SqliteDatabase};
//!
//! let db = SqliteDatabase::open("hearsay.db").unwrap();
//! let mut txn = db.start_transaction().unwrap();
//! let contact = db.add_contact(&mut txn, &TransportProperties::new()).unwrap();
//! db.add_subscription(&mut txn, &Group::new("news", b""), 0).unwrap();
//! db.commit_transaction(txn).unwrap();
//! # let _ = contact;
//! ```
//!
//! ## Design Notes
//!
//! - **Serialized transactions**: a transaction holds the store exclusively
//!   until it commits or aborts
//! - **Drop aborts**: a transaction handle dropped without committing
//!   discards its changes
//! - **Visibility by row**: a message is visible to a contact exactly when a
//!   status row exists for the pair

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryDatabase, MemoryTxn};
pub use sqlite::{SqliteDatabase, SqliteTxn};
pub use traits::{Database, OutstandingBatch};
