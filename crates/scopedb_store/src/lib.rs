//! # ScopeDB Store
//!
//! Embedded, journaled entity store whose sessions plug into
//! `scopedb_core` scopes.
//!
//! This crate provides:
//! - Storage backends (in-memory and file) as opaque byte stores
//! - An append-only commit journal with torn-tail recovery
//! - A [`Database`] of versioned CBOR entities with optimistic conflict checks
//! - [`StoreSession`], an identity-mapped unit of work implementing
//!   `scopedb_core::Session`
//! - [`StoreTransaction`], committing several sessions as one journal record
//!
//! ## Wiring into scopes
//!
//! ```rust,ignore
//! use scopedb_core::{ScopeFactory, SessionKey, SessionRegistry};
//! use scopedb_store::{Database, Mapping};
//!
//! const USERS: SessionKey = SessionKey::from_static("users");
//! const AUDIT: SessionKey = SessionKey::from_static("audit");
//!
//! let db = Database::open(Path::new("data/app.sdb"))?;
//! let registry = SessionRegistry::new()
//!     .register(USERS, db.session_factory(Mapping::new().entity::<User>()))
//!     .register(AUDIT, db.session_factory(Mapping::new().entity::<AuditEntry>()))
//!     .with_transactions(db.transaction_provider());
//! let scopes = ScopeFactory::new(registry);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod change;
mod config;
mod database;
mod entity;
mod error;
pub mod journal;
mod mapping;
mod session;
mod transaction;
mod types;

pub use backend::{FileBackend, InMemoryBackend, StorageBackend, StorageError, StorageResult};
pub use change::{ChangeSet, Expectation, Write, WriteOp};
pub use config::Config;
pub use database::Database;
pub use entity::{decode, encode, Entity};
pub use error::{StoreError, StoreResult};
pub use mapping::Mapping;
pub use session::{StoreSession, StoreSessionFactory};
pub use transaction::{StoreTransaction, StoreTransactions};
pub use types::{DatabaseId, SequenceNumber, Versioned};
