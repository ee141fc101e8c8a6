//! Error types for the entity store.

use crate::backend::StorageError;
use crate::types::{DatabaseId, SequenceNumber};
use scopedb_core::EntityId;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write was based on a version that is no longer current.
    #[error("conflict on {collection}/{entity}: expected {expected}, found {found}")]
    Conflict {
        /// Collection of the entity.
        collection: String,
        /// The conflicting entity.
        entity: EntityId,
        /// What the write expected to find.
        expected: String,
        /// What the store actually holds.
        found: String,
    },

    /// The session's mapping does not include the collection.
    #[error("collection {collection} is not mapped by this session")]
    UnmappedCollection {
        /// The collection requested.
        collection: String,
    },

    /// Insert of an entity that already exists.
    #[error("entity {entity} already exists in {collection}")]
    DuplicateEntity {
        /// Collection of the entity.
        collection: String,
        /// The entity ID.
        entity: EntityId,
    },

    /// Update or removal of an entity that does not exist.
    #[error("entity {entity} not found in {collection}")]
    EntityNotFound {
        /// Collection searched.
        collection: String,
        /// The entity ID.
        entity: EntityId,
    },

    /// The journal cannot be replayed.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// CBOR encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A transaction was offered a session of another database.
    #[error("session of {session} cannot enlist in a transaction of {transaction}")]
    CrossDatabaseTransaction {
        /// Database of the transaction.
        transaction: DatabaseId,
        /// Database of the session.
        session: DatabaseId,
    },

    /// A session was asked to enlist in a transaction it does not understand.
    #[error("cannot enlist in a transaction from another store implementation")]
    ForeignTransaction,

    /// A blocking commit task failed to complete.
    #[error("background commit task failed: {0}")]
    BackgroundTask(String),
}

impl StoreError {
    pub(crate) fn conflict(
        collection: &str,
        entity: EntityId,
        expected: impl ToString,
        found: Option<SequenceNumber>,
    ) -> Self {
        Self::Conflict {
            collection: collection.to_string(),
            entity,
            expected: expected.to_string(),
            found: found.map_or_else(|| "absent".to_string(), |seq| seq.to_string()),
        }
    }

    pub(crate) fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Returns true if this is an optimistic concurrency conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
