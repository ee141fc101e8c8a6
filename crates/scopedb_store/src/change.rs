//! Buffered writes and the versions they expect to replace.

use crate::types::SequenceNumber;
use scopedb_core::EntityId;

/// What a write expects to find in the store when it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// The entity must not exist.
    Absent,
    /// The entity must still be at this version.
    At(SequenceNumber),
    /// Blind write.
    Any,
}

impl std::fmt::Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::At(seq) => write!(f, "{seq}"),
            Self::Any => f.write_str("any"),
        }
    }
}

/// The operation of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or replace with the encoded entity.
    Put(Vec<u8>),
    /// Remove the entity.
    Delete,
}

/// One buffered write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    /// Target collection.
    pub collection: String,
    /// Target entity.
    pub id: EntityId,
    /// What to do.
    pub op: WriteOp,
    /// Version the write was based on.
    pub expect: Expectation,
}

/// The writes of one session, committed as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    writes: Vec<Write>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a put.
    pub fn put(
        &mut self,
        collection: impl Into<String>,
        id: EntityId,
        payload: Vec<u8>,
        expect: Expectation,
    ) -> &mut Self {
        self.writes.push(Write {
            collection: collection.into(),
            id,
            op: WriteOp::Put(payload),
            expect,
        });
        self
    }

    /// Adds a delete.
    pub fn delete(
        &mut self,
        collection: impl Into<String>,
        id: EntityId,
        expect: Expectation,
    ) -> &mut Self {
        self.writes.push(Write {
            collection: collection.into(),
            id,
            op: WriteOp::Delete,
            expect,
        });
        self
    }

    /// Appends a prepared write.
    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    /// Returns the writes in order.
    #[must_use]
    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    /// Returns the number of writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}
