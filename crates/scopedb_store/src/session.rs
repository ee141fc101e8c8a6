//! Sessions: identity-mapped, write-buffering views onto a database.

use crate::change::{ChangeSet, Expectation, WriteOp};
use crate::database::Database;
use crate::entity::{decode, encode, Entity};
use crate::error::{StoreError, StoreResult};
use crate::mapping::Mapping;
use crate::transaction::StoreTransaction;
use crate::types::{SequenceNumber, Versioned};
use async_trait::async_trait;
use parking_lot::Mutex;
use scopedb_core::{AmbientTransaction, EntityId, Session, SessionError, SessionFactory, SessionKey};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

type Slot = (String, EntityId);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    op: WriteOp,
    expect: Expectation,
}

#[derive(Default)]
struct SessionState {
    /// Versions this session has loaded. Reads keep returning these until
    /// the session commits over them or refreshes them.
    tracked: HashMap<Slot, Versioned>,
    pending: BTreeMap<Slot, Pending>,
}

/// Creates [`StoreSession`]s for one mapping.
///
/// Returned by [`Database::session_factory`].
#[derive(Debug, Clone)]
pub struct StoreSessionFactory {
    database: Database,
    mapping: Mapping,
}

impl StoreSessionFactory {
    pub(crate) fn new(database: Database, mapping: Mapping) -> Self {
        Self { database, mapping }
    }
}

impl SessionFactory for StoreSessionFactory {
    fn create_session(&self, key: &SessionKey) -> Result<Arc<dyn Session>, SessionError> {
        tracing::trace!(%key, db = %self.database.id(), "creating store session");
        Ok(Arc::new(StoreSession::new(
            self.database.clone(),
            self.mapping.clone(),
            key.clone(),
        )))
    }
}

/// A unit-of-work session over a [`Database`].
///
/// Reads go through an identity map: the first read of an entity pins the
/// version that later reads return and that writes are checked against.
/// Writes are buffered until [`Session::commit`], which fails with
/// [`StoreError::Conflict`] if another commit changed a pinned entity in
/// between.
pub struct StoreSession {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    key: SessionKey,
    database: Database,
    mapping: Mapping,
    state: Mutex<SessionState>,
}

impl StoreSession {
    /// Creates a session over `database` limited to `mapping`.
    #[must_use]
    pub fn new(database: Database, mapping: Mapping, key: SessionKey) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                key,
                database,
                mapping,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    /// Returns the key the session was created for.
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.inner.key
    }

    /// Returns the database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.inner.database
    }

    /// Returns the number of buffered writes.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Returns true if the session has loaded the entity.
    #[must_use]
    pub fn is_tracked<T: Entity>(&self, id: &EntityId) -> bool {
        self.inner
            .state
            .lock()
            .tracked
            .contains_key(&(T::COLLECTION.to_string(), *id))
    }

    /// Buffers the insertion of a new entity.
    ///
    /// # Errors
    ///
    /// `DuplicateEntity` if the entity exists or is already being inserted.
    pub fn insert<T: Entity>(&self, entity: &T) -> StoreResult<()> {
        let slot = self.inner.slot::<T>(entity.id())?;
        let payload = encode(entity)?;
        let mut state = self.inner.state.lock();

        match buffered(&state, &slot) {
            Some((true, _)) => return Err(duplicate(&slot)),
            Some((false, expect)) => {
                state.pending.insert(slot, Pending { op: WriteOp::Put(payload), expect });
                return Ok(());
            }
            None => {}
        }

        if state.tracked.contains_key(&slot) || self.inner.database.get(&slot.0, &slot.1).is_some() {
            return Err(duplicate(&slot));
        }
        state.pending.insert(
            slot,
            Pending {
                op: WriteOp::Put(payload),
                expect: Expectation::Absent,
            },
        );
        Ok(())
    }

    /// Buffers the replacement of an existing entity.
    ///
    /// The write is checked against the version this session loaded. If the
    /// entity was never read here, the current committed version is loaded
    /// first.
    ///
    /// # Errors
    ///
    /// `EntityNotFound` if the entity does not exist.
    pub fn update<T: Entity>(&self, entity: &T) -> StoreResult<()> {
        let slot = self.inner.slot::<T>(entity.id())?;
        let payload = encode(entity)?;
        let mut state = self.inner.state.lock();

        if let Some(pending) = state.pending.get_mut(&slot) {
            return match pending.op {
                WriteOp::Put(_) => {
                    pending.op = WriteOp::Put(payload);
                    Ok(())
                }
                WriteOp::Delete => Err(not_found(&slot)),
            };
        }

        let base = self.inner.load(&mut state, &slot).ok_or_else(|| not_found(&slot))?;
        state.pending.insert(
            slot,
            Pending {
                op: WriteOp::Put(payload),
                expect: Expectation::At(base),
            },
        );
        Ok(())
    }

    /// Buffers the removal of an entity.
    ///
    /// Removing an entity inserted in this session and never committed just
    /// drops the insertion.
    ///
    /// # Errors
    ///
    /// `EntityNotFound` if the entity does not exist.
    pub fn remove<T: Entity>(&self, id: &EntityId) -> StoreResult<()> {
        let slot = self.inner.slot::<T>(*id)?;
        let mut state = self.inner.state.lock();

        match buffered(&state, &slot) {
            Some((true, Expectation::Absent)) => {
                state.pending.remove(&slot);
                return Ok(());
            }
            Some((true, expect)) => {
                state.pending.insert(slot, Pending { op: WriteOp::Delete, expect });
                return Ok(());
            }
            Some((false, _)) => return Err(not_found(&slot)),
            None => {}
        }

        let base = self.inner.load(&mut state, &slot).ok_or_else(|| not_found(&slot))?;
        state.pending.insert(
            slot,
            Pending {
                op: WriteOp::Delete,
                expect: Expectation::At(base),
            },
        );
        Ok(())
    }

    /// Reads an entity as this session sees it.
    ///
    /// Buffered writes win over the identity map, which wins over committed
    /// state.
    pub fn find<T: Entity>(&self, id: &EntityId) -> StoreResult<Option<T>> {
        let slot = self.inner.slot::<T>(*id)?;
        let mut state = self.inner.state.lock();

        match state.pending.get(&slot) {
            Some(Pending { op: WriteOp::Put(payload), .. }) => return decode(payload).map(Some),
            Some(Pending { op: WriteOp::Delete, .. }) => return Ok(None),
            None => {}
        }

        if self.inner.load(&mut state, &slot).is_none() {
            return Ok(None);
        }
        match state.tracked.get(&slot) {
            Some(version) => decode(&version.payload).map(Some),
            None => Ok(None),
        }
    }

    /// Lists every entity of `T`'s collection as this session sees it,
    /// ordered by ID.
    pub fn list<T: Entity>(&self) -> StoreResult<Vec<T>> {
        let collection = self.inner.collection::<T>()?;
        let mut state = self.inner.state.lock();
        let mut merged: BTreeMap<EntityId, Vec<u8>> = BTreeMap::new();

        for (id, version) in self.inner.database.list(collection) {
            let pinned = state
                .tracked
                .entry((collection.to_string(), id))
                .or_insert(version);
            merged.insert(id, pinned.payload.clone());
        }
        for ((name, id), version) in &state.tracked {
            if name == collection {
                merged.insert(*id, version.payload.clone());
            }
        }
        for ((name, id), pending) in &state.pending {
            if name != collection {
                continue;
            }
            match &pending.op {
                WriteOp::Put(payload) => {
                    merged.insert(*id, payload.clone());
                }
                WriteOp::Delete => {
                    merged.remove(id);
                }
            }
        }

        merged.values().map(|payload| decode(payload)).collect()
    }
}

impl SessionInner {
    fn collection<T: Entity>(&self) -> StoreResult<&'static str> {
        if self.mapping.contains(T::COLLECTION) {
            Ok(T::COLLECTION)
        } else {
            Err(StoreError::UnmappedCollection {
                collection: T::COLLECTION.to_string(),
            })
        }
    }

    fn slot<T: Entity>(&self, id: EntityId) -> StoreResult<Slot> {
        Ok((self.collection::<T>()?.to_string(), id))
    }

    /// Pins the committed version of `slot` if it is not pinned yet and
    /// returns the pinned sequence.
    fn load(&self, state: &mut SessionState, slot: &Slot) -> Option<SequenceNumber> {
        if let Some(version) = state.tracked.get(slot) {
            return Some(version.seq);
        }
        let version = self.database.get(&slot.0, &slot.1)?;
        let seq = version.seq;
        state.tracked.insert(slot.clone(), version);
        Some(seq)
    }

    pub(crate) fn database(&self) -> &Database {
        &self.database
    }

    pub(crate) fn key(&self) -> &SessionKey {
        &self.key
    }

    pub(crate) fn change_set(&self) -> ChangeSet {
        change_set(&self.state.lock())
    }

    /// Marks `changes` as committed at `seq`.
    pub(crate) fn accept(&self, changes: &ChangeSet, seq: SequenceNumber) {
        accept(&mut self.state.lock(), changes, seq);
    }

    fn commit(&self) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let changes = change_set(&state);
        if changes.is_empty() {
            return Ok(0);
        }
        let seq = self.database.commit_batches(std::slice::from_ref(&changes))?;
        accept(&mut state, &changes, seq);
        tracing::debug!(key = %self.key, changes = changes.len(), %seq, "session committed");
        Ok(changes.len())
    }
}

fn change_set(state: &SessionState) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for ((collection, id), pending) in &state.pending {
        match &pending.op {
            WriteOp::Put(payload) => {
                changes.put(collection.clone(), *id, payload.clone(), pending.expect);
            }
            WriteOp::Delete => {
                changes.delete(collection.clone(), *id, pending.expect);
            }
        }
    }
    changes
}

fn accept(state: &mut SessionState, changes: &ChangeSet, seq: SequenceNumber) {
    for write in changes.writes() {
        let slot = (write.collection.clone(), write.id);
        if state.pending.get(&slot).is_some_and(|p| p.op == write.op) {
            state.pending.remove(&slot);
        }
        match &write.op {
            WriteOp::Put(payload) => {
                state.tracked.insert(
                    slot,
                    Versioned {
                        seq,
                        payload: payload.clone(),
                    },
                );
            }
            WriteOp::Delete => {
                state.tracked.remove(&slot);
            }
        }
    }
}

/// Returns whether `slot` has a buffered put (`true`) or delete (`false`),
/// and the expectation it carries.
fn buffered(state: &SessionState, slot: &Slot) -> Option<(bool, Expectation)> {
    state
        .pending
        .get(slot)
        .map(|p| (matches!(p.op, WriteOp::Put(_)), p.expect))
}

fn duplicate(slot: &Slot) -> StoreError {
    StoreError::DuplicateEntity {
        collection: slot.0.clone(),
        entity: slot.1,
    }
}

fn not_found(slot: &Slot) -> StoreError {
    StoreError::EntityNotFound {
        collection: slot.0.clone(),
        entity: slot.1,
    }
}

#[async_trait]
impl Session for StoreSession {
    fn has_changes(&self) -> bool {
        !self.inner.state.lock().pending.is_empty()
    }

    fn commit(&self) -> Result<usize, SessionError> {
        Ok(self.inner.commit()?)
    }

    async fn commit_async(&self) -> Result<usize, SessionError> {
        let inner = Arc::clone(&self.inner);
        let result = tokio::task::spawn_blocking(move || inner.commit())
            .await
            .map_err(|e| StoreError::BackgroundTask(e.to_string()))?;
        Ok(result?)
    }

    fn enlist(&self, transaction: &mut dyn AmbientTransaction) -> Result<(), SessionError> {
        let transaction = transaction
            .as_any_mut()
            .downcast_mut::<StoreTransaction>()
            .ok_or(StoreError::ForeignTransaction)?;
        transaction.enlist(Arc::clone(&self.inner))?;
        Ok(())
    }

    fn discard(&self) {
        let mut state = self.inner.state.lock();
        if !state.pending.is_empty() {
            tracing::debug!(key = %self.inner.key, writes = state.pending.len(), "discarding buffered writes");
            state.pending.clear();
        }
    }

    fn refresh(&self, id: &EntityId) -> Result<bool, SessionError> {
        let mut state = self.inner.state.lock();
        let mut refreshed = false;

        for collection in self.inner.mapping.collections() {
            let slot = (collection.to_string(), *id);
            let known = state.tracked.contains_key(&slot) || state.pending.contains_key(&slot);
            if !known {
                continue;
            }
            state.pending.remove(&slot);
            match self.inner.database.get(collection, id) {
                Some(version) => {
                    state.tracked.insert(slot, version);
                }
                None => {
                    state.tracked.remove(&slot);
                }
            }
            refreshed = true;
        }

        if refreshed {
            tracing::trace!(key = %self.inner.key, entity = %id, "entity refreshed");
        }
        Ok(refreshed)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StoreSession")
            .field("key", &self.inner.key)
            .field("db", &self.inner.database.id())
            .field("tracked", &state.tracked.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: EntityId,
        text: String,
    }

    impl Entity for Note {
        const COLLECTION: &'static str = "notes";

        fn id(&self) -> EntityId {
            self.id
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag {
        id: EntityId,
    }

    impl Entity for Tag {
        const COLLECTION: &'static str = "tags";

        fn id(&self) -> EntityId {
            self.id
        }
    }

    fn note(text: &str) -> Note {
        Note {
            id: EntityId::new(),
            text: text.into(),
        }
    }

    fn session(db: &Database) -> StoreSession {
        StoreSession::new(db.clone(), Mapping::new().entity::<Note>(), SessionKey::from_static("notes"))
    }

    #[test]
    fn insert_is_buffered_until_commit() {
        let db = Database::open_in_memory().unwrap();
        let session = session(&db);
        let n = note("draft");

        session.insert(&n).unwrap();
        assert!(session.has_changes());
        assert_eq!(session.find::<Note>(&n.id).unwrap(), Some(n.clone()));
        assert!(db.get_entity::<Note>(&n.id).unwrap().is_none());

        assert_eq!(session.commit().unwrap(), 1);
        assert!(!session.has_changes());
        assert_eq!(db.get_entity::<Note>(&n.id).unwrap(), Some(n));
    }

    #[test]
    fn unmapped_collection_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = session(&db).insert(&Tag { id: EntityId::new() }).unwrap_err();
        assert!(matches!(err, StoreError::UnmappedCollection { .. }));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let s = session(&db);
        let n = note("a");
        s.insert(&n).unwrap();
        assert!(matches!(s.insert(&n), Err(StoreError::DuplicateEntity { .. })));
        s.commit().unwrap();

        let other = session(&db);
        assert!(matches!(other.insert(&n), Err(StoreError::DuplicateEntity { .. })));
    }

    #[test]
    fn update_of_missing_entity_fails() {
        let db = Database::open_in_memory().unwrap();
        let err = session(&db).update(&note("ghost")).unwrap_err();
        assert!(matches!(err, StoreError::EntityNotFound { .. }));
    }

    #[test]
    fn identity_map_pins_the_first_read() {
        let db = Database::open_in_memory().unwrap();
        let mut n = note("v1");
        let writer = session(&db);
        writer.insert(&n).unwrap();
        writer.commit().unwrap();

        let reader = session(&db);
        assert_eq!(reader.find::<Note>(&n.id).unwrap().unwrap().text, "v1");

        n.text = "v2".into();
        writer.update(&n).unwrap();
        writer.commit().unwrap();

        assert_eq!(reader.find::<Note>(&n.id).unwrap().unwrap().text, "v1");
        assert!(reader.refresh(&n.id).unwrap());
        assert_eq!(reader.find::<Note>(&n.id).unwrap().unwrap().text, "v2");
    }

    #[test]
    fn stale_update_conflicts_at_commit() {
        let db = Database::open_in_memory().unwrap();
        let mut n = note("v1");
        let seed = session(&db);
        seed.insert(&n).unwrap();
        seed.commit().unwrap();

        let stale = session(&db);
        stale.find::<Note>(&n.id).unwrap();

        let fresh = session(&db);
        n.text = "fresh".into();
        fresh.update(&n).unwrap();
        fresh.commit().unwrap();

        n.text = "stale".into();
        stale.update(&n).unwrap();
        let err = stale.commit().unwrap_err();
        let err = err.downcast_ref::<StoreError>().unwrap();
        assert!(err.is_conflict());
        assert!(stale.has_changes());
        assert_eq!(db.get_entity::<Note>(&n.id).unwrap().unwrap().text, "fresh");
    }

    #[test]
    fn removing_an_uncommitted_insert_drops_it() {
        let db = Database::open_in_memory().unwrap();
        let s = session(&db);
        let n = note("temp");
        s.insert(&n).unwrap();
        s.remove::<Note>(&n.id).unwrap();
        assert!(!s.has_changes());
    }

    #[test]
    fn remove_then_commit_deletes() {
        let db = Database::open_in_memory().unwrap();
        let s = session(&db);
        let n = note("doomed");
        s.insert(&n).unwrap();
        s.commit().unwrap();

        s.remove::<Note>(&n.id).unwrap();
        assert_eq!(s.find::<Note>(&n.id).unwrap(), None);
        assert_eq!(s.commit().unwrap(), 1);
        assert!(db.get_entity::<Note>(&n.id).unwrap().is_none());
        assert!(!s.is_tracked::<Note>(&n.id));
    }

    #[test]
    fn list_merges_pending_writes() {
        let db = Database::open_in_memory().unwrap();
        let s = session(&db);
        let kept = note("kept");
        let gone = note("gone");
        s.insert(&kept).unwrap();
        s.insert(&gone).unwrap();
        s.commit().unwrap();

        let added = note("added");
        s.insert(&added).unwrap();
        s.remove::<Note>(&gone.id).unwrap();

        let mut texts: Vec<_> = s.list::<Note>().unwrap().into_iter().map(|n| n.text).collect();
        texts.sort();
        assert_eq!(texts, vec!["added", "kept"]);
    }

    #[test]
    fn discard_drops_buffered_writes() {
        let db = Database::open_in_memory().unwrap();
        let s = session(&db);
        s.insert(&note("x")).unwrap();
        s.discard();
        assert_eq!(s.pending_count(), 0);
        assert_eq!(s.commit().unwrap(), 0);
        assert_eq!(db.count("notes"), 0);
    }

    #[test]
    fn refresh_of_unknown_entity_is_false() {
        let db = Database::open_in_memory().unwrap();
        assert!(!session(&db).refresh(&EntityId::new()).unwrap());
    }

    #[tokio::test]
    async fn async_commit_runs_off_the_executor() {
        let db = Database::open_in_memory().unwrap();
        let s = session(&db);
        let n = note("async");
        s.insert(&n).unwrap();
        assert_eq!(s.commit_async().await.unwrap(), 1);
        assert!(db.get_entity::<Note>(&n.id).unwrap().is_some());
    }
}
