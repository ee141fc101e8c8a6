//! Database facade and recovery.

use crate::backend::{FileBackend, InMemoryBackend, StorageBackend};
use crate::change::{ChangeSet, Expectation, WriteOp};
use crate::config::Config;
use crate::entity::{decode, Entity};
use crate::error::{StoreError, StoreResult};
use crate::journal::{Journal, JournalRecord, JournalWrite};
use crate::mapping::Mapping;
use crate::session::StoreSessionFactory;
use crate::transaction::StoreTransactions;
use crate::types::{DatabaseId, SequenceNumber, Versioned};
use parking_lot::{Mutex, RwLock};
use scopedb_core::EntityId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Handle onto an embedded entity store.
///
/// Cheap to clone; clones share the same data. Every commit appends one
/// journal record and then becomes visible to readers all at once.
///
/// ```rust
/// use scopedb_store::{ChangeSet, Database, Expectation};
/// use scopedb_core::EntityId;
///
/// let db = Database::open_in_memory().unwrap();
/// let id = EntityId::new();
///
/// let mut changes = ChangeSet::new();
/// changes.put("notes", id, vec![1, 2, 3], Expectation::Absent);
/// let seq = db.commit_batches(&[changes]).unwrap();
///
/// assert_eq!(db.get("notes", &id).unwrap().seq, seq);
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    id: DatabaseId,
    config: Config,
    /// Held for the whole commit; serializes writers.
    journal: Mutex<Journal>,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    seq: SequenceNumber,
    collections: BTreeMap<String, BTreeMap<EntityId, Versioned>>,
}

impl State {
    fn version(&self, collection: &str, id: &EntityId) -> Option<SequenceNumber> {
        self.collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|v| v.seq)
    }

    fn apply(&mut self, record: JournalRecord) {
        for write in record.writes {
            match write.payload {
                Some(payload) => {
                    self.collections.entry(write.collection).or_default().insert(
                        write.id,
                        Versioned {
                            seq: record.seq,
                            payload,
                        },
                    );
                }
                None => {
                    if let Some(collection) = self.collections.get_mut(&write.collection) {
                        collection.remove(&write.id);
                    }
                }
            }
        }
        self.seq = record.seq;
    }
}

impl Database {
    /// Opens (or creates) a file-backed database at `path`.
    ///
    /// `path` names the journal file. Missing parent directories are
    /// created. The journal is replayed before this returns.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a file-backed database with custom configuration.
    pub fn open_with_config(path: &Path, config: Config) -> StoreResult<Self> {
        let backend = FileBackend::open(path)?;
        tracing::debug!(path = %path.display(), "opening database");
        Self::open_with_backend(Box::new(backend), config)
    }

    /// Opens a fresh in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), Config::default())
    }

    /// Opens a database over any storage backend.
    ///
    /// # Errors
    ///
    /// `JournalCorruption` if the journal cannot be replayed.
    pub fn open_with_backend(backend: Box<dyn StorageBackend>, config: Config) -> StoreResult<Self> {
        let mut journal = Journal::new(backend, &config);
        let mut state = State::default();
        for record in journal.recover()? {
            state.apply(record);
        }

        let id = DatabaseId::next();
        tracing::info!(
            db = %id,
            seq = %state.seq,
            collections = state.collections.len(),
            "database opened"
        );

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                id,
                config,
                journal: Mutex::new(journal),
                state: RwLock::new(state),
            }),
        })
    }

    /// Returns the process-unique ID of this database.
    #[must_use]
    pub fn id(&self) -> DatabaseId {
        self.inner.id
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the sequence of the latest commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.inner.state.read().seq
    }

    /// Returns the committed version of an entity.
    #[must_use]
    pub fn get(&self, collection: &str, id: &EntityId) -> Option<Versioned> {
        self.inner
            .state
            .read()
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned()
    }

    /// Returns every committed entity of a collection, ordered by ID.
    #[must_use]
    pub fn list(&self, collection: &str) -> Vec<(EntityId, Versioned)> {
        self.inner
            .state
            .read()
            .collections
            .get(collection)
            .map(|c| c.iter().map(|(id, v)| (*id, v.clone())).collect())
            .unwrap_or_default()
    }

    /// Returns the number of committed entities in a collection.
    #[must_use]
    pub fn count(&self, collection: &str) -> usize {
        self.inner
            .state
            .read()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Reads and decodes a committed entity.
    pub fn get_entity<T: Entity>(&self, id: &EntityId) -> StoreResult<Option<T>> {
        self.get(T::COLLECTION, id)
            .map(|v| decode(&v.payload))
            .transpose()
    }

    /// Reads and decodes every committed entity of `T`'s collection.
    pub fn list_entities<T: Entity>(&self) -> StoreResult<Vec<T>> {
        self.list(T::COLLECTION)
            .into_iter()
            .map(|(_, v)| decode(&v.payload))
            .collect()
    }

    /// Returns the journal size in bytes.
    pub fn journal_size(&self) -> StoreResult<u64> {
        self.inner.journal.lock().size()
    }

    /// Commits several change sets as one atomic unit.
    ///
    /// Every expectation is checked against committed state, and against
    /// earlier writes in the same call, before anything is written. Then one
    /// journal record holding all writes is appended and the writes become
    /// visible together. An empty input commits nothing and returns the
    /// current sequence.
    ///
    /// # Errors
    ///
    /// - `Conflict` if any write's expectation does not hold. Nothing is
    ///   written.
    /// - `Storage` if the journal append fails. Nothing becomes visible.
    pub fn commit_batches(&self, batches: &[ChangeSet]) -> StoreResult<SequenceNumber> {
        let mut journal = self.inner.journal.lock();

        let writes: Vec<_> = batches.iter().flat_map(ChangeSet::writes).collect();
        if writes.is_empty() {
            return Ok(self.committed_seq());
        }

        let seq = {
            let state = self.inner.state.read();
            let seq = state.seq.next();
            let mut overlay: HashMap<(&str, EntityId), Option<SequenceNumber>> = HashMap::new();

            for write in &writes {
                let key = (write.collection.as_str(), write.id);
                let current = match overlay.get(&key) {
                    Some(version) => *version,
                    None => state.version(&write.collection, &write.id),
                };
                let holds = match write.expect {
                    Expectation::Absent => current.is_none(),
                    Expectation::At(expected) => current == Some(expected),
                    Expectation::Any => true,
                };
                if !holds {
                    tracing::debug!(
                        collection = %write.collection,
                        entity = %write.id,
                        expected = %write.expect,
                        "commit rejected by conflict"
                    );
                    return Err(StoreError::conflict(
                        &write.collection,
                        write.id,
                        write.expect,
                        current,
                    ));
                }
                let after = match write.op {
                    WriteOp::Put(_) => Some(seq),
                    WriteOp::Delete => None,
                };
                overlay.insert(key, after);
            }
            seq
        };

        let record = JournalRecord {
            seq,
            writes: writes
                .iter()
                .map(|w| JournalWrite {
                    collection: w.collection.clone(),
                    id: w.id,
                    payload: match &w.op {
                        WriteOp::Put(payload) => Some(payload.clone()),
                        WriteOp::Delete => None,
                    },
                })
                .collect(),
        };

        journal.append(&record)?;
        self.inner.state.write().apply(record);

        tracing::debug!(db = %self.inner.id, %seq, writes = writes.len(), batches = batches.len(), "committed");
        Ok(seq)
    }

    /// Returns a session factory for sessions mapped to `mapping`.
    ///
    /// Register it with a `SessionRegistry` under the session's key.
    #[must_use]
    pub fn session_factory(&self, mapping: Mapping) -> StoreSessionFactory {
        StoreSessionFactory::new(self.clone(), mapping)
    }

    /// Returns a transaction provider committing enlisted sessions of this
    /// database through [`Database::commit_batches`].
    #[must_use]
    pub fn transaction_provider(&self) -> StoreTransactions {
        StoreTransactions::new(self.clone())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.inner.id)
            .field("seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}
