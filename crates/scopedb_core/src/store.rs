//! Session store: one lazily-created session per key for one owning scope.

use crate::entity::EntityId;
use crate::error::{ScopeError, ScopeResult};
use crate::key::SessionKey;
use crate::registry::SessionRegistry;
use crate::session::{AmbientTransaction, Session};
use crate::types::StoreId;
use parking_lot::Mutex;
use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The sessions owned by one scope.
///
/// Joined scopes hold the same `Arc<SessionStore>` as their owner, so a
/// session created at any nesting level is visible to every level.
///
/// Once released by its owner the store hands out no more sessions, so a
/// joined scope outliving its owner cannot buffer writes nobody commits.
pub struct SessionStore {
    id: StoreId,
    registry: Arc<SessionRegistry>,
    sessions: Mutex<BTreeMap<SessionKey, Arc<dyn Session>>>,
    released: AtomicBool,
}

impl SessionStore {
    /// Creates an empty store backed by `registry`.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            id: StoreId::next(),
            registry,
            sessions: Mutex::new(BTreeMap::new()),
            released: AtomicBool::new(false),
        }
    }

    /// Returns the store ID.
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.id
    }

    /// Returns the session for `key`, creating it on first request.
    ///
    /// Repeated calls with the same key return the identical session.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the store was already released.
    /// - `UnknownSessionKey` if the key was never registered.
    /// - The factory's own error.
    pub fn get_or_create(&self, key: &SessionKey) -> ScopeResult<Arc<dyn Session>> {
        let mut sessions = self.sessions.lock();
        if self.is_released() {
            return Err(ScopeError::invalid_operation(
                "the owning scope already released its sessions",
            ));
        }
        if let Some(session) = sessions.get(key) {
            return Ok(Arc::clone(session));
        }

        let session = self.registry.create_session(key)?;
        tracing::trace!(store = %self.id, %key, "created session");
        sessions.insert(key.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// Returns the session for `key` as its concrete type.
    pub fn get_typed<S: Session>(&self, key: &SessionKey) -> ScopeResult<Arc<S>> {
        let session = self.get_or_create(key)?;
        downcast_session(key, session)
    }

    /// Returns the session for `key` only if it was already created.
    #[must_use]
    pub fn existing(&self, key: &SessionKey) -> Option<Arc<dyn Session>> {
        self.sessions.lock().get(key).cloned()
    }

    /// Returns the number of created sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns true if no session was created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Returns the keys of the created sessions.
    #[must_use]
    pub fn keys(&self) -> Vec<SessionKey> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Returns true if any session holds buffered writes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.sessions.lock().values().any(|s| s.has_changes())
    }

    /// Returns true once the owning scope released the store.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Commits every session with buffered writes.
    ///
    /// One changed session commits directly. Several are enlisted in one
    /// ambient transaction so either all or none persist. Collaborator
    /// errors are returned unchanged.
    pub fn commit_all(&self) -> ScopeResult<usize> {
        let changed = self.changed_sessions();
        match changed.len() {
            0 => Ok(0),
            1 => Ok(changed[0].1.commit()?),
            _ => {
                let transaction = self.enlist_all(&changed)?;
                Ok(transaction.commit()?)
            }
        }
    }

    /// Async variant of [`SessionStore::commit_all`].
    pub async fn commit_all_async(&self) -> ScopeResult<usize> {
        let changed = self.changed_sessions();
        match changed.len() {
            0 => Ok(0),
            1 => Ok(changed[0].1.commit_async().await?),
            _ => {
                let transaction = self.enlist_all(&changed)?;
                Ok(transaction.commit_async().await?)
            }
        }
    }

    /// Drops buffered writes in every session.
    pub fn discard_all(&self) {
        for session in self.sessions.lock().values() {
            session.discard();
        }
    }

    /// Releases all sessions. The store is empty and unusable afterwards.
    pub fn release(&self) {
        let mut sessions = self.sessions.lock();
        self.released.store(true, Ordering::Release);
        let released = std::mem::take(&mut *sessions);
        drop(sessions);
        if !released.is_empty() {
            tracing::trace!(store = %self.id, sessions = released.len(), "released sessions");
        }
    }

    /// Refreshes `id` in the session for `key`, if that session exists.
    ///
    /// Never creates a session: an entity cannot be tracked by a session
    /// that does not exist yet.
    pub fn refresh_existing(&self, key: &SessionKey, id: &EntityId) -> ScopeResult<bool> {
        match self.existing(key) {
            Some(session) => Ok(session.refresh(id)?),
            None => Ok(false),
        }
    }

    fn changed_sessions(&self) -> Vec<(SessionKey, Arc<dyn Session>)> {
        self.sessions
            .lock()
            .iter()
            .filter(|(_, s)| s.has_changes())
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect()
    }

    fn enlist_all(
        &self,
        changed: &[(SessionKey, Arc<dyn Session>)],
    ) -> ScopeResult<Box<dyn AmbientTransaction>> {
        let provider = self
            .registry
            .transactions()
            .ok_or(ScopeError::TransactionUnavailable {
                sessions: changed.len(),
            })?;

        let mut transaction = provider.begin()?;
        for (key, session) in changed {
            if let Err(err) = session.enlist(transaction.as_mut()) {
                tracing::debug!(store = %self.id, %key, error = %err, "enlist failed, rolling back");
                transaction.rollback();
                return Err(err.into());
            }
        }
        tracing::debug!(
            store = %self.id,
            participants = transaction.participants(),
            "promoted commit to ambient transaction"
        );
        Ok(transaction)
    }
}

/// Downcasts a session to its concrete type.
pub(crate) fn downcast_session<S: Session>(
    key: &SessionKey,
    session: Arc<dyn Session>,
) -> ScopeResult<Arc<S>> {
    session
        .into_any()
        .downcast::<S>()
        .map_err(|_| ScopeError::SessionTypeMismatch {
            key: key.clone(),
            expected: type_name::<S>(),
        })
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("id", &self.id)
            .field("sessions", &self.keys())
            .finish_non_exhaustive()
    }
}
