//! Scope: the unit-of-work guard handed out by the factory.

use crate::ambient::{AmbientContext, Frame};
use crate::entity::EntityId;
use crate::error::{ScopeError, ScopeResult};
use crate::key::SessionKey;
use crate::session::Session;
use crate::store::SessionStore;
use crate::types::{ContextId, ScopeId, ScopeKind, ScopeState, StoreId};
use std::fmt;
use std::sync::Arc;

/// A unit-of-work boundary around one or more database sessions.
///
/// A scope is ambient from creation until it is disposed: code anywhere
/// below it on the same logical execution context reaches its sessions
/// through [`crate::AmbientLocator`].
///
/// Owning scopes (root and forced-independent) commit their sessions in
/// [`Scope::save_changes`] and discard anything left uncommitted when
/// disposed. Joined scopes share their owner's sessions and never commit.
///
/// Disposal runs on every exit path: explicitly through
/// [`Scope::dispose`], or on drop, including during unwinding.
///
/// # Example
///
/// ```ignore
/// let mut scope = factory.create()?;
/// let users = AmbientLocator.get_as::<StoreSession>(&USERS)?;
/// users.insert(&user)?;
/// scope.save_changes()?;
/// ```
pub struct Scope {
    id: ScopeId,
    parent: Option<ScopeId>,
    kind: ScopeKind,
    read_only: bool,
    store: Arc<SessionStore>,
    /// Store of the scope that was ambient at creation, if it differs from ours.
    parent_store: Option<Arc<SessionStore>>,
    context: Arc<AmbientContext>,
    state: ScopeState,
    committed: bool,
    strict_nesting: bool,
}

impl Scope {
    /// Builds a scope and pushes it onto `context`.
    pub(crate) fn enter(
        context: Arc<AmbientContext>,
        parent: Option<Frame>,
        kind: ScopeKind,
        read_only: bool,
        store: Arc<SessionStore>,
        strict_nesting: bool,
    ) -> Self {
        let parent_store = parent
            .as_ref()
            .filter(|p| p.store.id() != store.id())
            .map(|p| Arc::clone(&p.store));

        let mut scope = Self {
            id: ScopeId::next(),
            parent: parent.as_ref().map(|p| p.scope_id),
            kind,
            read_only,
            store,
            parent_store,
            context,
            state: ScopeState::Created,
            committed: false,
            strict_nesting,
        };

        scope.context.push(scope.frame());
        scope.state = ScopeState::Active;

        tracing::debug!(
            scope = %scope.id,
            context = %scope.context.id(),
            kind = %scope.kind,
            read_only = scope.read_only,
            store = %scope.store.id(),
            depth = scope.context.depth(),
            "scope created"
        );
        scope
    }

    fn frame(&self) -> Frame {
        Frame {
            scope_id: self.id,
            kind: self.kind,
            read_only: self.read_only,
            store: Arc::clone(&self.store),
        }
    }

    /// Returns the scope ID.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Returns the ID of the scope that was ambient when this one was created.
    #[must_use]
    pub fn parent_id(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Returns how this scope relates to its parent.
    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Returns true if this scope owns (and commits) its sessions.
    #[must_use]
    pub fn owns_sessions(&self) -> bool {
        self.kind.owns_sessions()
    }

    /// Returns true if this scope is read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// Returns true once `save_changes` has committed this scope.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Returns the ID of the session store in use.
    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.store.id()
    }

    /// Returns the ID of the execution context this scope lives on.
    #[must_use]
    pub fn context_id(&self) -> ContextId {
        self.context.id()
    }

    /// Returns the session for `key`, creating it on first use.
    pub fn session(&self, key: &SessionKey) -> ScopeResult<Arc<dyn Session>> {
        self.ensure_not_disposed()?;
        self.store.get_or_create(key)
    }

    /// Returns the session for `key` as its concrete type.
    pub fn session_as<S: Session>(&self, key: &SessionKey) -> ScopeResult<Arc<S>> {
        self.ensure_not_disposed()?;
        self.store.get_typed(key)
    }

    /// Persists the changes made in this scope.
    ///
    /// Returns the number of persisted changes. A joined scope returns 0
    /// without committing: only the owning ancestor commits. An owning
    /// scope commits at most once.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the scope is read-only, disposed, or
    ///   already committed, or if it is joined and its owner was disposed
    ///   first.
    /// - The underlying session error, unchanged, if the commit fails. No
    ///   change from this scope's sessions is persisted in that case.
    pub fn save_changes(&mut self) -> ScopeResult<usize> {
        if !self.begin_save()? {
            return Ok(0);
        }
        let result = self.store.commit_all();
        self.finish_save(result)
    }

    /// Async variant of [`Scope::save_changes`].
    ///
    /// Suspends instead of blocking while the sessions perform I/O.
    pub async fn save_changes_async(&mut self) -> ScopeResult<usize> {
        if !self.begin_save()? {
            return Ok(0);
        }
        let result = self.store.commit_all_async().await;
        self.finish_save(result)
    }

    fn begin_save(&mut self) -> ScopeResult<bool> {
        match self.state {
            ScopeState::Disposed => {
                return Err(ScopeError::invalid_operation("scope already disposed"))
            }
            ScopeState::Committing => {
                return Err(ScopeError::invalid_operation("scope is already committing"))
            }
            ScopeState::Created | ScopeState::Active => {}
        }

        if self.read_only {
            return Err(ScopeError::invalid_operation(
                "cannot save changes in a read-only scope",
            ));
        }

        if !self.kind.owns_sessions() {
            if self.store.is_released() {
                return Err(ScopeError::invalid_operation(
                    "the owning scope was disposed before this joined scope",
                ));
            }
            tracing::trace!(scope = %self.id, "save deferred to owning scope");
            return Ok(false);
        }

        if self.committed {
            return Err(ScopeError::invalid_operation(
                "save_changes already committed this scope",
            ));
        }

        self.state = ScopeState::Committing;
        Ok(true)
    }

    fn finish_save(&mut self, result: ScopeResult<usize>) -> ScopeResult<usize> {
        self.state = ScopeState::Active;
        match result {
            Ok(changes) => {
                self.committed = true;
                tracing::debug!(scope = %self.id, kind = %self.kind, changes, "scope committed");
                Ok(changes)
            }
            Err(err) => {
                tracing::debug!(scope = %self.id, error = %err, "scope commit failed");
                Err(err)
            }
        }
    }

    /// Reloads `id` in this scope's session for `key` from committed state.
    ///
    /// # Errors
    ///
    /// `EntityNotTracked` if the session does not track the entity.
    pub fn refresh(&self, key: &SessionKey, id: &EntityId) -> ScopeResult<()> {
        if self.try_refresh(key, id)? {
            Ok(())
        } else {
            Err(ScopeError::EntityNotTracked {
                key: key.clone(),
                entity: id.to_string(),
            })
        }
    }

    /// Like [`Scope::refresh`] but returns `false` for untracked entities.
    pub fn try_refresh(&self, key: &SessionKey, id: &EntityId) -> ScopeResult<bool> {
        self.ensure_not_disposed()?;
        self.store.refresh_existing(key, id)
    }

    /// Reloads entities in the sessions of the scope that was ambient when
    /// this one was created.
    ///
    /// Used after a forced-independent scope has committed changes to
    /// entities an enclosing, still open scope already loaded. Entities the
    /// parent does not track are skipped. Joined scopes share their parent's
    /// sessions, so for them this is a no-op.
    ///
    /// Returns the number of entities refreshed.
    pub fn refresh_parent(&self, key: &SessionKey, ids: &[EntityId]) -> ScopeResult<usize> {
        self.ensure_not_disposed()?;
        let Some(parent) = &self.parent_store else {
            return Ok(0);
        };

        let mut refreshed = 0;
        for id in ids {
            if parent.refresh_existing(key, id)? {
                refreshed += 1;
            }
        }
        tracing::debug!(scope = %self.id, %key, refreshed, "refreshed parent entities");
        Ok(refreshed)
    }

    /// Disposes the scope.
    ///
    /// Pops the scope off its ambient stack. An owning scope then discards
    /// any uncommitted writes and releases its sessions. Calling this again
    /// after success is a no-op.
    ///
    /// # Errors
    ///
    /// `ScopeNestingViolation` if another scope created after this one is
    /// still open. The scope stays undisposed so it can be disposed again
    /// once the inner scope is gone.
    pub fn dispose(&mut self) -> ScopeResult<()> {
        if self.state == ScopeState::Disposed {
            return Ok(());
        }
        self.context.pop(self.id)?;
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        if self.kind.owns_sessions() {
            if self.store.has_changes() {
                tracing::debug!(
                    scope = %self.id,
                    committed = self.committed,
                    "discarding uncommitted changes"
                );
            }
            self.store.discard_all();
            self.store.release();
        }
        self.state = ScopeState::Disposed;
        tracing::trace!(scope = %self.id, "scope disposed");
    }

    fn ensure_not_disposed(&self) -> ScopeResult<()> {
        if self.state == ScopeState::Disposed {
            Err(ScopeError::invalid_operation("scope already disposed"))
        } else {
            Ok(())
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.state == ScopeState::Disposed {
            return;
        }
        if let Err(err) = self.dispose() {
            tracing::error!(
                scope = %self.id,
                context = %self.context.id(),
                error = %err,
                "scope dropped out of nesting order"
            );
            self.context.remove(self.id);
            self.release();
            if self.strict_nesting && !std::thread::panicking() {
                panic!("{err}");
            }
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("kind", &self.kind)
            .field("read_only", &self.read_only)
            .field("store", &self.store.id())
            .field("state", &self.state)
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}
