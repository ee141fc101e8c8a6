//! Read-only access to the ambient scope's sessions.

use crate::ambient;
use crate::error::{ScopeError, ScopeResult};
use crate::key::SessionKey;
use crate::session::Session;
use crate::store::downcast_session;
use crate::types::{ScopeId, ScopeKind, StoreId};
use std::sync::Arc;

/// Describes the scope currently ambient in the caller's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeInfo {
    /// The scope ID.
    pub scope_id: ScopeId,
    /// How the scope relates to its parent.
    pub kind: ScopeKind,
    /// Whether the scope is read-only.
    pub read_only: bool,
    /// The session store the scope uses.
    pub store_id: StoreId,
}

/// Resolves sessions against the nearest ambient scope.
///
/// Repositories and business logic use the locator instead of receiving
/// sessions as parameters. Every call resolves against the top of the
/// caller's ambient stack at that moment; nothing is cached.
///
/// ```ignore
/// fn rename(id: EntityId, name: &str) -> Result<(), AppError> {
///     let users = AmbientLocator.get_as::<StoreSession>(&USERS)?;
///     let mut user: User = users.find(id)?.ok_or(AppError::NotFound)?;
///     user.name = name.into();
///     users.update(&user)?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientLocator;

impl AmbientLocator {
    /// Returns the ambient session for `key`.
    ///
    /// # Errors
    ///
    /// - `NoAmbientScope` if no scope is open in the calling context.
    /// - `UnknownSessionKey` if `key` was never registered.
    pub fn get(&self, key: &SessionKey) -> ScopeResult<Arc<dyn Session>> {
        let frame = ambient::current().peek().ok_or(ScopeError::NoAmbientScope)?;
        frame.store.get_or_create(key)
    }

    /// Returns the ambient session for `key` as its concrete type.
    pub fn get_as<S: Session>(&self, key: &SessionKey) -> ScopeResult<Arc<S>> {
        let session = self.get(key)?;
        downcast_session(key, session)
    }

    /// Describes the ambient scope, if any.
    #[must_use]
    pub fn current_scope(&self) -> Option<ScopeInfo> {
        ambient::current().peek().map(|frame| ScopeInfo {
            scope_id: frame.scope_id,
            kind: frame.kind,
            read_only: frame.read_only,
            store_id: frame.store.id(),
        })
    }

    /// Returns the depth of the caller's ambient stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        ambient::current().depth()
    }
}
