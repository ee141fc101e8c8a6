//! Contracts for the underlying session collaborator.
//!
//! The scope manager never builds sessions or talks to storage itself. It
//! orchestrates *when* sessions are created, shared and finalized, and
//! delegates everything else to implementations of these traits.

use crate::entity::EntityId;
use crate::key::SessionKey;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

/// Error type produced by session collaborators.
///
/// Kept boxed so the scope manager can pass collaborator failures through
/// without translating them. Callers recover the concrete type with
/// [`crate::ScopeError::session_error`].
pub type SessionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One unit-of-work handle onto a persistence store.
///
/// Implementations buffer changes and persist them on [`Session::commit`].
/// A session is owned by exactly one session store; joined scopes only see a
/// shared reference to it.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Returns true if the session holds buffered writes.
    fn has_changes(&self) -> bool;

    /// Persists all buffered writes atomically and returns how many
    /// changes were written.
    fn commit(&self) -> Result<usize, SessionError>;

    /// Async variant of [`Session::commit`] with identical semantics.
    ///
    /// The default runs the blocking commit inline; stores doing real I/O
    /// should override it.
    async fn commit_async(&self) -> Result<usize, SessionError> {
        self.commit()
    }

    /// Hands the buffered writes to an ambient transaction.
    ///
    /// The session must not persist anything itself; the transaction commits
    /// all enlisted sessions as one unit and reports back to them.
    fn enlist(&self, transaction: &mut dyn AmbientTransaction) -> Result<(), SessionError>;

    /// Drops all buffered writes.
    fn discard(&self);

    /// Reloads a tracked entity from committed state.
    ///
    /// Returns `Ok(false)` if the session does not track the entity.
    fn refresh(&self, id: &EntityId) -> Result<bool, SessionError>;

    /// Converts the session into `Any` for typed access.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Creates sessions for registered keys.
pub trait SessionFactory: Send + Sync + 'static {
    /// Creates a fresh session for `key`.
    fn create_session(&self, key: &SessionKey) -> Result<Arc<dyn Session>, SessionError>;
}

impl<F> SessionFactory for F
where
    F: Fn(&SessionKey) -> Result<Arc<dyn Session>, SessionError> + Send + Sync + 'static,
{
    fn create_session(&self, key: &SessionKey) -> Result<Arc<dyn Session>, SessionError> {
        self(key)
    }
}

/// A transaction spanning several sessions.
///
/// Used when one owning scope must commit more than one session. Either
/// every enlisted session's writes become visible, or none do.
#[async_trait]
pub trait AmbientTransaction: Send {
    /// Exposes the concrete transaction so a session can verify it belongs
    /// to the same store before enlisting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Returns the number of enlisted sessions.
    fn participants(&self) -> usize;

    /// Commits all enlisted writes as one unit.
    fn commit(self: Box<Self>) -> Result<usize, SessionError>;

    /// Async variant of [`AmbientTransaction::commit`].
    async fn commit_async(self: Box<Self>) -> Result<usize, SessionError> {
        self.commit()
    }

    /// Abandons the transaction. Enlisted sessions keep their buffered writes.
    fn rollback(self: Box<Self>);
}

/// Begins ambient transactions.
pub trait TransactionProvider: Send + Sync + 'static {
    /// Begins a new, empty transaction.
    fn begin(&self) -> Result<Box<dyn AmbientTransaction>, SessionError>;
}
