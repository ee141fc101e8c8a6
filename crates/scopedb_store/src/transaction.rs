//! Ambient transactions spanning several sessions of one database.

use crate::change::ChangeSet;
use crate::database::Database;
use crate::error::{StoreError, StoreResult};
use crate::session::SessionInner;
use async_trait::async_trait;
use scopedb_core::{AmbientTransaction, SessionError, TransactionProvider};
use std::any::Any;
use std::sync::Arc;

/// Begins [`StoreTransaction`]s on one database.
///
/// Returned by [`Database::transaction_provider`]; register it with
/// `SessionRegistry::with_transactions`.
#[derive(Debug, Clone)]
pub struct StoreTransactions {
    database: Database,
}

impl StoreTransactions {
    pub(crate) fn new(database: Database) -> Self {
        Self { database }
    }
}

impl TransactionProvider for StoreTransactions {
    fn begin(&self) -> Result<Box<dyn AmbientTransaction>, SessionError> {
        Ok(Box::new(StoreTransaction {
            database: self.database.clone(),
            participants: Vec::new(),
            batches: Vec::new(),
        }))
    }
}

/// Collects the buffered writes of several sessions and commits them as
/// one journal record.
///
/// Sessions must not be changed between enlisting and commit.
pub struct StoreTransaction {
    database: Database,
    participants: Vec<Arc<SessionInner>>,
    batches: Vec<ChangeSet>,
}

impl StoreTransaction {
    pub(crate) fn enlist(&mut self, session: Arc<SessionInner>) -> StoreResult<()> {
        let session_db = session.database().id();
        if session_db != self.database.id() {
            return Err(StoreError::CrossDatabaseTransaction {
                transaction: self.database.id(),
                session: session_db,
            });
        }
        let changes = session.change_set();
        tracing::trace!(key = %session.key(), writes = changes.len(), "session enlisted");
        self.batches.push(changes);
        self.participants.push(session);
        Ok(())
    }

    fn commit_all(self) -> StoreResult<usize> {
        let seq = self.database.commit_batches(&self.batches)?;
        let mut total = 0;
        for (session, changes) in self.participants.iter().zip(&self.batches) {
            session.accept(changes, seq);
            total += changes.len();
        }
        tracing::debug!(
            db = %self.database.id(),
            participants = self.participants.len(),
            changes = total,
            %seq,
            "transaction committed"
        );
        Ok(total)
    }
}

#[async_trait]
impl AmbientTransaction for StoreTransaction {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn participants(&self) -> usize {
        self.participants.len()
    }

    fn commit(self: Box<Self>) -> Result<usize, SessionError> {
        Ok((*self).commit_all()?)
    }

    async fn commit_async(self: Box<Self>) -> Result<usize, SessionError> {
        let result = tokio::task::spawn_blocking(move || (*self).commit_all())
            .await
            .map_err(|e| StoreError::BackgroundTask(e.to_string()))?;
        Ok(result?)
    }

    fn rollback(self: Box<Self>) {
        tracing::debug!(
            db = %self.database.id(),
            participants = self.participants.len(),
            "transaction rolled back"
        );
    }
}
