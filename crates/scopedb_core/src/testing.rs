//! In-crate test doubles for the session collaborator.

use crate::entity::EntityId;
use crate::key::SessionKey;
use crate::registry::SessionRegistry;
use crate::session::{AmbientTransaction, Session, SessionError, TransactionProvider};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared counters observed by tests.
#[derive(Clone, Default)]
pub(crate) struct Probe {
    inner: Arc<ProbeInner>,
}

#[derive(Default)]
struct ProbeInner {
    created: AtomicUsize,
    persisted: AtomicUsize,
    transactions: AtomicUsize,
    fail: AtomicBool,
}

impl Probe {
    pub(crate) fn registry(&self, keys: &[SessionKey], transactions: bool) -> SessionRegistry {
        let mut registry = SessionRegistry::new();
        for key in keys {
            let probe = self.clone();
            registry = registry.register(
                key.clone(),
                move |_: &SessionKey| -> Result<Arc<dyn Session>, SessionError> {
                    probe.inner.created.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(MockSession::new(probe.clone())))
                },
            );
        }
        if transactions {
            registry = registry.with_transactions(MockTransactions(self.clone()));
        }
        registry
    }

    pub(crate) fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub(crate) fn persisted(&self) -> usize {
        self.inner.persisted.load(Ordering::SeqCst)
    }

    pub(crate) fn transactions_begun(&self) -> usize {
        self.inner.transactions.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_commits(&self, fail: bool) {
        self.inner.fail.store(fail, Ordering::SeqCst);
    }

    fn failing(&self) -> bool {
        self.inner.fail.load(Ordering::SeqCst)
    }
}

/// A session that counts staged writes instead of storing entities.
pub(crate) struct MockSession {
    probe: Probe,
    pending: Arc<AtomicUsize>,
    tracked: Mutex<HashSet<EntityId>>,
}

impl MockSession {
    fn new(probe: Probe) -> Self {
        Self {
            probe,
            pending: Arc::new(AtomicUsize::new(0)),
            tracked: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn stage(&self, writes: usize) {
        self.pending.fetch_add(writes, Ordering::SeqCst);
    }

    pub(crate) fn track(&self, id: EntityId) {
        self.tracked.lock().insert(id);
    }
}

impl Session for MockSession {
    fn has_changes(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    fn commit(&self) -> Result<usize, SessionError> {
        if self.probe.failing() {
            return Err("injected commit failure".into());
        }
        let written = self.pending.swap(0, Ordering::SeqCst);
        self.probe.inner.persisted.fetch_add(written, Ordering::SeqCst);
        Ok(written)
    }

    fn enlist(&self, transaction: &mut dyn AmbientTransaction) -> Result<(), SessionError> {
        let transaction = transaction
            .as_any_mut()
            .downcast_mut::<MockTransaction>()
            .ok_or("foreign transaction")?;
        transaction.enlisted.push(Arc::clone(&self.pending));
        Ok(())
    }

    fn discard(&self) {
        self.pending.store(0, Ordering::SeqCst);
    }

    fn refresh(&self, id: &EntityId) -> Result<bool, SessionError> {
        Ok(self.tracked.lock().contains(id))
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub(crate) struct MockTransactions(Probe);

impl TransactionProvider for MockTransactions {
    fn begin(&self) -> Result<Box<dyn AmbientTransaction>, SessionError> {
        self.0.inner.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransaction {
            probe: self.0.clone(),
            enlisted: Vec::new(),
        }))
    }
}

struct MockTransaction {
    probe: Probe,
    enlisted: Vec<Arc<AtomicUsize>>,
}

impl AmbientTransaction for MockTransaction {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn participants(&self) -> usize {
        self.enlisted.len()
    }

    fn commit(self: Box<Self>) -> Result<usize, SessionError> {
        if self.probe.failing() {
            return Err("injected transaction failure".into());
        }
        let total = self
            .enlisted
            .iter()
            .map(|pending| pending.swap(0, Ordering::SeqCst))
            .sum();
        self.probe.inner.persisted.fetch_add(total, Ordering::SeqCst);
        Ok(total)
    }

    fn rollback(self: Box<Self>) {}
}
