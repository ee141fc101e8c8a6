//! Configuration-time registration of session types.

use crate::error::{ScopeError, ScopeResult};
use crate::key::SessionKey;
use crate::session::{Session, SessionFactory, TransactionProvider};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The set of session types a scope may hand out, and the collaborator that
/// promotes multi-session commits to one transaction.
///
/// Built once at setup and shared read-only by every session store.
///
/// ```ignore
/// let registry = SessionRegistry::new()
///     .register(USERS, db.session_factory(Mapping::new().collection("users")))
///     .register(AUDIT, db.session_factory(Mapping::new().collection("audit")))
///     .with_transactions(db.transaction_provider());
/// ```
#[derive(Default)]
pub struct SessionRegistry {
    factories: BTreeMap<SessionKey, Arc<dyn SessionFactory>>,
    transactions: Option<Arc<dyn TransactionProvider>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the factory for `key`, replacing any earlier registration.
    #[must_use]
    pub fn register(mut self, key: impl Into<SessionKey>, factory: impl SessionFactory) -> Self {
        let key = key.into();
        if self.factories.insert(key.clone(), Arc::new(factory)).is_some() {
            tracing::debug!(%key, "replaced session factory");
        }
        self
    }

    /// Installs the ambient transaction provider.
    #[must_use]
    pub fn with_transactions(mut self, provider: impl TransactionProvider) -> Self {
        self.transactions = Some(Arc::new(provider));
        self
    }

    /// Returns true if `key` is registered.
    #[must_use]
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.factories.contains_key(key)
    }

    /// Returns the registered keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &SessionKey> {
        self.factories.keys()
    }

    /// Returns the transaction provider, if one is installed.
    #[must_use]
    pub fn transactions(&self) -> Option<&Arc<dyn TransactionProvider>> {
        self.transactions.as_ref()
    }

    /// Creates a new session for `key`.
    pub(crate) fn create_session(&self, key: &SessionKey) -> ScopeResult<Arc<dyn Session>> {
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| ScopeError::unknown_session_key(key))?;
        Ok(factory.create_session(key)?)
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("keys", &self.factories.keys().collect::<Vec<_>>())
            .field("transactions", &self.transactions.is_some())
            .finish()
    }
}
