//! Test environments.
//!
//! A [`TestEnv`] is a database plus a scope factory whose registry maps
//! [`USERS`] and [`AUDIT`] onto it.

use crate::domain::{audit_mapping, users_mapping, AuditEntry, User, AUDIT, USERS};
use scopedb_core::{EntityId, ScopeConfig, ScopeFactory, SessionRegistry};
use scopedb_store::{Config, Database, StorageBackend};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builds the registry of the sample domain over `db`.
pub fn registry_for(db: &Database) -> SessionRegistry {
    SessionRegistry::new()
        .register(USERS, db.session_factory(users_mapping()))
        .register(AUDIT, db.session_factory(audit_mapping()))
        .with_transactions(db.transaction_provider())
}

/// A database and a scope factory over it, with automatic cleanup.
pub struct TestEnv {
    /// The database.
    pub db: Database,
    /// Scope factory over [`TestEnv::db`].
    pub scopes: ScopeFactory,
    path: Option<PathBuf>,
    /// Kept alive so the directory outlives the database.
    _temp_dir: Option<TempDir>,
}

impl TestEnv {
    /// Creates an environment over an in-memory database.
    pub fn memory() -> Self {
        Self::memory_with(ScopeConfig::default())
    }

    /// Creates an in-memory environment with custom scope configuration.
    pub fn memory_with(config: ScopeConfig) -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        Self::assemble(db, config, None, None)
    }

    /// Creates an environment over a journal file in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("data").join("journal.sdb");
        let db = Database::open(&path).expect("Failed to open file database");
        Self::assemble(db, ScopeConfig::default(), Some(path), Some(temp_dir))
    }

    /// Creates an environment over an arbitrary storage backend.
    pub fn with_backend(backend: Box<dyn StorageBackend>) -> Self {
        let db = Database::open_with_backend(backend, Config::default())
            .expect("Failed to open database over backend");
        Self::assemble(db, ScopeConfig::default(), None, None)
    }

    fn assemble(
        db: Database,
        config: ScopeConfig,
        path: Option<PathBuf>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let scopes = ScopeFactory::with_config(registry_for(&db), config);
        Self {
            db,
            scopes,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the journal path if file-based.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the database and opens it again from its journal.
    ///
    /// Panics for in-memory environments.
    pub fn reopen(self) -> Self {
        let Self {
            db,
            scopes,
            path,
            _temp_dir,
        } = self;
        let config = *scopes.config();
        drop(scopes);
        drop(db);

        let path = path.expect("Only file environments can be reopened");
        let db = Database::open(&path).expect("Failed to reopen file database");
        Self::assemble(db, config, Some(path), _temp_dir)
    }

    /// Reads a committed user straight from the database.
    pub fn committed_user(&self, id: &EntityId) -> Option<User> {
        self.db.get_entity(id).expect("Failed to decode user")
    }

    /// Returns every committed user.
    pub fn committed_users(&self) -> Vec<User> {
        self.db.list_entities().expect("Failed to decode users")
    }

    /// Returns every committed audit entry.
    pub fn committed_audit(&self) -> Vec<AuditEntry> {
        self.db.list_entities().expect("Failed to decode audit entries")
    }
}

impl std::ops::Deref for TestEnv {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a fresh in-memory environment.
pub fn with_memory_env<F, R>(f: F) -> R
where
    F: FnOnce(&TestEnv) -> R,
{
    let env = TestEnv::memory();
    f(&env)
}
