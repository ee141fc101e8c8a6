//! Scope factory: decides whether a new scope joins, roots, or stands alone.

use crate::ambient::{self, AmbientContext, Frame};
use crate::config::ScopeConfig;
use crate::error::{ScopeError, ScopeResult};
use crate::registry::SessionRegistry;
use crate::scope::Scope;
use crate::store::SessionStore;
use crate::types::ScopeKind;
use std::sync::Arc;

/// How a new scope relates to the ambient one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeMode {
    /// Join the ambient scope if it is joinable, otherwise become a root.
    #[default]
    JoinExisting,
    /// Always own fresh sessions and commit independently, and block later
    /// scopes from joining anything beneath.
    ForceIndependent,
}

/// Options for [`ScopeFactory::create_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeOptions {
    /// Joining behaviour.
    pub mode: ScopeMode,
    /// Whether `save_changes` is forbidden.
    pub read_only: bool,
}

impl ScopeOptions {
    /// Options for a normal writable scope.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: ScopeMode::JoinExisting,
            read_only: false,
        }
    }

    /// Sets the joining behaviour.
    #[must_use]
    pub const fn mode(mut self, mode: ScopeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets whether the scope is read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }
}

/// Entry point for acquiring scopes.
///
/// Cheap to clone; clones share the session registry.
#[derive(Debug, Clone)]
pub struct ScopeFactory {
    registry: Arc<SessionRegistry>,
    config: ScopeConfig,
}

impl ScopeFactory {
    /// Creates a factory with the default configuration.
    #[must_use]
    pub fn new(registry: SessionRegistry) -> Self {
        Self::with_config(registry, ScopeConfig::default())
    }

    /// Creates a factory with custom configuration.
    #[must_use]
    pub fn with_config(registry: SessionRegistry, config: ScopeConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    /// Returns the session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Creates a writable scope that joins the ambient scope if possible.
    ///
    /// If the ambient top is joinable the new scope shares its sessions and
    /// defers commit to the owner. Otherwise it roots a fresh set of
    /// sessions and owns their commit.
    pub fn create(&self) -> ScopeResult<Scope> {
        self.create_with(ScopeOptions::new())
    }

    /// Creates a read-only scope with the same joining rules as `create`.
    ///
    /// `save_changes` on the returned scope fails with `InvalidOperation`.
    pub fn create_read_only(&self) -> ScopeResult<Scope> {
        self.create_with(ScopeOptions::new().read_only(true))
    }

    /// Creates a scope that owns fresh sessions regardless of ambient state.
    ///
    /// Its commit is independent of any enclosing scope, and scopes created
    /// while it is ambient never join anything beneath it.
    pub fn create_forced_independent(&self) -> ScopeResult<Scope> {
        self.create_with(ScopeOptions::new().mode(ScopeMode::ForceIndependent))
    }

    /// Creates a scope with explicit options on the caller's ambient context.
    pub fn create_with(&self, options: ScopeOptions) -> ScopeResult<Scope> {
        self.create_in(ambient::current(), options)
    }

    /// Creates a scope on an explicitly supplied ambient context.
    pub fn create_in(
        &self,
        context: Arc<AmbientContext>,
        options: ScopeOptions,
    ) -> ScopeResult<Scope> {
        let top = context.peek();
        let join_target = match options.mode {
            ScopeMode::JoinExisting => top.as_ref().filter(|f| f.kind.is_joinable()),
            ScopeMode::ForceIndependent => None,
        };

        let (kind, store) = match join_target {
            Some(parent) => {
                self.check_join(parent, options.read_only)?;
                (ScopeKind::Joined, Arc::clone(&parent.store))
            }
            None => {
                let kind = match options.mode {
                    ScopeMode::JoinExisting => ScopeKind::Root,
                    ScopeMode::ForceIndependent => ScopeKind::Independent,
                };
                let store = Arc::new(SessionStore::new(Arc::clone(&self.registry)));
                (kind, store)
            }
        };

        Ok(Scope::enter(
            context,
            top,
            kind,
            options.read_only,
            store,
            self.config.strict_nesting,
        ))
    }

    fn check_join(&self, parent: &Frame, read_only: bool) -> ScopeResult<()> {
        if parent.read_only && !read_only {
            if !self.config.allow_writable_join_under_read_only {
                return Err(ScopeError::invalid_operation(format!(
                    "cannot join read-only {} with a writable scope",
                    parent.scope_id
                )));
            }
            tracing::debug!(parent = %parent.scope_id, "writable scope joined read-only scope");
        }
        Ok(())
    }
}
