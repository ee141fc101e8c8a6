//! Core type definitions for scope management.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a scope.
///
/// Scope IDs are process-wide, monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub u64);

impl ScopeId {
    /// Allocates the next scope ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope:{}", self.0)
    }
}

/// Identifier for a logical execution context (a thread or an async task chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u64);

impl ContextId {
    /// Allocates the next context ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}

/// Identifier for a session store.
///
/// Joined scopes report the ID of the store they share with their owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(pub u64);

impl StoreId {
    /// Allocates the next store ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store:{}", self.0)
    }
}

/// How a scope relates to the ambient scope it was created under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Owns a fresh session store because no joinable scope was ambient.
    Root,
    /// Shares its parent's session store and never commits.
    Joined,
    /// Owns a fresh session store regardless of ambient state and acts as a
    /// barrier: nothing created above it can join it.
    Independent,
}

impl ScopeKind {
    /// Returns true if scopes of this kind own (and commit) their sessions.
    #[must_use]
    pub const fn owns_sessions(self) -> bool {
        !matches!(self, Self::Joined)
    }

    /// Returns true if a later `create()` may join a scope of this kind.
    #[must_use]
    pub const fn is_joinable(self) -> bool {
        !matches!(self, Self::Independent)
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Root => "root",
            Self::Joined => "joined",
            Self::Independent => "independent",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a scope.
///
/// `Created → Active → (Committing) → Disposed`. Only owning, writable
/// scopes ever pass through `Committing`. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Constructed but not yet pushed onto the ambient stack.
    Created,
    /// Ambient and usable.
    Active,
    /// Committing owned sessions.
    Committing,
    /// Popped and released.
    Disposed,
}
