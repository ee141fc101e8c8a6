//! Scope manager configuration.

/// Configuration for a [`crate::ScopeFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeConfig {
    /// Whether a writable scope may join a read-only ambient scope.
    ///
    /// When false (the default) such a request fails with
    /// `InvalidOperation` at creation time. When true the writable scope
    /// joins like any other; its `save_changes` is a no-op and the
    /// read-only owner never commits.
    pub allow_writable_join_under_read_only: bool,

    /// Whether a nesting violation found while dropping a scope panics.
    ///
    /// Explicit `dispose()` always returns the violation as an error. On
    /// drop it is logged and the stack is repaired; with this flag the drop
    /// also panics, unless the thread is already unwinding.
    pub strict_nesting: bool,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            allow_writable_join_under_read_only: false,
            strict_nesting: false,
        }
    }
}

impl ScopeConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether writable scopes may join read-only ones.
    #[must_use]
    pub const fn allow_writable_join_under_read_only(mut self, value: bool) -> Self {
        self.allow_writable_join_under_read_only = value;
        self
    }

    /// Sets whether drop-time nesting violations panic.
    #[must_use]
    pub const fn strict_nesting(mut self, value: bool) -> Self {
        self.strict_nesting = value;
        self
    }
}
