//! Error types for scope management.

use crate::key::SessionKey;
use crate::session::SessionError;
use crate::types::ScopeId;
use thiserror::Error;

/// Result type for scope operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Errors raised by the scope manager.
///
/// Failures from the underlying session layer are carried unchanged in
/// [`ScopeError::Session`]; every other variant is an invariant check the
/// scope manager performs itself.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// A scope was popped while it was not the top of its ambient stack.
    ///
    /// Always a caller bug: scopes were disposed out of order.
    #[error("scope nesting violation: disposing {found} but the ambient top is {}", fmt_top(.expected))]
    ScopeNestingViolation {
        /// The scope currently on top of the stack, if any.
        expected: Option<ScopeId>,
        /// The scope that tried to pop itself.
        found: ScopeId,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The locator was used with no ambient scope in the calling context.
    #[error("no ambient scope in the current execution context")]
    NoAmbientScope,

    /// No session factory was registered for the key.
    #[error("unknown session key: {key}")]
    UnknownSessionKey {
        /// The unregistered key.
        key: SessionKey,
    },

    /// A session was requested as a concrete type it does not have.
    #[error("session {key} is not a {expected}")]
    SessionTypeMismatch {
        /// The session key.
        key: SessionKey,
        /// Name of the requested concrete type.
        expected: &'static str,
    },

    /// The session does not track the entity that was asked to refresh.
    #[error("entity {entity} is not tracked by session {key}")]
    EntityNotTracked {
        /// The session key.
        key: SessionKey,
        /// The entity, formatted.
        entity: String,
    },

    /// Several sessions need committing but no transaction provider exists.
    #[error("{sessions} sessions have changes but no ambient transaction provider is configured")]
    TransactionUnavailable {
        /// Number of sessions with pending changes.
        sessions: usize,
    },

    /// Error from the underlying session layer, passed through unchanged.
    #[error(transparent)]
    Session(SessionError),
}

fn fmt_top(top: &Option<ScopeId>) -> String {
    match top {
        Some(id) => id.to_string(),
        None => "empty".to_string(),
    }
}

impl ScopeError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an unknown session key error.
    pub fn unknown_session_key(key: &SessionKey) -> Self {
        Self::UnknownSessionKey { key: key.clone() }
    }

    /// Returns true if this is a nesting violation.
    #[must_use]
    pub fn is_nesting_violation(&self) -> bool {
        matches!(self, Self::ScopeNestingViolation { .. })
    }

    /// Returns true if this is an invalid operation.
    #[must_use]
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, Self::InvalidOperation { .. })
    }

    /// Returns the session-layer error as `E`, if that is what this wraps.
    #[must_use]
    pub fn session_error<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Session(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<SessionError> for ScopeError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn nesting_violation_display() {
        let err = ScopeError::ScopeNestingViolation {
            expected: Some(ScopeId(2)),
            found: ScopeId(1),
        };
        assert_eq!(
            err.to_string(),
            "scope nesting violation: disposing scope:1 but the ambient top is scope:2"
        );
        assert!(err.is_nesting_violation());
    }

    #[test]
    fn session_errors_pass_through_unchanged() {
        let inner = io::Error::new(io::ErrorKind::Other, "disk full");
        let err = ScopeError::from(SessionError::from(inner));
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(
            err.session_error::<io::Error>().map(io::Error::kind),
            Some(io::ErrorKind::Other)
        );
    }
}
