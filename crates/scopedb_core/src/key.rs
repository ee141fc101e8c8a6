//! Session-type identity.

use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;

/// Identifies a kind of database session (one mapping onto the store).
///
/// A session store holds at most one session per key. Keys are plain tags:
/// either a chosen name or a Rust type standing in for the session type.
/// Type keys compare by [`TypeId`], never equal a named key, and use the
/// type name only for display.
///
/// ```
/// use scopedb_core::SessionKey;
///
/// const USERS: SessionKey = SessionKey::from_static("users");
/// struct BillingSession;
///
/// assert_eq!(USERS.as_str(), "users");
/// assert!(SessionKey::of::<BillingSession>().as_str().ends_with("BillingSession"));
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey(Tag);

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Tag {
    Named(Cow<'static, str>),
    // the name is derived from the id, so comparing it changes nothing
    Typed(TypeId, &'static str),
}

impl SessionKey {
    /// Creates a key from a static name. Usable in `const` items.
    #[must_use]
    pub const fn from_static(name: &'static str) -> Self {
        Self(Tag::Named(Cow::Borrowed(name)))
    }

    /// Creates a key from an owned or borrowed name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Tag::Named(Cow::Owned(name.into())))
    }

    /// Creates a key identified by the type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(Tag::Typed(TypeId::of::<T>(), std::any::type_name::<T>()))
    }

    /// Returns the key name. For type keys this is the type name, which is
    /// for diagnostics only.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match &self.0 {
            Tag::Named(name) => name,
            Tag::Typed(_, name) => name,
        }
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.as_str())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for SessionKey {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for SessionKey {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_and_owned_keys_compare_equal() {
        assert_eq!(SessionKey::from_static("users"), SessionKey::new("users"));
    }

    #[test]
    fn type_keys_differ_per_type() {
        struct A;
        struct B;
        assert_ne!(SessionKey::of::<A>(), SessionKey::of::<B>());
        assert_eq!(SessionKey::of::<A>(), SessionKey::of::<A>());
    }

    #[test]
    fn type_keys_never_equal_named_keys() {
        struct A;
        let typed = SessionKey::of::<A>();
        assert_ne!(typed, SessionKey::new(typed.as_str()));
    }

    #[test]
    fn same_named_types_in_different_modules_differ() {
        mod first {
            pub struct Session;
        }
        mod second {
            pub struct Session;
        }
        assert_ne!(
            SessionKey::of::<first::Session>(),
            SessionKey::of::<second::Session>()
        );
    }

    #[test]
    fn display_is_the_name() {
        assert_eq!(SessionKey::from("audit").to_string(), "audit");
    }
}
