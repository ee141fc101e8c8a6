//! Which collections a session may touch.

use crate::entity::Entity;
use std::collections::BTreeSet;

/// The set of collections a session is mapped to.
///
/// Each registered session key gets its own mapping, so the "users" session
/// and the "audit" session of one scope stay separate even though they
/// write to the same database.
///
/// ```rust,ignore
/// let mapping = Mapping::new().entity::<User>().collection("user_tags");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    collections: BTreeSet<String>,
}

impl Mapping {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps the collection of entity type `T`.
    #[must_use]
    pub fn entity<T: Entity>(self) -> Self {
        self.collection(T::COLLECTION)
    }

    /// Maps a collection by name.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collections.insert(name.into());
        self
    }

    /// Returns true if `collection` is mapped.
    #[must_use]
    pub fn contains(&self, collection: &str) -> bool {
        self.collections.contains(collection)
    }

    /// Returns the mapped collection names.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(String::as_str)
    }
}
