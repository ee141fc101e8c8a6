//! Entities and their CBOR encoding.

use crate::error::{StoreError, StoreResult};
use scopedb_core::EntityId;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A value stored in a collection.
///
/// ```rust
/// use scopedb_core::EntityId;
/// use scopedb_store::Entity;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Note {
///     id: EntityId,
///     text: String,
/// }
///
/// impl Entity for Note {
///     const COLLECTION: &'static str = "notes";
///
///     fn id(&self) -> EntityId {
///         self.id
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name of the collection holding entities of this type.
    const COLLECTION: &'static str;

    /// Returns the entity's identifier.
    fn id(&self) -> EntityId;
}

/// Encodes a value as CBOR.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}
