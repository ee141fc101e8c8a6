//! Sample domain used throughout the tests.

use scopedb_core::{EntityId, SessionKey};
use scopedb_store::{Entity, Mapping};
use serde::{Deserialize, Serialize};

/// Session key of the users session.
pub const USERS: SessionKey = SessionKey::from_static("users");

/// Session key of the audit session.
pub const AUDIT: SessionKey = SessionKey::from_static("audit");

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identifier.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Contact address.
    pub email: String,
    /// Credit score, 0 until assessed.
    pub credit_score: u32,
    /// Whether the welcome email went out.
    pub welcome_email_sent: bool,
}

impl User {
    /// Creates a user with a fresh ID.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            email: email.into(),
            credit_score: 0,
            welcome_email_sent: false,
        }
    }
}

impl Entity for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> EntityId {
        self.id
    }
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Identifier.
    pub id: EntityId,
    /// User the action was about.
    pub user: EntityId,
    /// What happened.
    pub action: String,
}

impl AuditEntry {
    /// Creates an entry with a fresh ID.
    pub fn new(user: EntityId, action: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            user,
            action: action.into(),
        }
    }
}

impl Entity for AuditEntry {
    const COLLECTION: &'static str = "audit";

    fn id(&self) -> EntityId {
        self.id
    }
}

/// Mapping of the users session.
pub fn users_mapping() -> Mapping {
    Mapping::new().entity::<User>()
}

/// Mapping of the audit session.
pub fn audit_mapping() -> Mapping {
    Mapping::new().entity::<AuditEntry>()
}
