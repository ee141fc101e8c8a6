//! Business services written against the ambient locator.
//!
//! None of these methods take a session argument. Each opens a scope and
//! reaches its sessions through [`AmbientLocator`], so the same method
//! commits on its own when called at top level and folds into the caller's
//! unit of work when called inside an open scope.

use crate::domain::{AuditEntry, User, AUDIT, USERS};
use scopedb_core::{AmbientLocator, EntityId, ScopeError, ScopeFactory};
use scopedb_store::{StoreError, StoreSession};
use thiserror::Error;

/// Result type for service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors raised by the sample services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Scope management failed.
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// A session operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The email address is not plausible.
    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    /// No user with the ID exists.
    #[error("user {0} not found")]
    UserNotFound(EntityId),
}

impl ServiceError {
    /// Returns true if the error is an optimistic-concurrency conflict,
    /// wherever in the stack it was raised.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Store(e) => e.is_conflict(),
            Self::Scope(ScopeError::Session(e)) => {
                e.downcast_ref::<StoreError>().is_some_and(StoreError::is_conflict)
            }
            _ => false,
        }
    }
}

/// User management over the ambient scope.
#[derive(Debug, Clone)]
pub struct UserService {
    scopes: ScopeFactory,
}

impl UserService {
    /// Creates a service acquiring scopes from `scopes`.
    pub fn new(scopes: ScopeFactory) -> Self {
        Self { scopes }
    }

    /// Creates a user and records it in the audit trail.
    pub fn create_user(&self, name: &str, email: &str) -> ServiceResult<User> {
        if !email.contains('@') {
            return Err(ServiceError::InvalidEmail(email.to_string()));
        }

        let mut scope = self.scopes.create()?;
        let users = AmbientLocator.get_as::<StoreSession>(&USERS)?;
        let audit = AmbientLocator.get_as::<StoreSession>(&AUDIT)?;

        let user = User::new(name, email);
        users.insert(&user)?;
        audit.insert(&AuditEntry::new(user.id, "created"))?;
        scope.save_changes()?;

        tracing::debug!(user = %user.id, joined = !scope.owns_sessions(), "user created");
        Ok(user)
    }

    /// Creates several users as one unit of work.
    ///
    /// Either every user is stored or, if any fails, none is.
    pub fn create_users(&self, people: &[(&str, &str)]) -> ServiceResult<Vec<User>> {
        let mut scope = self.scopes.create()?;
        let mut created = Vec::with_capacity(people.len());
        for (name, email) in people {
            created.push(self.create_user(name, email)?);
        }
        scope.save_changes()?;
        Ok(created)
    }

    /// Loads a user.
    pub fn get_user(&self, id: &EntityId) -> ServiceResult<User> {
        let _scope = self.scopes.create_read_only()?;
        let users = AmbientLocator.get_as::<StoreSession>(&USERS)?;
        users
            .find::<User>(id)?
            .ok_or(ServiceError::UserNotFound(*id))
    }

    /// Lists every user visible to the ambient unit of work.
    pub fn list_users(&self) -> ServiceResult<Vec<User>> {
        let _scope = self.scopes.create_read_only()?;
        let users = AmbientLocator.get_as::<StoreSession>(&USERS)?;
        Ok(users.list::<User>()?)
    }

    /// Sets a user's credit score.
    pub fn update_credit_score(&self, id: &EntityId, score: u32) -> ServiceResult<User> {
        let mut scope = self.scopes.create()?;
        let users = AmbientLocator.get_as::<StoreSession>(&USERS)?;
        let audit = AmbientLocator.get_as::<StoreSession>(&AUDIT)?;

        let mut user = users
            .find::<User>(id)?
            .ok_or(ServiceError::UserNotFound(*id))?;
        user.credit_score = score;
        users.update(&user)?;
        audit.insert(&AuditEntry::new(user.id, format!("credit score {score}")))?;
        scope.save_changes()?;
        Ok(user)
    }

    /// Records that the welcome email went out.
    ///
    /// The flag is committed in a forced-independent scope so it persists
    /// even if the caller's unit of work later fails: the email was sent
    /// either way. The caller's copy of the user is refreshed afterwards so
    /// its own later writes do not conflict with this one.
    pub fn mark_welcome_email_sent(&self, id: &EntityId) -> ServiceResult<()> {
        let mut scope = self.scopes.create_forced_independent()?;
        let users = AmbientLocator.get_as::<StoreSession>(&USERS)?;

        let mut user = users
            .find::<User>(id)?
            .ok_or(ServiceError::UserNotFound(*id))?;
        user.welcome_email_sent = true;
        users.update(&user)?;
        scope.save_changes()?;

        let refreshed = scope.refresh_parent(&USERS, &[*id])?;
        tracing::debug!(user = %id, refreshed, "welcome email recorded");
        Ok(())
    }

    /// Same as [`UserService::mark_welcome_email_sent`] without the
    /// parent refresh, which leaves an enclosing scope holding a stale
    /// copy of the user.
    pub fn mark_welcome_email_sent_without_refresh(&self, id: &EntityId) -> ServiceResult<()> {
        let mut scope = self.scopes.create_forced_independent()?;
        let users = AmbientLocator.get_as::<StoreSession>(&USERS)?;

        let mut user = users
            .find::<User>(id)?
            .ok_or(ServiceError::UserNotFound(*id))?;
        user.welcome_email_sent = true;
        users.update(&user)?;
        scope.save_changes()?;
        Ok(())
    }

    /// Removes a user and audits the removal.
    pub fn delete_user(&self, id: &EntityId) -> ServiceResult<()> {
        let mut scope = self.scopes.create()?;
        let users = AmbientLocator.get_as::<StoreSession>(&USERS)?;
        let audit = AmbientLocator.get_as::<StoreSession>(&AUDIT)?;

        users.remove::<User>(id).map_err(|e| match e {
            StoreError::EntityNotFound { .. } => ServiceError::UserNotFound(*id),
            other => other.into(),
        })?;
        audit.insert(&AuditEntry::new(*id, "deleted"))?;
        scope.save_changes()?;
        Ok(())
    }
}
