//! # ScopeDB Core
//!
//! Ambient unit-of-work scopes for database sessions.
//!
//! Business code opens a [`Scope`] through a [`ScopeFactory`] and reaches
//! the sessions of the nearest open scope through [`AmbientLocator`]
//! instead of passing them around. Nested scopes join their parent and
//! share its sessions; only the outermost owning scope commits. A
//! forced-independent scope owns fresh sessions and commits on its own.
//!
//! ## Design Principles
//!
//! - One ambient stack per logical execution context (thread or async task)
//! - Strict LIFO disposal; violations are reported, never silently ignored
//! - Sessions are created lazily, once per key per owning scope
//! - Changes from several sessions commit atomically or not at all
//! - The crate knows nothing about storage; sessions plug in via [`Session`]
//!
//! ## Example
//!
//! ```ignore
//! use scopedb_core::{AmbientLocator, ScopeFactory, SessionKey, SessionRegistry};
//!
//! const USERS: SessionKey = SessionKey::from_static("users");
//!
//! let factory = ScopeFactory::new(
//!     SessionRegistry::new().register(USERS, database.session_factory(mapping)),
//! );
//!
//! let mut scope = factory.create()?;
//! let users = AmbientLocator.get_as::<StoreSession>(&USERS)?;
//! users.insert(&user)?;
//! scope.save_changes()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ambient;
mod config;
mod entity;
mod error;
mod factory;
mod key;
mod locator;
mod registry;
mod scope;
mod session;
mod store;
mod types;

#[cfg(test)]
mod testing;

pub use ambient::{AmbientContext, Frame};
pub use config::ScopeConfig;
pub use entity::EntityId;
pub use error::{ScopeError, ScopeResult};
pub use factory::{ScopeFactory, ScopeMode, ScopeOptions};
pub use key::SessionKey;
pub use locator::{AmbientLocator, ScopeInfo};
pub use registry::SessionRegistry;
pub use scope::Scope;
pub use session::{AmbientTransaction, Session, SessionError, SessionFactory, TransactionProvider};
pub use store::SessionStore;
pub use types::{ContextId, ScopeId, ScopeKind, ScopeState, StoreId};
