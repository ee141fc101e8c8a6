//! # ScopeDB Testkit
//!
//! Test utilities for ScopeDB.
//!
//! This crate provides:
//! - Test environments wiring a database into a scope factory
//! - A small sample domain (users and their audit trail)
//! - Business services written purely against the ambient locator
//! - Fault-injecting storage for atomicity tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scopedb_testkit::prelude::*;
//!
//! #[test]
//! fn creates_a_user() {
//!     let env = TestEnv::memory();
//!     let service = UserService::new(env.scopes.clone());
//!     let user = service.create_user("Ada", "ada@example.com").unwrap();
//!     assert_eq!(env.committed_user(&user.id).unwrap().name, "Ada");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod domain;
pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod services;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::domain::*;
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::services::*;
}
