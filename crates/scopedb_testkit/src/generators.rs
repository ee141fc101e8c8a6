//! Property-based test generators using proptest.
//!
//! Besides plain data, [`scope_plan_strategy`] produces random trees of
//! nested scopes together with a model of what each tree should commit.

use crate::domain::User;
use proptest::prelude::*;
use scopedb_core::EntityId;

/// Strategy for generating entity IDs.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop::array::uniform16(any::<u8>()).prop_map(EntityId::from_bytes)
}

/// Strategy for generating display names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,11}").expect("Invalid regex")
}

/// Strategy for generating plausible email addresses.
pub fn email_strategy() -> impl Strategy<Value = String> {
    (
        prop::string::string_regex("[a-z][a-z0-9.]{0,15}").expect("Invalid regex"),
        prop::sample::select(vec!["example.com", "example.org", "test.dev"]),
    )
        .prop_map(|(local, domain)| format!("{local}@{domain}"))
}

/// Strategy for generating users.
pub fn user_strategy() -> impl Strategy<Value = User> {
    (
        entity_id_strategy(),
        name_strategy(),
        email_strategy(),
        0u32..=850,
        any::<bool>(),
    )
        .prop_map(|(id, name, email, credit_score, welcome_email_sent)| User {
            id,
            name,
            email,
            credit_score,
            welcome_email_sent,
        })
}

/// One scope in a randomly generated nesting tree.
///
/// Executing a plan opens the scope, inserts `inserts` users through the
/// ambient locator, runs the children in order, saves if `save` is set and
/// then disposes the scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePlan {
    /// Open with `create_forced_independent` instead of `create`.
    pub independent: bool,
    /// Users inserted before the children run.
    pub inserts: usize,
    /// Whether `save_changes` is called after the children ran.
    pub save: bool,
    /// Nested scopes.
    pub children: Vec<ScopePlan>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Enclosing {
    Nothing,
    Joinable,
    Independent,
}

impl ScopePlan {
    /// Number of users the plan is expected to leave committed.
    ///
    /// Writes land in the session of the nearest owning scope and persist
    /// only if that owner saves. A `create` directly beneath a
    /// forced-independent scope does not join it and owns its sessions.
    pub fn expected_commits(&self) -> usize {
        self.outcome(Enclosing::Nothing).1
    }

    /// Total number of users the plan inserts, saved or not.
    pub fn total_inserts(&self) -> usize {
        self.inserts + self.children.iter().map(Self::total_inserts).sum::<usize>()
    }

    /// Number of scopes in the tree.
    pub fn scope_count(&self) -> usize {
        1 + self.children.iter().map(Self::scope_count).sum::<usize>()
    }

    /// Returns (writes handed up to the enclosing owner, writes committed).
    fn outcome(&self, enclosing: Enclosing) -> (usize, usize) {
        let owns = self.independent || enclosing != Enclosing::Joinable;
        let below = if self.independent {
            Enclosing::Independent
        } else {
            Enclosing::Joinable
        };

        let mut pending = self.inserts;
        let mut committed = 0;
        for child in &self.children {
            let (up, done) = child.outcome(below);
            pending += up;
            committed += done;
        }

        if owns {
            if self.save {
                committed += pending;
            }
            (0, committed)
        } else {
            (pending, committed)
        }
    }
}

/// Strategy for generating scope trees up to four levels deep.
pub fn scope_plan_strategy() -> impl Strategy<Value = ScopePlan> {
    let leaf = (any::<bool>(), 0usize..3, any::<bool>()).prop_map(|(independent, inserts, save)| {
        ScopePlan {
            independent,
            inserts,
            save,
            children: Vec::new(),
        }
    });

    leaf.prop_recursive(4, 24, 3, |inner| {
        (
            any::<bool>(),
            0usize..3,
            any::<bool>(),
            prop::collection::vec(inner, 0..3),
        )
            .prop_map(|(independent, inserts, save, children)| ScopePlan {
                independent,
                inserts,
                save,
                children,
            })
    })
}
