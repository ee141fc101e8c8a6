//! Forced-independent scopes and refreshing the enclosing scope.

use scopedb_core::{AmbientLocator, ScopeKind};
use scopedb_store::StoreSession;
use scopedb_testkit::prelude::*;

#[test]
fn independent_commit_survives_a_failed_outer_scope() {
    let env = TestEnv::memory();
    let service = UserService::new(env.scopes.clone());
    let ada = service.create_user("Ada", "ada@example.com").unwrap();

    {
        let _outer = env.scopes.create().unwrap();
        service.update_credit_score(&ada.id, 640).unwrap();
        service.mark_welcome_email_sent(&ada.id).unwrap();

        // visible to a fresh root scope while the outer one is still open
        let seen = std::thread::scope(|s| {
            s.spawn(|| service.get_user(&ada.id).unwrap())
                .join()
                .unwrap()
        });
        assert!(seen.welcome_email_sent);
        // outer dropped without saving
    }

    let stored = env.committed_user(&ada.id).unwrap();
    assert!(stored.welcome_email_sent);
    assert_eq!(stored.credit_score, 0);
}

#[test]
fn refreshed_parent_commits_on_top_of_the_independent_write() {
    init_tracing();
    let env = TestEnv::memory();
    let service = UserService::new(env.scopes.clone());
    let ada = service.create_user("Ada", "ada@example.com").unwrap();

    let mut outer = env.scopes.create().unwrap();
    let loaded = service.get_user(&ada.id).unwrap();
    assert!(!loaded.welcome_email_sent);

    service.mark_welcome_email_sent(&ada.id).unwrap();
    let updated = service.update_credit_score(&ada.id, 720).unwrap();
    assert!(updated.welcome_email_sent);

    outer.save_changes().unwrap();
    let stored = env.committed_user(&ada.id).unwrap();
    assert!(stored.welcome_email_sent);
    assert_eq!(stored.credit_score, 720);
}

#[test]
fn stale_parent_conflicts_without_refresh() {
    let env = TestEnv::memory();
    let service = UserService::new(env.scopes.clone());
    let ada = service.create_user("Ada", "ada@example.com").unwrap();

    let mut outer = env.scopes.create().unwrap();
    service.get_user(&ada.id).unwrap();

    service.mark_welcome_email_sent_without_refresh(&ada.id).unwrap();
    let updated = service.update_credit_score(&ada.id, 720).unwrap();
    // the parent still sees its stale copy
    assert!(!updated.welcome_email_sent);

    let err: ServiceError = outer.save_changes().unwrap_err().into();
    assert!(err.is_conflict());

    let stored = env.committed_user(&ada.id).unwrap();
    assert!(stored.welcome_email_sent);
    assert_eq!(stored.credit_score, 0);
}

#[test]
fn independent_scope_does_not_see_parent_writes() {
    let env = TestEnv::memory();
    let _outer = env.scopes.create().unwrap();
    let outer_users = AmbientLocator.get_as::<StoreSession>(&USERS).unwrap();
    let ada = User::new("Ada", "ada@example.com");
    outer_users.insert(&ada).unwrap();

    let independent = env.scopes.create_forced_independent().unwrap();
    assert_eq!(independent.kind(), ScopeKind::Independent);
    let own_users = AmbientLocator.get_as::<StoreSession>(&USERS).unwrap();
    assert!(!std::sync::Arc::ptr_eq(&outer_users, &own_users));
    assert!(own_users.find::<User>(&ada.id).unwrap().is_none());
}

#[test]
fn create_under_independent_scope_does_not_reach_through() {
    let env = TestEnv::memory();
    let outer = env.scopes.create().unwrap();
    let independent = env.scopes.create_forced_independent().unwrap();

    let mut inner = env.scopes.create().unwrap();
    assert_eq!(inner.kind(), ScopeKind::Root);
    assert_ne!(inner.store_id(), independent.store_id());
    assert_ne!(inner.store_id(), outer.store_id());

    let users = AmbientLocator.get_as::<StoreSession>(&USERS).unwrap();
    let ada = User::new("Ada", "ada@example.com");
    users.insert(&ada).unwrap();
    assert_eq!(inner.save_changes().unwrap(), 1);
    assert!(env.committed_user(&ada.id).is_some());
}

#[test]
fn refresh_parent_skips_untracked_entities() {
    let env = TestEnv::memory();
    let service = UserService::new(env.scopes.clone());
    let ada = service.create_user("Ada", "ada@example.com").unwrap();

    let _outer = env.scopes.create().unwrap();
    // the outer scope never loaded the user
    let independent = env.scopes.create_forced_independent().unwrap();
    assert_eq!(independent.refresh_parent(&USERS, &[ada.id]).unwrap(), 0);
}

#[test]
fn refresh_parent_at_top_level_is_a_no_op() {
    let env = TestEnv::memory();
    let independent = env.scopes.create_forced_independent().unwrap();
    assert_eq!(
        independent.refresh_parent(&USERS, &[scopedb_core::EntityId::new()]).unwrap(),
        0
    );
}

#[test]
fn refresh_drops_pending_writes_of_the_entity() {
    let env = TestEnv::memory();
    let service = UserService::new(env.scopes.clone());
    let ada = service.create_user("Ada", "ada@example.com").unwrap();

    let scope = env.scopes.create().unwrap();
    let users = AmbientLocator.get_as::<StoreSession>(&USERS).unwrap();
    let mut renamed = users.find::<User>(&ada.id).unwrap().unwrap();
    renamed.name = "Ada L.".into();
    users.update(&renamed).unwrap();

    scope.refresh(&USERS, &ada.id).unwrap();
    assert_eq!(users.pending_count(), 0);
    assert_eq!(users.find::<User>(&ada.id).unwrap().unwrap().name, "Ada");
}
