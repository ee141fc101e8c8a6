//! Scopes in async tasks.

use scopedb_core::ambient::{self, scope_async};
use scopedb_core::{AmbientLocator, ScopeKind};
use scopedb_store::StoreSession;
use scopedb_testkit::prelude::*;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scope_stays_ambient_across_awaits() {
    let env = TestEnv::memory();

    let user = scope_async(async {
        let mut scope = env.scopes.create().unwrap();
        let users = AmbientLocator.get_as::<StoreSession>(&USERS).unwrap();
        let user = User::new("Ada", "ada@example.com");
        users.insert(&user).unwrap();

        for _ in 0..10 {
            tokio::task::yield_now().await;
            assert_eq!(AmbientLocator.current_scope().unwrap().scope_id, scope.id());
        }

        assert_eq!(scope.save_changes_async().await.unwrap(), 1);
        user
    })
    .await;

    assert_eq!(env.committed_user(&user.id), Some(user));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spawned_tasks_do_not_share_scopes() {
    let env = Arc::new(TestEnv::memory());

    let mut handles = Vec::new();
    for n in 0..16 {
        let env = Arc::clone(&env);
        handles.push(ambient::spawn(async move {
            let mut scope = env.scopes.create().unwrap();
            assert_eq!(scope.kind(), ScopeKind::Root);
            assert_eq!(AmbientLocator.depth(), 1);

            let users = AmbientLocator.get_as::<StoreSession>(&USERS).unwrap();
            let audit = AmbientLocator.get_as::<StoreSession>(&AUDIT).unwrap();
            let user = User::new(format!("user-{n}"), format!("u{n}@example.com"));
            users.insert(&user).unwrap();
            tokio::task::yield_now().await;
            audit.insert(&AuditEntry::new(user.id, "created")).unwrap();

            scope.save_changes_async().await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 2);
    }
    assert_eq!(env.committed_users().len(), 16);
    assert_eq!(env.committed_audit().len(), 16);
}

#[tokio::test]
async fn sync_services_join_an_async_scope() {
    let env = TestEnv::memory();
    let service = UserService::new(env.scopes.clone());

    scope_async(async {
        let mut outer = env.scopes.create().unwrap();
        let ada = service.create_user("Ada", "ada@example.com").unwrap();
        tokio::task::yield_now().await;
        let bob = service.create_user("Bob", "bob@example.com").unwrap();

        assert!(env.committed_users().is_empty());
        assert_eq!(outer.save_changes_async().await.unwrap(), 4);
        assert!(env.committed_user(&ada.id).is_some());
        assert!(env.committed_user(&bob.id).is_some());
    })
    .await;
}

#[tokio::test]
async fn async_task_does_not_see_the_thread_scope() {
    let env = TestEnv::memory();
    let _thread_scope = env.scopes.create().unwrap();

    let depth = scope_async(async { AmbientLocator.depth() }).await;
    assert_eq!(depth, 0);
    assert_eq!(AmbientLocator.depth(), 1);
}

#[tokio::test]
async fn dropping_the_task_scope_discards_its_writes() {
    let env = TestEnv::memory();

    scope_async(async {
        let _scope = env.scopes.create().unwrap();
        let users = AmbientLocator.get_as::<StoreSession>(&USERS).unwrap();
        users.insert(&User::new("Ada", "ada@example.com")).unwrap();
        tokio::task::yield_now().await;
    })
    .await;

    assert!(env.committed_users().is_empty());
}

#[tokio::test]
async fn plain_spawned_tasks_do_not_join_each_other() {
    let env = Arc::new(TestEnv::memory());
    let (opened_tx, opened_rx) = tokio::sync::oneshot::channel();
    let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();

    let first = tokio::spawn({
        let env = Arc::clone(&env);
        async move {
            let mut scope = env.scopes.create().unwrap();
            assert_eq!(scope.kind(), ScopeKind::Root);
            let users = AmbientLocator.get_as::<StoreSession>(&USERS).unwrap();
            users.insert(&User::new("A", "a@example.com")).unwrap();
            let _ = opened_tx.send(());
            let _ = finish_rx.await;
            scope.save_changes_async().await.unwrap()
        }
    });
    opened_rx.await.unwrap();

    let second = tokio::spawn({
        let env = Arc::clone(&env);
        async move {
            let mut scope = env.scopes.create().unwrap();
            let kind = scope.kind();
            let users = AmbientLocator.get_as::<StoreSession>(&USERS).unwrap();
            users.insert(&User::new("B", "b@example.com")).unwrap();
            (kind, scope.save_changes().unwrap())
        }
    })
    .await
    .unwrap();
    assert_eq!(second, (ScopeKind::Root, 1));
    assert_eq!(env.committed_users().len(), 1);

    finish_tx.send(()).unwrap();
    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(env.committed_users().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn plain_spawned_task_keeps_its_scope_across_awaits() {
    let env = Arc::new(TestEnv::memory());

    let mut handles = Vec::new();
    for n in 0..8 {
        let env = Arc::clone(&env);
        handles.push(tokio::spawn(async move {
            let mut scope = env.scopes.create().unwrap();
            assert_eq!(scope.kind(), ScopeKind::Root);
            for _ in 0..10 {
                tokio::task::yield_now().await;
                assert_eq!(AmbientLocator.current_scope().unwrap().scope_id, scope.id());
                assert_eq!(AmbientLocator.depth(), 1);
            }
            let users = AmbientLocator.get_as::<StoreSession>(&USERS).unwrap();
            users
                .insert(&User::new(format!("user-{n}"), format!("u{n}@example.com")))
                .unwrap();
            scope.save_changes_async().await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 1);
    }
    assert_eq!(env.committed_users().len(), 8);
}
