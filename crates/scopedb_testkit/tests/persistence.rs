//! Committed scopes survive reopening the database.

use scopedb_store::{Config, Database, FileBackend, StoreError};
use scopedb_testkit::prelude::*;
use std::fs::OpenOptions;
use std::io::Write;

#[test]
fn committed_users_survive_reopen() {
    let env = TestEnv::file();
    let service = UserService::new(env.scopes.clone());
    let ada = service.create_user("Ada", "ada@example.com").unwrap();
    let bob = service.create_user("Bob", "bob@example.com").unwrap();
    service.update_credit_score(&bob.id, 610).unwrap();
    let seq = env.committed_seq();

    let env = env.reopen();
    assert_eq!(env.committed_seq(), seq);
    assert_eq!(env.committed_user(&ada.id), Some(ada));
    assert_eq!(env.committed_user(&bob.id).unwrap().credit_score, 610);
    assert_eq!(env.committed_audit().len(), 3);
}

#[test]
fn uncommitted_scope_leaves_no_trace_on_disk() {
    let env = TestEnv::file();
    let service = UserService::new(env.scopes.clone());
    {
        let _outer = env.scopes.create().unwrap();
        service.create_user("Ada", "ada@example.com").unwrap();
    }
    assert_eq!(env.journal_size().unwrap(), 0);

    let env = env.reopen();
    assert!(env.committed_users().is_empty());
}

#[test]
fn deletes_replay() {
    let env = TestEnv::file();
    let service = UserService::new(env.scopes.clone());
    let ada = service.create_user("Ada", "ada@example.com").unwrap();
    service.delete_user(&ada.id).unwrap();

    let env = env.reopen();
    assert!(env.committed_user(&ada.id).is_none());
    assert_eq!(env.committed_audit().len(), 2);
}

#[test]
fn torn_tail_from_a_crash_is_dropped_on_reopen() {
    let env = TestEnv::file();
    let service = UserService::new(env.scopes.clone());
    let ada = service.create_user("Ada", "ada@example.com").unwrap();
    let path = env.path().unwrap().to_path_buf();
    let intact = env.journal_size().unwrap();

    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"SDBJ\x40\x00").unwrap();
    }

    let env = env.reopen();
    assert_eq!(env.committed_user(&ada.id), Some(ada));
    assert_eq!(env.journal_size().unwrap(), intact);

    // the repaired journal accepts new commits
    let bob = service_for(&env).create_user("Bob", "bob@example.com").unwrap();
    let env = env.reopen();
    assert!(env.committed_user(&bob.id).is_some());
}

#[test]
fn corrupted_record_refuses_to_open() {
    let env = TestEnv::file();
    let service = UserService::new(env.scopes.clone());
    service.create_user("Ada", "ada@example.com").unwrap();
    let path = env.path().unwrap().to_path_buf();

    let mut bytes = std::fs::read(&path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let backend = FileBackend::open(&path).unwrap();
    let result = Database::open_with_backend(Box::new(backend), Config::default());
    assert!(matches!(
        result,
        Err(StoreError::JournalCorruption { .. })
    ));
}

fn service_for(env: &TestEnv) -> UserService {
    UserService::new(env.scopes.clone())
}
