use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use vellum_sync::{FileSyncStateStore, MemorySyncStateStore, SyncScope, SyncStateStore};
use vellum_types::{Guid, SyncStateRecord, Timestamp, Usn};

fn make_record(usn: i64) -> SyncStateRecord {
    SyncStateRecord {
        last_sync_usn: Usn::new(usn),
        last_sync_time: Timestamp::from_millis(1_700_000_000_000),
        full_sync_before: Timestamp::from_millis(0),
    }
}

// ── Scope paths ──────────────────────────────────────────────────

#[test]
fn account_scope_maps_to_a_stable_path() {
    assert_eq!(SyncScope::Account.relative_path(), PathBuf::from("account"));
    assert_eq!(SyncScope::Account.to_string(), "account");
}

#[test]
fn linked_scope_path_carries_the_guid() {
    let guid = Guid::new();
    let scope = SyncScope::LinkedNotebook(guid);

    assert_eq!(
        scope.relative_path(),
        Path::new("linked").join(guid.to_string())
    );
    assert!(scope.to_string().contains(&guid.to_string()));
}

// ── MemorySyncStateStore ─────────────────────────────────────────

#[tokio::test]
async fn missing_scope_reads_none() {
    let store = MemorySyncStateStore::new();
    assert!(store.get(&SyncScope::Account).await.unwrap().is_none());
}

#[tokio::test]
async fn put_then_get_round_trips() {
    let store = MemorySyncStateStore::new();
    store.put(&SyncScope::Account, make_record(42)).await.unwrap();

    let record = store.get(&SyncScope::Account).await.unwrap().unwrap();
    assert_eq!(record, make_record(42));
}

#[tokio::test]
async fn scopes_are_isolated() {
    let store = MemorySyncStateStore::new();
    let first = SyncScope::LinkedNotebook(Guid::new());
    let second = SyncScope::LinkedNotebook(Guid::new());

    store.put(&SyncScope::Account, make_record(1)).await.unwrap();
    store.put(&first, make_record(2)).await.unwrap();
    store.put(&second, make_record(3)).await.unwrap();

    assert_eq!(
        store.get(&SyncScope::Account).await.unwrap().unwrap().last_sync_usn,
        Usn::new(1)
    );
    assert_eq!(store.get(&first).await.unwrap().unwrap().last_sync_usn, Usn::new(2));
    assert_eq!(store.get(&second).await.unwrap().unwrap().last_sync_usn, Usn::new(3));
}

#[tokio::test]
async fn clear_forgets_one_scope_only() {
    let store = MemorySyncStateStore::new();
    let linked = SyncScope::LinkedNotebook(Guid::new());
    store.put(&SyncScope::Account, make_record(1)).await.unwrap();
    store.put(&linked, make_record(2)).await.unwrap();

    store.clear(&SyncScope::Account).await.unwrap();

    assert!(store.get(&SyncScope::Account).await.unwrap().is_none());
    assert!(store.get(&linked).await.unwrap().is_some());
}

#[tokio::test]
async fn put_replaces_the_previous_record() {
    let store = MemorySyncStateStore::new();
    store.put(&SyncScope::Account, make_record(1)).await.unwrap();
    store.put(&SyncScope::Account, make_record(9)).await.unwrap();

    let record = store.get(&SyncScope::Account).await.unwrap().unwrap();
    assert_eq!(record.last_sync_usn, Usn::new(9));
}

// ── FileSyncStateStore ───────────────────────────────────────────

#[tokio::test]
async fn records_survive_a_restart() {
    let dir = tempdir().unwrap();
    let store = FileSyncStateStore::new(dir.path());
    store.put(&SyncScope::Account, make_record(7)).await.unwrap();

    // A new instance over the same directory, as after an app restart.
    let reopened = FileSyncStateStore::new(dir.path());
    let record = reopened.get(&SyncScope::Account).await.unwrap().unwrap();
    assert_eq!(record, make_record(7));
}

#[tokio::test]
async fn missing_file_reads_none() {
    let dir = tempdir().unwrap();
    let store = FileSyncStateStore::new(dir.path());
    assert!(store.get(&SyncScope::Account).await.unwrap().is_none());
    assert!(
        store
            .get(&SyncScope::LinkedNotebook(Guid::new()))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn linked_records_nest_under_their_guid() {
    let dir = tempdir().unwrap();
    let store = FileSyncStateStore::new(dir.path());
    let guid = Guid::new();
    store
        .put(&SyncScope::LinkedNotebook(guid), make_record(4))
        .await
        .unwrap();

    let expected = dir.path().join("linked").join(format!("{guid}.json"));
    assert!(expected.exists());

    let record = store
        .get(&SyncScope::LinkedNotebook(guid))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.last_sync_usn, Usn::new(4));
}

#[tokio::test]
async fn clear_removes_the_file() {
    let dir = tempdir().unwrap();
    let store = FileSyncStateStore::new(dir.path());
    store.put(&SyncScope::Account, make_record(7)).await.unwrap();

    store.clear(&SyncScope::Account).await.unwrap();

    assert!(!dir.path().join("account.json").exists());
    assert!(store.get(&SyncScope::Account).await.unwrap().is_none());
    // Clearing again is not an error.
    store.clear(&SyncScope::Account).await.unwrap();
}

#[tokio::test]
async fn corrupt_record_is_an_error() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("account.json"), "not json").unwrap();

    let store = FileSyncStateStore::new(dir.path());
    assert!(store.get(&SyncScope::Account).await.is_err());
}
