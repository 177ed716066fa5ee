//! `SqliteStore` behaviour on a real database file.

#[path = "support.rs"]
mod support;

use std::time::Duration;

use convo_core::model::{Channel, Direction, Status};
use convo_core::runner::{MigrationRunner, RunOptions, RunnerSettings};
use convo_core::store::{
    ConversationStore, DiscardMode, LockError, MergeWrite, PageCursor, PageRequest, SqliteStore,
};
use serde_json::json;
use support::{at, duplicate_pairs, message, record};
use tempfile::TempDir;

fn open_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().expect("create temp dir");
    let store = SqliteStore::open(&dir.path().join(".convo/convo.db")).expect("open store");
    (dir, store)
}

fn seed(store: &SqliteStore, records: Vec<convo_core::model::ConversationRecord>) {
    for record in records {
        store.insert(&record).expect("insert record");
    }
}

fn page(after: Option<PageCursor>, page_size: usize) -> PageRequest {
    PageRequest {
        after,
        page_size,
        channels: Vec::new(),
    }
}

#[test]
fn insert_and_get_round_trip_every_field() {
    let (_dir, store) = open_store();
    let mut original = record(
        "c1",
        Channel::Whatsapp,
        "0531 494 25 94",
        0,
        vec![
            message("m1", Direction::Inbound, "merhaba", 1),
            message("m2", Direction::Outbound, "hos geldiniz", 2),
        ],
    );
    original.tags.insert("vip".to_string());
    original
        .metadata
        .insert("profileName".to_string(), json!("Ayse"));
    original.assigned_to = Some("agent-1".to_string());

    store.insert(&original).expect("insert");
    let loaded = store.get("c1").expect("get").expect("present");

    assert_eq!(loaded, original);
    assert!(store.get("missing").expect("get").is_none());
}

#[test]
fn insert_generates_an_id_when_missing() {
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    let anonymous = record("", Channel::Email, "a@b.co", 0, Vec::new());
    let id = store.insert(&anonymous).expect("insert");
    assert!(!id.is_empty());
    assert_eq!(store.get(&id).expect("get").expect("present").identity, "a@b.co");
}

#[test]
fn scan_pages_in_created_order_with_cursor() {
    let (_dir, store) = open_store();
    seed(&store, duplicate_pairs(3));

    let first = store.scan_page(&page(None, 4)).expect("first page");
    let ids: Vec<&str> = first.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a00", "b00", "a01", "b01"]);

    let cursor = PageCursor::after(first.last().expect("non-empty"));
    let second = store.scan_page(&page(Some(cursor), 4)).expect("second page");
    let ids: Vec<&str> = second.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a02", "b02"]);
    assert_eq!(second[0].messages.len(), 2);
}

#[test]
fn scan_honours_channel_filter_and_skips_archived() {
    let (_dir, store) = open_store();
    let mut archived = record("old", Channel::Whatsapp, "+905310000099", 0, Vec::new());
    archived.status = Status::Archived;
    seed(
        &store,
        vec![
            archived,
            record("w1", Channel::Whatsapp, "+905310000001", 1, Vec::new()),
            record("i1", Channel::Instagram, "@ayse", 2, Vec::new()),
        ],
    );

    let all = store.scan_page(&page(None, 10)).expect("scan");
    assert_eq!(all.len(), 2);

    let instagram = store
        .scan_page(&PageRequest {
            channels: vec![Channel::Instagram],
            ..page(None, 10)
        })
        .expect("scan");
    assert_eq!(instagram.len(), 1);
    assert_eq!(instagram[0].id, "i1");
}

fn pair_write(mode: DiscardMode) -> MergeWrite {
    let mut copied = message("b00/m1", Direction::Inbound, "fiyat nedir?", 3);
    copied.source_conversation_id = Some("b00".to_string());
    MergeWrite {
        primary_id: "a00".to_string(),
        identity_key: "+905310000000".to_string(),
        appended_messages: vec![copied],
        tags: ["lead".to_string()].into_iter().collect(),
        metadata: [("waId".to_string(), json!("905310000000"))].into_iter().collect(),
        assigned_to: Some("agent-2".to_string()),
        last_activity_at: at(3),
        discard_ids: vec!["b00".to_string()],
        discard_mode: mode,
    }
}

#[test]
fn archive_merge_updates_primary_and_marks_duplicate() {
    let (_dir, store) = open_store();
    seed(&store, duplicate_pairs(1));

    store.apply_merge(&pair_write(DiscardMode::Archive)).expect("merge");

    let primary = store.get("a00").expect("get").expect("primary");
    assert_eq!(primary.messages.len(), 3);
    assert_eq!(primary.messages[2].id, "b00/m1");
    assert_eq!(primary.messages[2].source_conversation_id.as_deref(), Some("b00"));
    assert_eq!(primary.identity_key.as_deref(), Some("+905310000000"));
    assert!(primary.tags.contains("lead"));
    assert_eq!(primary.metadata["waId"], "905310000000");
    assert_eq!(primary.assigned_to.as_deref(), Some("agent-2"));

    let duplicate = store.get("b00").expect("get").expect("archived");
    assert_eq!(duplicate.status, Status::Archived);
    assert_eq!(duplicate.merged_into.as_deref(), Some("a00"));
    assert_eq!(duplicate.messages.len(), 1, "archived record keeps its messages");

    let counts = store.counts().expect("counts");
    assert_eq!((counts.active, counts.archived, counts.messages), (1, 1, 4));
}

#[test]
fn delete_merge_removes_duplicate_and_its_messages() {
    let (_dir, store) = open_store();
    seed(&store, duplicate_pairs(1));

    store.apply_merge(&pair_write(DiscardMode::Delete)).expect("merge");

    assert!(store.get("b00").expect("get").is_none());
    let counts = store.counts().expect("counts");
    assert_eq!((counts.active, counts.archived, counts.messages), (1, 0, 3));
}

#[test]
fn failed_batch_leaves_every_record_unchanged() {
    let (_dir, store) = open_store();
    seed(&store, duplicate_pairs(1));
    let mut write = pair_write(DiscardMode::Archive);
    write.discard_ids.push("ghost".to_string());

    assert!(store.apply_merge(&write).is_err());

    let primary = store.get("a00").expect("get").expect("primary");
    assert_eq!(primary.messages.len(), 2);
    assert!(primary.identity_key.is_none());
    assert_eq!(
        store.get("b00").expect("get").expect("b00").status,
        Status::Active
    );
}

#[test]
fn earlier_merges_are_repointed_to_the_new_primary() {
    let (_dir, store) = open_store();
    let mut ancient = record("z", Channel::Whatsapp, "+905310000000", 0, Vec::new());
    ancient.status = Status::Archived;
    ancient.merged_into = Some("b00".to_string());
    seed(&store, duplicate_pairs(1));
    seed(&store, vec![ancient]);

    store.apply_merge(&pair_write(DiscardMode::Delete)).expect("merge");

    let ancient = store.get("z").expect("get").expect("z");
    assert_eq!(ancient.merged_into.as_deref(), Some("a00"));
}

#[test]
fn lock_is_exclusive_until_released() {
    let (_dir, store) = open_store();
    let lease = store
        .acquire_lock("cli:1", Duration::from_secs(60))
        .expect("acquire");

    let err = store
        .acquire_lock("http:2", Duration::from_secs(60))
        .expect_err("second acquire fails");
    assert!(matches!(err, LockError::Held { ref holder, .. } if holder == "cli:1"));

    let refreshed = store
        .refresh_lock(&lease, Duration::from_secs(120))
        .expect("refresh");
    assert!(refreshed.expires_at >= lease.expires_at);

    store.release_lock(&refreshed).expect("release");
    assert!(store.lock_status().expect("status").is_none());
    assert!(matches!(store.release_lock(&lease), Err(LockError::Lost)));
}

#[test]
fn expired_lock_can_be_taken_and_old_lease_is_lost() {
    let (_dir, store) = open_store();
    let stale = store.acquire_lock("crashed", Duration::ZERO).expect("acquire");
    let fresh = store
        .acquire_lock("next", Duration::from_secs(60))
        .expect("expired lock is reclaimed");

    assert_ne!(stale.token, fresh.token);
    assert!(matches!(
        store.refresh_lock(&stale, Duration::from_secs(60)),
        Err(LockError::Lost)
    ));
}

#[test]
fn force_release_reports_previous_holder() {
    let (_dir, store) = open_store();
    store
        .acquire_lock("stuck", Duration::from_secs(600))
        .expect("acquire");

    let held = store.force_release_lock().expect("force").expect("was held");
    assert_eq!(held.holder, "stuck");
    assert!(store.force_release_lock().expect("force").is_none());
}

#[test]
fn full_run_against_sqlite_leaves_one_active_record_per_identity() {
    let (_dir, store) = open_store();
    seed(&store, duplicate_pairs(6));

    let report = MigrationRunner::new(
        &store,
        RunnerSettings {
            page_size: 5,
            ..RunnerSettings::default()
        },
    )
    .run(&RunOptions {
        dry_run: false,
        ..RunOptions::default()
    })
    .expect("run");

    assert_eq!(report.groups_merged, 6);
    assert_eq!(report.records_archived, 6);
    let counts = store.counts().expect("counts");
    assert_eq!((counts.active, counts.archived), (6, 6));
    assert!(store.lock_status().expect("status").is_none());
}

#[test]
fn merge_succeeds_when_primary_holds_identical_messages_under_colliding_ids() {
    let (_dir, store) = open_store();
    seed(
        &store,
        vec![
            record(
                "p",
                Channel::Whatsapp,
                "0531 494 25 94",
                0,
                vec![
                    message("m0", Direction::Inbound, "fiyat?", 1),
                    message("m1", Direction::Inbound, "fiyat?", 1),
                    message("m2", Direction::Outbound, "tesekkurler", 2),
                ],
            ),
            record(
                "d",
                Channel::Whatsapp,
                "+90 531 494 2594",
                5,
                vec![
                    message("m0", Direction::Inbound, "merhaba", 6),
                    message("m1", Direction::Inbound, "katalog", 7),
                ],
            ),
        ],
    );

    let report = MigrationRunner::new(&store, RunnerSettings::default())
        .run(&RunOptions {
            dry_run: false,
            ..RunOptions::default()
        })
        .expect("run");

    assert_eq!(report.groups_merged, 1);
    assert_eq!(report.groups_failed, 0, "errors: {:?}", report.errors);
    assert_eq!(report.messages_merged, 2);

    let primary = store.get("p").expect("get").expect("primary kept");
    let mut ids: Vec<&str> = primary.messages.iter().map(|m| m.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["d/m0", "d/m1", "m0", "m1", "m2"]);
    assert_eq!(
        store.get("d").expect("get").expect("archived kept").status,
        Status::Archived
    );
}
