//! Integration tests for durable history persistence.

use chrono::Utc;
use serde_json::json;

use relayq::history::{self, HistoryStore, PersistedEntry};
use relayq::model::{Priority, RequestInfo, Status, WorkItemId};

fn entry(status: Status, action: &str) -> PersistedEntry {
    PersistedEntry {
        id: WorkItemId::new(),
        priority: Priority::Normal,
        category: "test".into(),
        action: action.into(),
        status,
        error: (status == Status::Failed).then(|| "it broke".to_string()),
        created_at: Utc::now(),
        completed_at: Some(Utc::now()),
        retry_count: 0,
        request_info: RequestInfo {
            operation: "noop".into(),
            arguments: json!({"key": "value"}),
        },
        response_data: None,
    }
}

#[tokio::test]
async fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");

    let entries = vec![
        entry(Status::Completed, "newest"),
        entry(Status::Failed, "middle"),
        entry(Status::Cancelled, "oldest"),
    ];
    history::save_history_file(&path, &entries).await.unwrap();

    let loaded = history::load_history_file(&path).await;
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded[0].action, "newest");
    assert_eq!(loaded[1].status, Status::Failed);
    assert_eq!(loaded[1].error.as_deref(), Some("it broke"));
    assert_eq!(loaded[2].action, "oldest");
}

#[tokio::test]
async fn absent_file_is_a_first_run() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = history::load_history_file(&dir.path().join("nope.json")).await;
    assert!(loaded.is_empty());
}

#[tokio::test]
async fn garbage_document_loads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    tokio::fs::write(&path, "this is not json {{{").await.unwrap();

    let loaded = history::load_history_file(&path).await;
    assert!(loaded.is_empty());
}

#[tokio::test]
async fn malformed_entries_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");

    let good = serde_json::to_value(entry(Status::Completed, "survivor")).unwrap();
    let doc = serde_json::Value::Array(vec![
        json!({"id": "not-a-uuid", "status": "completed"}),
        good,
        json!(42),
    ]);
    tokio::fs::write(&path, serde_json::to_string(&doc).unwrap())
        .await
        .unwrap();

    let loaded = history::load_history_file(&path).await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].action, "survivor");
}

#[tokio::test]
async fn save_replaces_previous_content_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");

    history::save_history_file(&path, &[entry(Status::Completed, "old")])
        .await
        .unwrap();
    history::save_history_file(&path, &[entry(Status::Failed, "new")])
        .await
        .unwrap();

    let loaded = history::load_history_file(&path).await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].action, "new");

    // No temp file left behind.
    let mut dir_entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut names = Vec::new();
    while let Some(e) = dir_entries.next_entry().await.unwrap() {
        names.push(e.file_name().to_string_lossy().into_owned());
    }
    assert_eq!(names, vec!["history.json"]);
}

#[tokio::test]
async fn save_creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/deeper/history.json");

    history::save_history_file(&path, &[entry(Status::Completed, "nested")])
        .await
        .unwrap();

    let loaded = history::load_history_file(&path).await;
    assert_eq!(loaded.len(), 1);
}

#[tokio::test]
async fn load_truncates_to_store_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");

    let entries: Vec<PersistedEntry> = (0..10)
        .map(|i| entry(Status::Completed, &format!("item {i}")))
        .collect();
    history::save_history_file(&path, &entries).await.unwrap();

    let loaded = history::load_history_file(&path).await;
    let store = HistoryStore::with_entries(4, loaded);
    assert_eq!(store.len(), 4);
    // Most recent (front of file) survive the truncation.
    assert_eq!(store.list()[0].action, "item 0");
    assert_eq!(store.list()[3].action, "item 3");
}

#[test]
fn persisted_entry_matches_the_documented_shape() {
    let value = serde_json::to_value(entry(Status::Failed, "shape check")).unwrap();

    assert!(value["id"].is_string());
    assert_eq!(value["priority"], 1); // integer, not a name
    assert_eq!(value["status"], "failed");
    assert!(value["created_at"].is_string()); // ISO-8601
    assert!(value["request_info"]["operation"].is_string());
    assert_eq!(value["request_info"]["arguments"]["key"], "value");
    // Absent response_data is omitted entirely.
    assert!(value.get("response_data").is_none());
}
