//! Bounded, most-recent-first history of finished and cancelled items.
//!
//! Single source of truth for terminal outcomes. In-memory state is
//! authoritative; the JSON file on disk is a durable mirror written
//! atomically after every terminal transition. Malformed entries on
//! load degrade with a warning, never abort startup.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{Priority, RequestInfo, Status, WorkItem, WorkItemId};

/// Bounded most-recent-first log with an O(1) id index.
pub struct HistoryStore {
    /// Ids in display order, front = most recent.
    order: VecDeque<WorkItemId>,
    items: HashMap<WorkItemId, WorkItem>,
    limit: usize,
}

impl HistoryStore {
    pub fn new(limit: usize) -> Self {
        Self {
            order: VecDeque::new(),
            items: HashMap::new(),
            limit,
        }
    }

    /// Build a store from entries reloaded off disk, oldest last.
    /// Truncates to the limit.
    pub fn with_entries(limit: usize, entries: Vec<PersistedEntry>) -> Self {
        let mut store = Self::new(limit);
        // Entries are persisted most-recent-first; re-record in reverse so
        // the front of the deque ends up matching the file order.
        for entry in entries.into_iter().rev() {
            store.record(entry.into_work_item());
        }
        store
    }

    /// Insert at the front. Trims the oldest entries beyond the limit.
    pub fn record(&mut self, item: WorkItem) {
        let id = item.id;
        if self.items.insert(id, item).is_none() {
            self.order.push_front(id);
        } else {
            // Re-recorded id keeps a single position, moved to the front.
            self.order.retain(|existing| *existing != id);
            self.order.push_front(id);
        }
        while self.order.len() > self.limit {
            if let Some(old) = self.order.pop_back() {
                self.items.remove(&old);
            }
        }
    }

    pub fn get(&self, id: &WorkItemId) -> Option<&WorkItem> {
        self.items.get(id)
    }

    pub fn remove(&mut self, id: &WorkItemId) -> Option<WorkItem> {
        let item = self.items.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(item)
    }

    /// Independent copy of the current history, most recent first.
    pub fn list(&self) -> Vec<WorkItem> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id).cloned())
            .collect()
    }

    /// Items eligible for manual retry: status Failed.
    pub fn retry_candidates(&self) -> Vec<WorkItem> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id))
            .filter(|item| item.status == Status::Failed)
            .cloned()
            .collect()
    }

    /// Drop all Completed entries, retaining Failed and Cancelled.
    pub fn remove_completed(&mut self) {
        let keep: Vec<WorkItemId> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                self.items
                    .get(id)
                    .is_some_and(|item| item.status != Status::Completed)
            })
            .collect();
        self.items.retain(|_, item| item.status != Status::Completed);
        self.order = keep.into();
    }

    /// Drop all history entries.
    pub fn clear(&mut self) {
        self.order.clear();
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Change the retention limit. Applied on the next `record`.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Serializable snapshot of the full list, most recent first.
    pub fn persisted(&self) -> Vec<PersistedEntry> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id))
            .map(PersistedEntry::from)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Durable format
// ---------------------------------------------------------------------------

/// One history entry as written to the durable JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub id: WorkItemId,
    pub priority: Priority,
    pub category: String,
    pub action: String,
    pub status: Status,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    pub request_info: RequestInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<serde_json::Value>,
}

impl From<&WorkItem> for PersistedEntry {
    fn from(item: &WorkItem) -> Self {
        Self {
            id: item.id,
            priority: item.priority,
            category: item.category.clone(),
            action: item.action.clone(),
            status: item.status,
            error: item.error.clone(),
            created_at: item.created_at,
            completed_at: item.completed_at,
            retry_count: item.retry_count,
            request_info: item.request_info.clone(),
            response_data: item.response_data.clone(),
        }
    }
}

impl PersistedEntry {
    /// Rehydrate an audit-only work item. Reloaded entries carry no
    /// operation closure and cannot be retried.
    pub fn into_work_item(self) -> WorkItem {
        WorkItem {
            id: self.id,
            priority: self.priority,
            category: self.category,
            action: self.action,
            status: self.status,
            result: None,
            error: self.error,
            created_at: self.created_at,
            completed_at: self.completed_at,
            retry_count: self.retry_count,
            max_retries: 0,
            sequence: 0,
            request_info: self.request_info,
            response_data: self.response_data,
            arguments: serde_json::Value::Null,
            operation: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Load history entries from `path`. An absent file is a first run; a
/// malformed document or malformed entries degrade to whatever parses,
/// with a warning per skip.
pub async fn load_history_file(path: &Path) -> Vec<PersistedEntry> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no history file, starting empty");
            return Vec::new();
        }
        Err(e) => {
            warn!(path = %path.display(), "cannot read history file: {e}");
            return Vec::new();
        }
    };

    let raw: Vec<serde_json::Value> = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), "history file is not a JSON list: {e}");
            return Vec::new();
        }
    };

    let mut entries = Vec::with_capacity(raw.len());
    for (idx, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<PersistedEntry>(value) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(index = idx, "skipping malformed history entry: {e}"),
        }
    }
    entries
}

/// Write the full history atomically: serialize to a sibling temp file,
/// then rename over the target. A crash mid-write leaves the previous
/// durable state intact.
pub async fn save_history_file(path: &Path, entries: &[PersistedEntry]) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(status: Status) -> WorkItem {
        let id = WorkItemId::new();
        WorkItem {
            id,
            priority: Priority::Normal,
            category: "test".into(),
            action: format!("item {id}"),
            status,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            retry_count: 0,
            max_retries: 3,
            sequence: 0,
            request_info: RequestInfo {
                operation: "noop".into(),
                arguments: serde_json::Value::Null,
            },
            response_data: None,
            arguments: serde_json::Value::Null,
            operation: None,
        }
    }

    #[test]
    fn record_inserts_most_recent_first() {
        let mut store = HistoryStore::new(10);
        let first = item(Status::Completed);
        let second = item(Status::Completed);
        let (a, b) = (first.id, second.id);

        store.record(first);
        store.record(second);

        let listed = store.list();
        assert_eq!(listed[0].id, b);
        assert_eq!(listed[1].id, a);
    }

    #[test]
    fn overflow_trims_from_the_tail() {
        let mut store = HistoryStore::new(3);
        let mut ids = Vec::new();
        for _ in 0..5 {
            let it = item(Status::Completed);
            ids.push(it.id);
            store.record(it);
        }

        assert_eq!(store.len(), 3);
        let listed = store.list();
        // The three most recent survive, oldest two trimmed.
        assert_eq!(listed[0].id, ids[4]);
        assert_eq!(listed[2].id, ids[2]);
        assert!(store.get(&ids[0]).is_none());
        assert!(store.get(&ids[1]).is_none());
    }

    #[test]
    fn retry_candidates_are_failed_only() {
        let mut store = HistoryStore::new(10);
        store.record(item(Status::Completed));
        let failed = item(Status::Failed);
        let failed_id = failed.id;
        store.record(failed);
        store.record(item(Status::Cancelled));

        let candidates = store.retry_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, failed_id);
    }

    #[test]
    fn remove_completed_keeps_failed_and_cancelled() {
        let mut store = HistoryStore::new(10);
        store.record(item(Status::Completed));
        store.record(item(Status::Failed));
        store.record(item(Status::Cancelled));
        store.record(item(Status::Completed));

        store.remove_completed();

        assert_eq!(store.len(), 2);
        assert!(store.list().iter().all(|i| i.status != Status::Completed));
    }

    #[test]
    fn clear_drops_everything() {
        let mut store = HistoryStore::new(10);
        store.record(item(Status::Completed));
        store.record(item(Status::Failed));
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn list_returns_independent_copies() {
        let mut store = HistoryStore::new(10);
        store.record(item(Status::Failed));

        let mut listed = store.list();
        listed[0].error = Some("mutated copy".into());

        assert!(store.list()[0].error.is_none());
    }

    #[test]
    fn with_entries_preserves_file_order_and_limit() {
        let entries: Vec<PersistedEntry> = (0..5)
            .map(|_| PersistedEntry::from(&item(Status::Completed)))
            .collect();
        let newest = entries[0].id;

        let store = HistoryStore::with_entries(3, entries);
        assert_eq!(store.len(), 3);
        assert_eq!(store.list()[0].id, newest);
    }

    #[test]
    fn reloaded_entries_have_no_operation() {
        let entry = PersistedEntry::from(&item(Status::Failed));
        let rehydrated = entry.into_work_item();
        assert!(rehydrated.operation.is_none());
    }
}
