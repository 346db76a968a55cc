//! Queue engine: the public API for submitting and managing work.
//!
//! The engine owns the pending map, the priority queue, and the history
//! store. All state transitions go through here or through the single
//! background worker. Producers interact via this module from any task.

pub mod worker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::{Event, EventBus, EventKind};
use crate::history::{self, HistoryStore, PersistedEntry};
use crate::model::{Callback, NewWorkItem, RequestInfo, Status, WorkItem, WorkItemId};
use crate::queue::{OrderedQueue, QueueKey};
use crate::snapshot;
use crate::telemetry::metrics;

/// How long `stop` waits for the worker to finish in-flight work before
/// abandoning it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the queue engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum history entries retained (oldest trimmed first).
    pub history_limit: usize,
    /// Whether terminal transitions are mirrored to disk.
    pub persist: bool,
    /// Path of the durable history file.
    pub persist_path: PathBuf,
    /// Rate-limit retry budget for items that don't set their own.
    pub default_max_retries: u32,
    /// Fallback wait when the queue is idle and no wake arrives.
    pub poll_interval: Duration,
    /// Buffered capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            persist: false,
            persist_path: PathBuf::from("relayq-history.json"),
            default_max_retries: 3,
            poll_interval: Duration::from_secs(5),
            event_capacity: 64,
        }
    }
}

/// A completion callback ready to run on the owner's context.
///
/// The worker never runs callbacks itself — it posts them here, and
/// whatever execution context owns producer-side state drains the inbox.
pub struct CallbackInvocation {
    pub id: WorkItemId,
    pub success: bool,
    pub payload: serde_json::Value,
    callback: Callback,
}

impl CallbackInvocation {
    /// Run the callback with the recorded `(success, payload)`.
    pub fn invoke(self) {
        (self.callback)(self.success, self.payload);
    }
}

impl std::fmt::Debug for CallbackInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackInvocation")
            .field("id", &self.id)
            .field("success", &self.success)
            .finish_non_exhaustive()
    }
}

/// Receiving side of the callback inbox.
pub type CallbackInbox = mpsc::UnboundedReceiver<CallbackInvocation>;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct PersistSettings {
    pub enabled: bool,
    pub path: PathBuf,
}

/// Everything guarded by the engine's single state mutex: pending map,
/// callback registry, history, sequence counter, persistence settings.
/// Held only for short critical sections, never across an await.
pub(crate) struct EngineState {
    pub pending: HashMap<WorkItemId, WorkItem>,
    pub callbacks: HashMap<WorkItemId, Callback>,
    pub history: HistoryStore,
    pub next_sequence: u64,
    pub persist: PersistSettings,
}

impl EngineState {
    /// Snapshot for a durable write, or `None` when persistence is off.
    pub fn persist_job(&self) -> Option<(PathBuf, Vec<PersistedEntry>)> {
        self.persist
            .enabled
            .then(|| (self.persist.path.clone(), self.history.persisted()))
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .values()
            .filter(|item| item.status == Status::Pending)
            .count()
    }
}

pub(crate) struct Inner {
    pub state: Mutex<EngineState>,
    pub queue: OrderedQueue,
    pub wake: Notify,
    pub events: EventBus,
    pub callbacks: mpsc::UnboundedSender<CallbackInvocation>,
    pub paused: AtomicBool,
    pub stopping: AtomicBool,
    pub poll_interval: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    pub fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine state lock poisoned")
    }
}

/// Write a persistence snapshot, logging failures. In-memory history
/// stays authoritative; the next successful write re-syncs the file.
async fn flush_job(job: Option<(PathBuf, Vec<PersistedEntry>)>) {
    if let Some((path, entries)) = job {
        if let Err(e) = history::save_history_file(&path, &entries).await {
            warn!(path = %path.display(), "history persist failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Handle to the queue engine. Cheap to clone; all clones share the same
/// worker and state.
#[derive(Clone)]
pub struct QueueEngine {
    inner: Arc<Inner>,
    default_max_retries: u32,
}

impl QueueEngine {
    /// Start the engine: reload any durable history, then spawn the
    /// background worker. Returns the engine handle and the callback
    /// inbox for the owner's main execution context.
    pub async fn start(config: EngineConfig) -> (Self, CallbackInbox) {
        let entries = if config.persist {
            history::load_history_file(&config.persist_path).await
        } else {
            Vec::new()
        };
        if !entries.is_empty() {
            info!(count = entries.len(), "reloaded history from disk");
        }

        let (cb_tx, cb_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            state: Mutex::new(EngineState {
                pending: HashMap::new(),
                callbacks: HashMap::new(),
                history: HistoryStore::with_entries(config.history_limit, entries),
                next_sequence: 0,
                persist: PersistSettings {
                    enabled: config.persist,
                    path: config.persist_path,
                },
            }),
            queue: OrderedQueue::new(),
            wake: Notify::new(),
            events: EventBus::new(config.event_capacity),
            callbacks: cb_tx,
            paused: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            poll_interval: config.poll_interval,
            worker: Mutex::new(None),
        });

        let handle = tokio::spawn(worker::run(Arc::clone(&inner)));
        *inner.worker.lock().expect("worker handle lock poisoned") = Some(handle);

        (
            Self {
                inner,
                default_max_retries: config.default_max_retries,
            },
            cb_rx,
        )
    }

    /// Submit new work. Assigns a sequence number, captures the audit
    /// snapshot, queues the item, and wakes the worker. Never blocks on
    /// I/O; fails synchronously only for an item with no operation or a
    /// stopped engine.
    pub fn enqueue(&self, new: NewWorkItem) -> Result<WorkItemId> {
        if self.inner.stopping() {
            return Err(Error::Stopped);
        }
        let operation = new.operation.ok_or(Error::MissingOperation)?;

        let id = WorkItemId::new();
        let key = {
            let mut state = self.inner.lock_state();
            let sequence = state.next_sequence;
            state.next_sequence += 1;

            let item = WorkItem {
                id,
                priority: new.priority,
                category: new.category,
                action: new.action,
                status: Status::Pending,
                result: None,
                error: None,
                created_at: Utc::now(),
                completed_at: None,
                retry_count: 0,
                max_retries: new.max_retries.unwrap_or(self.default_max_retries),
                sequence,
                request_info: RequestInfo {
                    operation: new.operation_name,
                    arguments: snapshot::json_safe(&new.arguments),
                },
                response_data: None,
                arguments: new.arguments,
                operation: Some(operation),
            };
            debug!(%id, action = %item.action, priority = %item.priority, sequence, "work enqueued");

            if let Some(callback) = new.callback {
                state.callbacks.insert(id, callback);
            }
            let key = QueueKey {
                priority: item.priority,
                sequence,
                id,
            };
            state.pending.insert(id, item);
            key
        };

        self.inner.queue.push(key);
        metrics::work_enqueued().add(1, &[]);
        self.emit_changed();
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Suspend processing. The in-flight item (if any) runs to completion.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("queue paused");
            self.inner.events.emit(EventKind::QueuePaused);
        }
    }

    /// Resume processing and wake the worker.
    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            info!("queue resumed");
            self.inner.events.emit(EventKind::QueueResumed);
            self.inner.wake.notify_one();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused()
    }

    /// Cancel a pending item. Moves it straight to history as Cancelled;
    /// its callback never fires. Running or terminal items are a silent
    /// no-op (`Ok(false)`). Unknown ids are an error.
    pub async fn cancel(&self, id: WorkItemId) -> Result<bool> {
        let job = {
            let mut state = self.inner.lock_state();
            match state.pending.get(&id) {
                Some(item) if item.status == Status::Pending => {}
                Some(_) => return Ok(false), // running; cooperative cancel only
                None => {
                    return if state.history.get(&id).is_some() {
                        Ok(false) // already terminal
                    } else {
                        Err(Error::NotFound(id.to_string()))
                    };
                }
            }
            let Some(mut item) = state.pending.remove(&id) else {
                return Ok(false);
            };
            item.status = Status::Cancelled;
            item.completed_at = Some(Utc::now());
            state.callbacks.remove(&id);
            state.history.record(item);
            state.persist_job()
            // The queue still holds this item's key; the worker discards
            // stale keys on pop.
        };
        flush_job(job).await;
        info!(%id, "work item cancelled");
        self.emit_changed();
        Ok(true)
    }

    /// Re-enqueue a Failed or Cancelled history item. Keeps its id and
    /// accumulated retry count, clears the terminal fields, and goes
    /// through the normal enqueue path — so it receives a new sequence
    /// number and queues behind work submitted since the failure.
    pub async fn retry(&self, id: WorkItemId) -> Result<WorkItemId> {
        if self.inner.stopping() {
            return Err(Error::Stopped);
        }
        let (key, job) = {
            let mut state = self.inner.lock_state();
            let entry = state
                .history
                .get(&id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if !entry.status.can_transition_to(Status::Pending) {
                return Err(Error::InvalidTransition {
                    from: entry.status,
                    to: Status::Pending,
                });
            }
            if entry.operation.is_none() {
                return Err(Error::OperationUnavailable(id.to_string()));
            }

            let Some(mut item) = state.history.remove(&id) else {
                return Err(Error::NotFound(id.to_string()));
            };
            item.status = Status::Pending;
            item.result = None;
            item.error = None;
            item.completed_at = None;
            item.response_data = None;
            item.created_at = Utc::now();
            item.sequence = state.next_sequence;
            state.next_sequence += 1;

            let key = QueueKey {
                priority: item.priority,
                sequence: item.sequence,
                id,
            };
            state.pending.insert(id, item);
            (key, state.persist_job())
        };

        self.inner.queue.push(key);
        flush_job(job).await;
        info!(%id, "work item re-enqueued for retry");
        self.emit_changed();
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Retry every currently Failed history item. Returns the ids that
    /// were re-enqueued; items without an operation (reloaded from disk)
    /// are skipped.
    pub async fn retry_failed_all(&self) -> Vec<WorkItemId> {
        let candidates: Vec<WorkItemId> = {
            let state = self.inner.lock_state();
            state
                .history
                .retry_candidates()
                .iter()
                .map(|item| item.id)
                .collect()
        };

        let mut retried = Vec::new();
        for id in candidates {
            match self.retry(id).await {
                Ok(id) => retried.push(id),
                Err(e) => debug!(%id, "retry skipped: {e}"),
            }
        }
        retried
    }

    /// Current count of items waiting in the queue.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_state().pending_len()
    }

    /// Independent copy of the history list, most recent first.
    pub fn history_snapshot(&self) -> Vec<WorkItem> {
        self.inner.lock_state().history.list()
    }

    /// Look up an item by id across pending work and history.
    pub fn get(&self, id: WorkItemId) -> Option<WorkItem> {
        let state = self.inner.lock_state();
        state
            .pending
            .get(&id)
            .cloned()
            .or_else(|| state.history.get(&id).cloned())
    }

    /// Drop Completed history entries, keeping Failed and Cancelled.
    pub async fn remove_completed_history(&self) {
        let job = {
            let mut state = self.inner.lock_state();
            state.history.remove_completed();
            state.persist_job()
        };
        flush_job(job).await;
        self.emit_changed();
    }

    /// Drop all history entries.
    pub async fn clear_history(&self) {
        let job = {
            let mut state = self.inner.lock_state();
            state.history.clear();
            state.persist_job()
        };
        flush_job(job).await;
        self.emit_changed();
    }

    /// Change the history retention limit. Takes effect on the next write.
    pub fn set_history_limit(&self, limit: usize) {
        self.inner.lock_state().history.set_limit(limit);
    }

    /// Reconfigure persistence. Takes effect on the next write.
    pub fn set_persistence(&self, enabled: bool, path: Option<PathBuf>) {
        let mut state = self.inner.lock_state();
        state.persist.enabled = enabled;
        if let Some(path) = path {
            state.persist.path = path;
        }
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Request shutdown: wake the worker, wait up to [`STOP_TIMEOUT`] for
    /// the loop to exit, then force-flush history to disk.
    pub async fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.wake.notify_waiters();

        let handle = self
            .inner
            .worker
            .lock()
            .expect("worker handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                warn!("worker did not stop within {STOP_TIMEOUT:?}, aborting");
                abort.abort();
            }
        }

        let job = self.inner.lock_state().persist_job();
        flush_job(job).await;
        info!("engine stopped");
    }

    fn emit_changed(&self) {
        let pending = self.inner.lock_state().pending_len();
        self.inner.events.emit(EventKind::QueueChanged { pending });
    }
}
