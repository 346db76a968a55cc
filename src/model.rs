//! Core data model.
//!
//! A work item is one deferred API request. It has identity, a priority
//! tier, an opaque operation to invoke, and lifecycle state. The engine
//! owns all mutation; producers only construct `NewWorkItem`s.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId(pub Uuid);

impl WorkItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Priority tier. Lower numeric value is served first.
///
/// Persisted and displayed as its numeric value (0/1/2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            0 => Some(Priority::High),
            1 => Some(Priority::Normal),
            2 => Some(Priority::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        write!(f, "{s}")
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let n = u8::deserialize(deserializer)?;
        Priority::from_u8(n)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid priority: {n}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Queued, waiting for the worker.
    Pending,
    /// Worker actively executing the operation.
    Running,
    /// Done successfully. Terminal.
    Completed,
    /// Operation failed or retries exhausted. Terminal until manual retry.
    Failed,
    /// Cancelled before execution began. Terminal until manual retry.
    Cancelled,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Pending)   // rate-limit requeue
                | (Failed, Pending)    // manual retry
                | (Cancelled, Pending) // manual retry
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Outcome of one operation invocation.
///
/// A rate-limit signal is distinguished from ordinary failure because it
/// carries a server-suggested wait and is eligible for automatic retry.
#[derive(Debug, Clone)]
pub enum OpOutcome {
    /// The call succeeded; payload is the raw response.
    Completed(serde_json::Value),
    /// The call failed. The payload may be a plain string or a structured
    /// object with a `message` field.
    Failed(serde_json::Value),
    /// The server throttled the call and suggested a wait.
    RateLimited {
        retry_after: Duration,
        message: String,
        payload: serde_json::Value,
    },
}

impl OpOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OpOutcome::Completed(_))
    }
}

/// The opaque callable the engine invokes. Takes the item's arguments,
/// returns a tagged outcome. The engine never inspects its behavior.
pub type Operation =
    Arc<dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = OpOutcome> + Send>> + Send + Sync>;

/// Completion callback, invoked with `(success, payload)` after an item
/// reaches Completed or Failed. Dispatched through the callback inbox,
/// never on the worker task.
pub type Callback = Box<dyn FnOnce(bool, serde_json::Value) + Send>;

// ---------------------------------------------------------------------------
// Audit snapshots
// ---------------------------------------------------------------------------

/// JSON-safe snapshot of the operation name and arguments, captured once
/// at first enqueue. Audit/detail display only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub operation: String,
    pub arguments: serde_json::Value,
}

/// Terminal outcome stored on the item: success flag plus a JSON-safe
/// snapshot of the raw payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub success: bool,
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of deferred work tracked by the engine.
#[derive(Clone)]
pub struct WorkItem {
    /// Unique identifier, stable for the item's lifetime.
    pub id: WorkItemId,

    /// Priority tier. Draw order only; never preempts a running item.
    pub priority: Priority,

    /// Free-form classification for UI grouping. No behavioral effect.
    pub category: String,

    /// Human-readable description for logging and audit.
    pub action: String,

    /// Current lifecycle state.
    pub status: Status,

    /// Last outcome. Set only on terminal transition.
    pub result: Option<OutcomeRecord>,

    /// Human-readable error, set on Failed.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Rate-limit retries performed so far.
    pub retry_count: u32,

    /// Rate-limit retry budget.
    pub max_retries: u32,

    /// Monotonic enqueue counter. FIFO tie-breaker within a priority tier.
    /// Never reused within one engine instance.
    pub sequence: u64,

    /// Audit snapshot of operation name + arguments, captured at first
    /// enqueue and not regenerated on retry.
    pub request_info: RequestInfo,

    /// Best-effort JSON-safe snapshot of the raw result payload.
    pub response_data: Option<serde_json::Value>,

    /// Arguments passed verbatim to the operation.
    pub arguments: serde_json::Value,

    /// The callable. `None` only for entries reloaded from disk, which
    /// are audit-only and cannot be retried.
    pub(crate) operation: Option<Operation>,
}

impl WorkItem {
    /// Total order key: priority ascending, then sequence ascending.
    pub fn order_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("category", &self.category)
            .field("action", &self.action)
            .field("status", &self.status)
            .field("error", &self.error)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("sequence", &self.sequence)
            .field("has_operation", &self.operation.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new work items. The engine's public API for submitting work.
pub struct NewWorkItem {
    pub(crate) category: String,
    pub(crate) action: String,
    pub(crate) priority: Priority,
    pub(crate) operation_name: String,
    pub(crate) operation: Option<Operation>,
    pub(crate) arguments: serde_json::Value,
    pub(crate) max_retries: Option<u32>,
    pub(crate) callback: Option<Callback>,
}

impl NewWorkItem {
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            action: action.into(),
            priority: Priority::Normal,
            operation_name: String::new(),
            operation: None,
            arguments: serde_json::Value::Null,
            max_retries: None,
            callback: None,
        }
    }

    /// Attach the operation to invoke. Required — `enqueue` rejects items
    /// without one.
    pub fn operation<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OpOutcome> + Send + 'static,
    {
        self.operation_name = name.into();
        self.operation = Some(Arc::new(move |args| Box::pin(f(args))));
        self
    }

    pub fn arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Register a completion callback, delivered via the callback inbox.
    pub fn callback<F>(mut self, f: F) -> Self
    where
        F: FnOnce(bool, serde_json::Value) + Send + 'static,
    {
        self.callback = Some(Box::new(f));
        self
    }
}
