//! The background worker loop: pop, execute, classify, retry or finalize.
//!
//! Exactly one worker runs per engine. It is the only code that moves an
//! item through Running, so at most one item executes at any instant.
//! Operation failures and panics are contained here — they finalize the
//! item, never the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde_json::json;
use tokio::time::Instant;
use tracing::{Instrument, info, warn};

use crate::event::EventKind;
use crate::model::{OpOutcome, Operation, OutcomeRecord, Status, WorkItemId};
use crate::queue::QueueKey;
use crate::snapshot;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_item_span};

use super::{CallbackInvocation, Inner, flush_job};

/// Rate-limit waits above this are treated as hard quota exhaustion:
/// immediately terminal, no automatic retry.
pub const LONG_WAIT_THRESHOLD: Duration = Duration::from_secs(60);

/// Fixed slack added to a server-suggested wait before retrying.
pub const RETRY_SLEEP_BUFFER: Duration = Duration::from_millis(500);

/// Backoff sleeps are chunked at this granule so a stop request is
/// honored within about a second even mid-backoff.
pub const BACKOFF_GRANULE: Duration = Duration::from_secs(1);

/// Run the worker loop until stop is requested, then flush history.
pub(crate) async fn run(inner: Arc<Inner>) {
    info!("queue worker started");
    let mut idle_announced = false;

    while !inner.stopping() {
        if inner.paused() {
            // Bounded wait: resume and stop both wake us, the poll
            // interval catches a missed signal.
            tokio::select! {
                _ = inner.wake.notified() => {}
                _ = tokio::time::sleep(inner.poll_interval) => {}
            }
            continue;
        }

        let Some(key) = inner.queue.pop_min() else {
            if !idle_announced {
                inner.events.emit(EventKind::QueueEmpty);
                idle_announced = true;
            }
            tokio::select! {
                _ = inner.wake.notified() => {}
                _ = tokio::time::sleep(inner.poll_interval) => {}
            }
            continue;
        };

        idle_announced = false;
        process(&inner, key).await;
    }

    let job = inner.lock_state().persist_job();
    flush_job(job).await;
    info!("queue worker stopped");
}

/// Execute one drawn key end to end.
async fn process(inner: &Arc<Inner>, key: QueueKey) {
    // Claim: Pending → Running. A stale key (cancelled item, superseded
    // sequence after a manual retry) resolves to nothing; discard it —
    // its terminal state was already recorded when the key went stale.
    let (operation, arguments, action) = {
        let mut state = inner.lock_state();
        let Some(item) = state.pending.get_mut(&key.id) else {
            return;
        };
        if item.status != Status::Pending || item.sequence != key.sequence {
            return;
        }
        item.status = Status::Running;
        (
            item.operation.clone(),
            item.arguments.clone(),
            item.action.clone(),
        )
    };

    inner.events.emit(EventKind::ItemStarted { id: key.id });

    let span = start_item_span(&action, &key.id);
    record_state_transition(&span, "pending", "running");

    let started = Instant::now();
    let outcome = match operation {
        Some(operation) => invoke(operation, arguments, &span).await,
        // Unreachable for queued runtime items; reloaded audit entries
        // are never queued.
        None => OpOutcome::Failed(json!({"message": "work item has no operation attached"})),
    };
    metrics::work_duration_ms().record(
        started.elapsed().as_millis() as f64,
        &[KeyValue::new("action", action.clone())],
    );

    match outcome {
        OpOutcome::Completed(payload) => {
            record_state_transition(&span, "running", "completed");
            finalize(inner, key.id, true, payload, None).await;
        }
        OpOutcome::Failed(payload) => {
            let message = failure_message(&payload);
            record_state_transition(&span, "running", "failed");
            finalize(inner, key.id, false, payload, Some(message)).await;
        }
        OpOutcome::RateLimited {
            retry_after,
            message,
            payload,
        } => {
            handle_rate_limit(inner, key, retry_after, message, payload, &span).await;
        }
    }
}

/// Invoke the operation on its own task so a panic surfaces as a
/// `JoinError` instead of tearing down the worker loop.
async fn invoke(operation: Operation, arguments: serde_json::Value, span: &tracing::Span) -> OpOutcome {
    let fut = (operation)(arguments);
    match tokio::spawn(fut.instrument(span.clone())).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let panic = e.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "operation panicked".to_string());
            OpOutcome::Failed(json!({ "message": format!("operation panicked: {message}") }))
        }
        Err(e) => OpOutcome::Failed(json!({ "message": format!("operation aborted: {e}") })),
    }
}

enum RetryVerdict {
    /// Budget remains; this is the item's Nth rate-limit retry.
    Retry(u32),
    /// Budget exhausted after this many attempts.
    Exhausted(u32),
}

async fn handle_rate_limit(
    inner: &Arc<Inner>,
    key: QueueKey,
    retry_after: Duration,
    message: String,
    payload: serde_json::Value,
    span: &tracing::Span,
) {
    metrics::work_rate_limited().add(1, &[]);

    if retry_after > LONG_WAIT_THRESHOLD {
        // Hard quota: surface immediately, no automatic retry.
        warn!(id = %key.id, wait_secs = retry_after.as_secs(), %message, "hard rate limit");
        inner.events.emit(EventKind::RateLimited {
            retry_after_secs: retry_after.as_secs(),
            message: message.clone(),
        });
        record_state_transition(span, "running", "failed");
        let error = format!(
            "rate limited: server requested a {}s wait: {message}",
            retry_after.as_secs()
        );
        finalize(inner, key.id, false, payload, Some(error)).await;
        return;
    }

    let verdict = {
        let mut state = inner.lock_state();
        let Some(item) = state.pending.get_mut(&key.id) else {
            return;
        };
        if item.retry_count < item.max_retries {
            item.retry_count += 1;
            RetryVerdict::Retry(item.retry_count)
        } else {
            RetryVerdict::Exhausted(item.retry_count)
        }
    };

    match verdict {
        RetryVerdict::Retry(attempt) => {
            // Notify once per item, on its first automatic retry.
            if attempt == 1 {
                inner.events.emit(EventKind::RateLimited {
                    retry_after_secs: retry_after.as_secs(),
                    message: message.clone(),
                });
            }
            info!(
                id = %key.id,
                attempt,
                wait_secs = retry_after.as_secs(),
                "rate limited, backing off"
            );

            backoff(inner, retry_after + RETRY_SLEEP_BUFFER).await;

            {
                let mut state = inner.lock_state();
                let Some(item) = state.pending.get_mut(&key.id) else {
                    return;
                };
                item.status = Status::Pending;
            }
            record_state_transition(span, "running", "pending");

            if inner.stopping() {
                // Pending work is not persisted; the item is dropped with
                // the process.
                return;
            }
            // Original sequence preserved: the item keeps its position
            // within its priority tier.
            inner.queue.push(key);
        }
        RetryVerdict::Exhausted(attempts) => {
            record_state_transition(span, "running", "failed");
            let error =
                format!("rate limit retries exhausted after {attempts} attempts: {message}");
            finalize(inner, key.id, false, payload, Some(error)).await;
        }
    }
}

/// Terminal transition: record the outcome, move to history, persist,
/// notify, and hand the callback to the owner's inbox.
async fn finalize(
    inner: &Arc<Inner>,
    id: WorkItemId,
    success: bool,
    payload: serde_json::Value,
    error: Option<String>,
) {
    let snap = snapshot::json_safe(&payload);
    let (job, callback) = {
        let mut state = inner.lock_state();
        let Some(mut item) = state.pending.remove(&id) else {
            return;
        };
        item.status = if success {
            Status::Completed
        } else {
            Status::Failed
        };
        item.completed_at = Some(Utc::now());
        item.error = error.clone();
        item.response_data = Some(snap.clone());
        item.result = Some(OutcomeRecord {
            success,
            payload: snap.clone(),
        });
        state.history.record(item);
        (state.persist_job(), state.callbacks.remove(&id))
    };
    flush_job(job).await;

    if success {
        info!(%id, "work item completed");
    } else {
        warn!(%id, error = error.as_deref().unwrap_or("-"), "work item failed");
    }
    metrics::work_finished().add(
        1,
        &[KeyValue::new("result", if success { "ok" } else { "error" })],
    );

    inner.events.emit(EventKind::ItemFinished {
        id,
        success,
        payload: snap.clone(),
    });

    if let Some(callback) = callback {
        // Fire-and-forget: the worker never waits on callback execution.
        let _ = inner.callbacks.send(CallbackInvocation {
            id,
            success,
            payload: snap,
            callback,
        });
    }
}

/// Sleep out a backoff in ≤1s granules, returning early on stop.
async fn backoff(inner: &Arc<Inner>, total: Duration) {
    let deadline = Instant::now() + total;
    while !inner.stopping() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let chunk = (deadline - now).min(BACKOFF_GRANULE);
        tokio::time::sleep(chunk).await;
    }
}

/// Pull a human-readable message out of a failure payload: a structured
/// `message` field, a bare string, or the raw JSON as a last resort.
fn failure_message(payload: &serde_json::Value) -> String {
    payload
        .get("message")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .or_else(|| payload.as_str().map(str::to_string))
        .unwrap_or_else(|| payload.to_string())
}
