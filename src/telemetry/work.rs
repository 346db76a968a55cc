//! Work item execution span helpers.
//!
//! Provides span creation and state-transition recording for items
//! flowing through the queue engine.

use opentelemetry::KeyValue;
use tracing::Span;

use crate::model::WorkItemId;

use super::metrics;

/// Start a span for one work item execution.
///
/// The `work.state` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_item_span(action: &str, id: &WorkItemId) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.action" = action,
        "work.id" = %id,
        "work.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the given span and bump the transition
/// counter.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
    metrics::work_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}
