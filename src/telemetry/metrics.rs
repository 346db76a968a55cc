//! Metric instrument factories for relayq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"relayq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for relayq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("relayq")
}

/// Counter: number of work items enqueued.
pub fn work_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("relayq.work.enqueued")
        .with_description("Number of work items enqueued")
        .build()
}

/// Counter: work items reaching a terminal state.
/// Labels: `result` ("ok" | "error").
pub fn work_finished() -> Counter<u64> {
    meter()
        .u64_counter("relayq.work.finished")
        .with_description("Number of work items finished")
        .build()
}

/// Counter: work item state transitions.
/// Labels: `from`, `to`.
pub fn work_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("relayq.work.state_transitions")
        .with_description("Number of work item state transitions")
        .build()
}

/// Counter: rate-limit signals received from operations.
pub fn work_rate_limited() -> Counter<u64> {
    meter()
        .u64_counter("relayq.work.rate_limited")
        .with_description("Number of rate-limit signals received")
        .build()
}

/// Histogram: operation execution duration in milliseconds.
/// Labels: `action`.
pub fn work_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("relayq.work.duration_ms")
        .with_description("Operation execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
