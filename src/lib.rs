//! # relayq
//!
//! Serialized request queue for outbound API calls.
//!
//! One background worker drains a priority queue of opaque operations,
//! auto-retries server rate limits, and keeps a bounded, durable,
//! most-recent-first history of outcomes. Producers enqueue from any
//! task; callbacks are delivered through a single-consumer inbox.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod history;
pub mod model;
pub mod queue;
pub mod snapshot;
pub mod telemetry;
