//! Bounded-concurrency dispatch to the single upstream backend.

pub mod backoff;
mod manager;
mod queue;

pub use manager::{ActiveRequestSnapshot, BackoffSnapshot, ConnectionManager, FetchedResponse, QueueTelemetry};
pub use queue::{CompletedRequest, QueuedRequest};
