//! Idempotency Store
//!
//! Deduplicates retried client requests by (actor, client key). A hit
//! replays the stored status and body without re-executing the operation;
//! server errors are never cached so infra failures stay retryable.

pub mod db;
pub mod middleware;
pub mod store;

pub use db::PgIdempotencyStore;
pub use middleware::{IDEMPOTENCY_KEY_HEADER, IdempotencyLayer, idempotency_middleware};
pub use store::{
    CachedResponse, IdempotencyError, IdempotencyStore, InMemoryIdempotencyStore, SaveOutcome,
};
