//! Idempotency store contract and the in-memory implementation.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::error::ErrorClass;

/// The exact outcome previously returned for an (actor, key)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        if let Some(ct) = self.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
            response.headers_mut().insert(header::CONTENT_TYPE, ct);
        }
        response
    }
}

/// Result of a `save` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// This writer's record is now authoritative
    Stored,
    /// Another writer won the race; the existing record is untouched
    AlreadyExists,
}

#[derive(Error, Debug, Clone)]
pub enum IdempotencyError {
    #[error("Idempotency key requires an authenticated actor")]
    MissingActor,

    #[error("Invalid idempotency key: {0}")]
    InvalidKey(String),

    #[error("Idempotency storage error: {0}")]
    Storage(String),
}

impl IdempotencyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IdempotencyError::MissingActor => ErrorClass::Authentication,
            IdempotencyError::InvalidKey(_) => ErrorClass::Validation,
            IdempotencyError::Storage(_) => ErrorClass::TransientInfra,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            IdempotencyError::MissingActor => "IDEMPOTENCY_ACTOR_REQUIRED",
            IdempotencyError::InvalidKey(_) => "INVALID_IDEMPOTENCY_KEY",
            IdempotencyError::Storage(_) => "IDEMPOTENCY_STORAGE_ERROR",
        }
    }
}

impl From<sqlx::Error> for IdempotencyError {
    fn from(e: sqlx::Error) -> Self {
        IdempotencyError::Storage(e.to_string())
    }
}

/// Insert-only cache of prior outcomes keyed by (actor, client key).
///
/// Implementations must never overwrite an existing record: a losing
/// concurrent `save` reports [`SaveOutcome::AlreadyExists`].
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn lookup(
        &self,
        actor: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, IdempotencyError>;

    async fn save(
        &self,
        actor: &str,
        key: &str,
        response: &CachedResponse,
    ) -> Result<SaveOutcome, IdempotencyError>;

    /// Delete records older than `age`, returning how many were removed
    async fn purge_older_than(&self, age: Duration) -> Result<u64, IdempotencyError>;
}

struct StoredRecord {
    response: CachedResponse,
    created_at: Instant,
}

/// Process-local store for single-instance deployments and tests
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: DashMap<(String, String), StoredRecord>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn lookup(
        &self,
        actor: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, IdempotencyError> {
        Ok(self
            .records
            .get(&(actor.to_string(), key.to_string()))
            .map(|r| r.response.clone()))
    }

    async fn save(
        &self,
        actor: &str,
        key: &str,
        response: &CachedResponse,
    ) -> Result<SaveOutcome, IdempotencyError> {
        match self.records.entry((actor.to_string(), key.to_string())) {
            Entry::Occupied(_) => Ok(SaveOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(StoredRecord {
                    response: response.clone(),
                    created_at: Instant::now(),
                });
                Ok(SaveOutcome::Stored)
            }
        }
    }

    async fn purge_older_than(&self, age: Duration) -> Result<u64, IdempotencyError> {
        let before = self.records.len();
        self.records.retain(|_, r| r.created_at.elapsed() < age);
        Ok((before - self.records.len()) as u64)
    }
}
