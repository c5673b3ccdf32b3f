//! Axum middleware that replays cached outcomes for retried requests.
//!
//! Flow for a request carrying `Idempotency-Key`:
//!
//! ```text
//! actor? ──no──▶ 401
//!   │yes
//! single-flight lock (actor, key)
//!   │
//! lookup ──hit──▶ cached status + body (byte-for-byte)
//!   │miss
//! run handler ──5xx──▶ returned, never cached
//!   │<500
//! save (loser of a cross-instance race is ignored) ──▶ response
//! ```

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

use super::store::{CachedResponse, IdempotencyError, IdempotencyStore, SaveOutcome};
use crate::gateway::auth::Actor;
use crate::gateway::types::ApiError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

const MAX_KEY_LEN: usize = 255;

type KeyLocks = DashMap<(String, String), Arc<Mutex<()>>>;

/// Shared state for the idempotency middleware
#[derive(Clone)]
pub struct IdempotencyLayer {
    store: Arc<dyn IdempotencyStore>,
    in_flight: Arc<KeyLocks>,
    max_body_bytes: usize,
}

/// Holds the single-flight lock for one (actor, key) and releases the map
/// slot when the last waiter is done.
struct InFlight {
    guard: Option<OwnedMutexGuard<()>>,
    slot: (String, String),
    locks: Arc<KeyLocks>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.slot, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl IdempotencyLayer {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            in_flight: Arc::new(DashMap::new()),
            max_body_bytes: 1024 * 1024,
        }
    }

    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    async fn acquire(&self, actor: &str, key: &str) -> InFlight {
        let slot = (actor.to_string(), key.to_string());
        let lock = self
            .in_flight
            .entry(slot.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        InFlight {
            guard: Some(guard),
            slot,
            locks: self.in_flight.clone(),
        }
    }
}

fn reject(err: IdempotencyError) -> Response {
    ApiError::from(err).into_response()
}

pub async fn idempotency_middleware(
    State(layer): State<IdempotencyLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = match request.headers().get(IDEMPOTENCY_KEY_HEADER) {
        None => return next.run(request).await,
        Some(v) => match v.to_str() {
            Ok(k) if !k.trim().is_empty() && k.len() <= MAX_KEY_LEN => k.trim().to_string(),
            _ => {
                return reject(IdempotencyError::InvalidKey(format!(
                    "must be 1..={} visible ASCII characters",
                    MAX_KEY_LEN
                )));
            }
        },
    };

    // Without an actor the key cannot be partitioned safely
    let Some(actor) = request.extensions().get::<Actor>().map(|a| a.0.clone()) else {
        return reject(IdempotencyError::MissingActor);
    };

    let _in_flight = layer.acquire(&actor, &key).await;

    match layer.store.lookup(&actor, &key).await {
        Ok(Some(cached)) => {
            debug!(actor = %actor, key = %key, status = cached.status_code, "Idempotent replay");
            return cached.into_response();
        }
        Ok(None) => {}
        Err(e) => {
            error!(actor = %actor, key = %key, error = %e, "Idempotency lookup failed");
            return reject(e);
        }
    }

    let response = next.run(request).await;
    let status = response.status();
    if status.is_server_error() {
        // Infra failures stay retryable under the same key
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, layer.max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            error!(actor = %actor, key = %key, error = %e, "Failed to buffer response body");
            return reject(IdempotencyError::Storage(format!("response body: {}", e)));
        }
    };

    let cached = CachedResponse {
        status_code: status.as_u16(),
        content_type: parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: bytes.to_vec(),
    };

    match layer.store.save(&actor, &key, &cached).await {
        Ok(SaveOutcome::Stored) => {}
        Ok(SaveOutcome::AlreadyExists) => {
            debug!(actor = %actor, key = %key, "Concurrent writer already stored outcome");
        }
        Err(e) => {
            warn!(actor = %actor, key = %key, error = %e, "Failed to save idempotency record");
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}
