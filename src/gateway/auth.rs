//! Actor identity extraction.
//!
//! Authentication itself happens upstream; the gateway trusts the actor
//! header and makes it available to handlers and the idempotency layer.

use axum::{body::Body, http::Request, middleware::Next, response::Response};

use super::types::ApiError;
use crate::core_types::ActorId;

pub const ACTOR_HEADER: &str = "x-actor-id";

const MAX_ACTOR_LEN: usize = 128;

/// Authenticated caller, inserted into request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub ActorId);

/// Attach an [`Actor`] when the header is present. A malformed header is
/// rejected; an absent one passes through.
pub async fn actor_middleware(mut request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    if let Some(value) = request.headers().get(ACTOR_HEADER) {
        let actor = value
            .to_str()
            .ok()
            .map(str::trim)
            .filter(|a| !a.is_empty() && a.len() <= MAX_ACTOR_LEN)
            .ok_or_else(|| ApiError::unauthorized("invalid actor header"))?
            .to_string();
        request.extensions_mut().insert(Actor(actor));
    }
    Ok(next.run(request).await)
}
