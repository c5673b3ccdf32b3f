//! payrail - Reliable Payment Transaction Pipeline
//!
//! # Modules
//!
//! - [`core_types`] - Identifiers, zones and actors
//! - [`idempotency`] - Request deduplication by (actor, key)
//! - [`payment_intent`] - Intent status machine, bank and ledger seams, outbox
//! - [`events`] - Event types, partitioned bus, notification router
//! - [`delivery`] - Signed webhook delivery and channel notifications
//! - [`dlq`] - Dead letter queue with scheduled retries
//! - [`subscriptions`] - Zone webhook/channel subscriptions with hot reload
//! - [`gateway`] - HTTP surface
//! - [`app`] - Wiring of all of the above

// Core types - must be first!
pub mod core_types;
pub mod error;

// Ambient
pub mod config;
pub mod config_watcher;
pub mod db;
pub mod logging;

// Pipeline components
pub mod delivery;
pub mod dlq;
pub mod events;
pub mod idempotency;
pub mod payment_intent;
pub mod subscriptions;

// Service surface
pub mod app;
pub mod gateway;

// Convenient re-exports at crate root
pub use core_types::{ActorId, DlqEntryId, EventId, Mode, PaymentIntentId, ZoneId};
pub use error::ErrorClass;
pub use payment_intent::{PaymentIntent, PaymentIntentEngine, PaymentIntentStatus};
