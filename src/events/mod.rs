//! Events
//!
//! Event types, the publisher, the partitioned bus with its broadcast
//! pub/sub companion, and the router that turns events into deliveries.

pub mod bus;
pub mod publisher;
pub mod router;
pub mod types;

pub use bus::{
    BroadcastPubSub, BusError, BusRecord, EventBus, PartitionedEventBus, PubSub, PubSubMessage,
    partition_for,
};
pub use publisher::EventPublisher;
pub use router::{NotificationRouter, RouteReport};
pub use types::{Event, EventPayload, EventType};
