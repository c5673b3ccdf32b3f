//! Dead Letter Queue
//!
//! Durable store for deliveries that exhausted in-process retries, with a
//! long-horizon retry schedule, expiry and manual replay/abandon.

pub mod db;
pub mod memory;
pub mod schedule;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod types;

pub use db::PgDlqStore;
pub use memory::InMemoryDlqStore;
pub use schedule::RetrySchedule;
pub use state::DlqStatus;
pub use store::DlqStore;
pub use sweeper::{DlqSweeper, SweepReport};
pub use types::{DlqConfig, DlqEntry, DlqError, DlqFilter, DlqStats, NewDlqEntry};
