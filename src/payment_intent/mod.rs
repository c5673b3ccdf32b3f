//! Payment Intent Engine
//!
//! Status machine for payment intents, the bank and ledger seams, the
//! ledger posting plan for standard and split payments, and the outbox
//! dispatcher used when postings are committed with the status change.

pub mod adapters;
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod outbox;
pub mod repository;
pub mod state;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use adapters::{
    AdapterError, BankGateway, ChargeResult, HttpBankGateway, HttpLedgerClient, LedgerReceipt,
    LedgerService,
};
pub use db::PgPaymentStore;
pub use engine::{EngineConfig, PaymentIntentEngine, live_channel};
pub use error::PaymentError;
pub use ledger::{LedgerLeg, plan_postings};
pub use outbox::{DrainReport, OutboxConfig, OutboxDispatcher};
pub use repository::{InMemoryPaymentStore, LedgerOutboxStore, OutboxRecord, PaymentIntentStore};
pub use state::PaymentIntentStatus;
pub use types::{CreatePaymentIntent, Decline, PaymentIntent, Refund};
