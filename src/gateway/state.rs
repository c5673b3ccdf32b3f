use std::sync::Arc;

use crate::db::Database;
use crate::dlq::DlqStore;
use crate::payment_intent::PaymentIntentEngine;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: PaymentIntentEngine,
    pub dlq: Arc<dyn DlqStore>,
    /// Absent when running on in-memory stores
    pub db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(
        engine: PaymentIntentEngine,
        dlq: Arc<dyn DlqStore>,
        db: Option<Arc<Database>>,
    ) -> Self {
        Self { engine, dlq, db }
    }
}
