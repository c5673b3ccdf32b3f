//! External collaborators of the engine: bank gateway and ledger service.
//!
//! The ledger exposes no multi-leg atomic primitive: every leg is one
//! `record_transaction` call, deduplicated on the ledger side by its
//! reference id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::ledger::LedgerLeg;

#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("invalid upstream response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AdapterError::Decode(e.to_string())
        } else {
            AdapterError::Transport(e.to_string())
        }
    }
}

/// Bank answer to a charge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeResult {
    Approved { charge_id: String },
    Declined { decline_code: String },
}

#[async_trait]
pub trait BankGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Charge a payment method. `reference` is the intent id, forwarded as
    /// the bank-side idempotency key.
    async fn charge(
        &self,
        amount: i64,
        currency: &str,
        payment_method_token: &str,
        reference: &str,
    ) -> Result<ChargeResult, AdapterError>;
}

/// Ledger acknowledgement for one leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub transaction_id: String,
    pub status: String,
}

#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn record_transaction(&self, leg: &LedgerLeg) -> Result<LedgerReceipt, AdapterError>;
}

// ============================================================================
// HTTP implementations
// ============================================================================

#[derive(Serialize)]
struct ChargeBody<'a> {
    amount: i64,
    currency: &'a str,
    payment_method: &'a str,
}

#[derive(Deserialize)]
struct ChargeReply {
    status: String,
    #[serde(default)]
    charge_id: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AdapterError::Upstream {
        status: status.as_u16(),
        body,
    })
}

/// JSON-over-HTTP bank gateway client
pub struct HttpBankGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBankGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BankGateway for HttpBankGateway {
    fn name(&self) -> &'static str {
        "http-bank"
    }

    async fn charge(
        &self,
        amount: i64,
        currency: &str,
        payment_method_token: &str,
        reference: &str,
    ) -> Result<ChargeResult, AdapterError> {
        let resp = self
            .client
            .post(format!("{}/v1/charges", self.base_url))
            .header("Idempotency-Key", reference)
            .json(&ChargeBody {
                amount,
                currency,
                payment_method: payment_method_token,
            })
            .send()
            .await?;
        let reply: ChargeReply = error_for_status(resp).await?.json().await?;

        match reply.status.as_str() {
            "approved" | "succeeded" => Ok(ChargeResult::Approved {
                charge_id: reply.charge_id.unwrap_or_default(),
            }),
            "declined" => Ok(ChargeResult::Declined {
                decline_code: reply
                    .decline_code
                    .unwrap_or_else(|| "generic_decline".to_string()),
            }),
            other => Err(AdapterError::Decode(format!("unknown charge status '{}'", other))),
        }
    }
}

/// JSON-over-HTTP ledger client
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LedgerService for HttpLedgerClient {
    async fn record_transaction(&self, leg: &LedgerLeg) -> Result<LedgerReceipt, AdapterError> {
        let resp = self
            .client
            .post(format!("{}/v1/transactions", self.base_url))
            .json(leg)
            .send()
            .await?;
        Ok(error_for_status(resp).await?.json().await?)
    }
}
