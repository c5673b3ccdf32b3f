//! DLQ entry status machine.
//!
//! ```text
//! add ──▶ pending ──claim──▶ retrying ──ok──▶ succeeded
//!           ▲  │                 │
//!           │  └─expires─▶ expired
//!           │                    └──fail──▶ pending | exhausted
//!           └──── replay (from any status)
//!
//! abandon: pending | retrying ──▶ abandoned
//! ```

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DlqStatus {
    /// Scheduled; `next_retry_at` is set
    Pending,
    /// Claimed by a sweeper
    Retrying,
    Succeeded,
    /// Attempt budget spent
    Exhausted,
    /// Passed `expires_at` while pending
    Expired,
    /// Manually given up
    Abandoned,
}

impl DlqStatus {
    pub const ALL: [DlqStatus; 6] = [
        DlqStatus::Pending,
        DlqStatus::Retrying,
        DlqStatus::Succeeded,
        DlqStatus::Exhausted,
        DlqStatus::Expired,
        DlqStatus::Abandoned,
    ];

    /// Only `replay` leaves a terminal status
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DlqStatus::Pending | DlqStatus::Retrying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DlqStatus::Pending => "pending",
            DlqStatus::Retrying => "retrying",
            DlqStatus::Succeeded => "succeeded",
            DlqStatus::Exhausted => "exhausted",
            DlqStatus::Expired => "expired",
            DlqStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for DlqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DlqStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DlqStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown dlq status: {}", s))
    }
}
