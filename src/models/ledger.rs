use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::fmt;

use crate::utils::{serialize_opt_ton, serialize_ton};

// ==================== DEPOSIT ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirmed => "confirmed",
            DepositStatus::Rejected => "rejected",
        }
    }
}

impl TryFrom<String> for DepositStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(DepositStatus::Pending),
            "confirmed" => Ok(DepositStatus::Confirmed),
            "rejected" => Ok(DepositStatus::Rejected),
            other => Err(format!("unknown deposit status '{}'", other)),
        }
    }
}

/// A claimed deposit, keyed by the on-chain transaction hash.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DepositIntent {
    pub tx_hash: String,
    pub user_id: i64,
    #[serde(rename = "claimedAmount", serialize_with = "serialize_ton")]
    pub claimed_nano: i64,
    #[serde(rename = "creditedAmount", serialize_with = "serialize_opt_ton")]
    pub credited_nano: Option<i64>,
    pub from_address: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: DepositStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DepositIntent {
    pub fn is_confirmed(&self) -> bool {
        self.status == DepositStatus::Confirmed
    }
}

/// Result of crediting a deposit hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied { new_balance_nano: i64 },
    /// The hash was credited earlier; nothing changed.
    AlreadyApplied { user_id: i64, amount_nano: i64 },
}

// ==================== WITHDRAWAL ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    /// Claimed by the monitor; the payout may already be sent.
    Processing,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalStatus::Completed | WithdrawalStatus::Failed)
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for WithdrawalStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(WithdrawalStatus::Pending),
            "processing" => Ok(WithdrawalStatus::Processing),
            "completed" => Ok(WithdrawalStatus::Completed),
            "failed" => Ok(WithdrawalStatus::Failed),
            other => Err(format!("unknown withdrawal status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalTransaction {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "amount", serialize_with = "serialize_ton")]
    pub amount_nano: i64,
    pub to_address: String,
    #[sqlx(try_from = "String")]
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub note: Option<String>,
    pub refunded: bool,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}
