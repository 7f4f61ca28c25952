use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::utils::serialize_ton;

// ==================== USER ====================
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub telegram_id: Option<i64>,
    pub username: String,
    #[serde(rename = "balance", serialize_with = "serialize_ton")]
    pub balance_nano: i64,
    #[serde(rename = "totalReward", serialize_with = "serialize_ton")]
    pub total_reward_nano: i64,
    pub wallet_address: Option<String>,
    pub referral_code: String,
    pub referred_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_active: Option<DateTime<Utc>>,
}

// ==================== API RESPONSE ====================
/// Flat success envelope: `{ "success": true, ...fields of T }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
