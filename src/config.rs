use serde::Deserialize;
use std::env;

use crate::constants::{
    DEPOSIT_INTENT_TTL_HOURS, DEPOSIT_RECONCILE_INTERVAL_SECS, GAME_WALLET_ADDRESS, MAX_TTL_HOURS,
    SESSION_TTL_HOURS, TONCENTER_API_URL, TON_VERIFY_TIMEOUT_SECS,
    WITHDRAWAL_MONITOR_INTERVAL_SECS, WITHDRAWAL_LOG_PATH,
};
use crate::utils::is_valid_ton_address;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: String,

    // Database (None -> in-memory store)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Redis (None -> in-memory sessions)
    pub redis_url: Option<String>,
    pub session_ttl_hours: i64,

    // Telegram
    pub telegram_bot_token: Option<String>,

    // TON
    pub game_wallet_address: String,
    pub ton_real_transactions: bool,
    pub toncenter_api_url: String,
    pub toncenter_api_key: Option<String>,
    pub ton_verify_timeout_secs: u64,
    pub ton_verify_fail_open: bool,

    // Background jobs
    pub withdrawal_monitor_interval_secs: u64,
    pub deposit_reconcile_interval_secs: u64,
    pub deposit_intent_ttl_hours: i64,
    pub withdrawal_refund_on_failure: bool,
    pub withdrawal_log_path: String,

    // Admin
    pub admin_manual_key: Option<String>,

    // CORS
    pub cors_allowed_origins: String,
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "y" | "on"
            )
        })
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let is_production = environment.eq_ignore_ascii_case("production");

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            environment,

            database_url: env_opt("DATABASE_URL"),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            redis_url: env_opt("REDIS_URL"),
            session_ttl_hours: env::var("SESSION_TTL_HOURS")
                .unwrap_or_else(|_| SESSION_TTL_HOURS.to_string())
                .parse()?,

            telegram_bot_token: env_opt("TELEGRAM_BOT_TOKEN"),

            game_wallet_address: env::var("GAME_WALLET_ADDRESS")
                .unwrap_or_else(|_| GAME_WALLET_ADDRESS.to_string()),
            ton_real_transactions: env_flag("TON_REAL_TRANSACTIONS", false),
            toncenter_api_url: env::var("TONCENTER_API_URL")
                .unwrap_or_else(|_| TONCENTER_API_URL.to_string()),
            toncenter_api_key: env_opt("TONCENTER_API_KEY"),
            ton_verify_timeout_secs: env::var("TON_VERIFY_TIMEOUT_SECS")
                .unwrap_or_else(|_| TON_VERIFY_TIMEOUT_SECS.to_string())
                .parse()?,
            ton_verify_fail_open: env_flag("TON_VERIFY_FAIL_OPEN", !is_production),

            withdrawal_monitor_interval_secs: env::var("WITHDRAWAL_MONITOR_INTERVAL_SECS")
                .unwrap_or_else(|_| WITHDRAWAL_MONITOR_INTERVAL_SECS.to_string())
                .parse()?,
            deposit_reconcile_interval_secs: env::var("DEPOSIT_RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| DEPOSIT_RECONCILE_INTERVAL_SECS.to_string())
                .parse()?,
            deposit_intent_ttl_hours: env::var("DEPOSIT_INTENT_TTL_HOURS")
                .unwrap_or_else(|_| DEPOSIT_INTENT_TTL_HOURS.to_string())
                .parse()?,
            withdrawal_refund_on_failure: env_flag("WITHDRAWAL_REFUND_ON_FAILURE", true),
            withdrawal_log_path: env::var("WITHDRAWAL_LOG_PATH")
                .unwrap_or_else(|_| WITHDRAWAL_LOG_PATH.to_string()),

            admin_manual_key: env_opt("ADMIN_MANUAL_KEY"),

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_valid_ton_address(&self.game_wallet_address) {
            anyhow::bail!("GAME_WALLET_ADDRESS is not a valid TON address");
        }
        if self.withdrawal_monitor_interval_secs == 0 || self.deposit_reconcile_interval_secs == 0 {
            anyhow::bail!("Background job intervals must be > 0");
        }
        if !(1..=MAX_TTL_HOURS).contains(&self.session_ttl_hours) {
            anyhow::bail!("SESSION_TTL_HOURS must be between 1 and {}", MAX_TTL_HOURS);
        }
        if !(1..=MAX_TTL_HOURS).contains(&self.deposit_intent_ttl_hours) {
            anyhow::bail!("DEPOSIT_INTENT_TTL_HOURS must be between 1 and {}", MAX_TTL_HOURS);
        }
        if self.ton_verify_timeout_secs == 0 {
            anyhow::bail!("TON_VERIFY_TIMEOUT_SECS must be > 0");
        }

        if self.database_url.is_none() {
            tracing::warn!("DATABASE_URL not set; balances are kept in memory and lost on restart");
        }
        if self.redis_url.is_none() {
            tracing::warn!("REDIS_URL not set; sessions are per-process");
        }
        if self.telegram_bot_token.is_none() {
            tracing::warn!("TELEGRAM_BOT_TOKEN not set; Telegram login is disabled");
        }
        if !self.ton_real_transactions {
            tracing::warn!("TON_REAL_TRANSACTIONS disabled; deposits are verified by simulation");
        } else if self.toncenter_api_key.is_none() {
            tracing::warn!("TONCENTER_API_KEY not set; Toncenter requests will be rate limited");
        }
        if self.ton_verify_fail_open && self.is_production() {
            tracing::warn!(
                "TON_VERIFY_FAIL_OPEN is enabled in production: unverifiable deposits will be credited"
            );
        }
        if !self.withdrawal_refund_on_failure {
            tracing::warn!("Failed withdrawals are held for manual review (no automatic refund)");
        }
        if self.admin_manual_key.is_none() {
            tracing::warn!("ADMIN_MANUAL_KEY not set; admin endpoints are disabled");
        }
        if self.cors_allowed_origins.trim().is_empty() {
            tracing::warn!("CORS_ALLOWED_ORIGINS is empty; requests may be blocked");
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
impl Config {
    pub fn sample() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 5000,
            environment: "development".to_string(),
            database_url: None,
            database_max_connections: 1,
            redis_url: None,
            session_ttl_hours: 24,
            telegram_bot_token: Some("123456:TEST-TOKEN".to_string()),
            game_wallet_address: GAME_WALLET_ADDRESS.to_string(),
            ton_real_transactions: false,
            toncenter_api_url: TONCENTER_API_URL.to_string(),
            toncenter_api_key: None,
            ton_verify_timeout_secs: 1,
            ton_verify_fail_open: true,
            withdrawal_monitor_interval_secs: 60,
            deposit_reconcile_interval_secs: 60,
            deposit_intent_ttl_hours: 24,
            withdrawal_refund_on_failure: true,
            withdrawal_log_path: "withdrawal-transactions.txt".to_string(),
            admin_manual_key: Some("admin-secret".to_string()),
            cors_allowed_origins: "*".to_string(),
        }
    }
}
