use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Duration;
use url::Url;

use crate::{
    config::Config,
    constants::{SIMULATED_DEPOSIT_NANO, SIMULATED_SOURCE_ADDRESS, TONCENTER_SCAN_LIMIT},
    error::{AppError, Result},
    utils::parse_nano,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationSource {
    /// Matched a transaction on the external ledger.
    Chain,
    /// Synthetic result (demo mode or fail-open fallback).
    Simulated,
    NotFound,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub verified: bool,
    pub amount_nano: Option<i64>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub source: VerificationSource,
}

impl Verification {
    pub fn simulated(game_wallet: &str) -> Self {
        Self {
            verified: true,
            amount_nano: Some(SIMULATED_DEPOSIT_NANO),
            from_address: Some(SIMULATED_SOURCE_ADDRESS.to_string()),
            to_address: Some(game_wallet.to_string()),
            source: VerificationSource::Simulated,
        }
    }

    fn unverified(source: VerificationSource) -> Self {
        Self {
            verified: false,
            amount_nano: None,
            from_address: None,
            to_address: None,
            source,
        }
    }

    pub fn is_on_chain(&self) -> bool {
        self.verified && self.source == VerificationSource::Chain
    }
}

/// Confirms that a transaction hash landed in the game wallet.
///
/// Implementations never retry; callers decide what to do with an
/// unverified result.
#[async_trait]
pub trait LedgerVerifier: Send + Sync {
    async fn verify(&self, tx_hash: &str) -> Verification;
}

pub fn build_verifier(config: &Config) -> Result<std::sync::Arc<dyn LedgerVerifier>> {
    if config.ton_real_transactions {
        Ok(std::sync::Arc::new(ToncenterVerifier::new(config)?))
    } else {
        Ok(std::sync::Arc::new(SimulatedVerifier::new(
            &config.game_wallet_address,
        )))
    }
}

// ==================== SIMULATED ====================

pub struct SimulatedVerifier {
    game_wallet: String,
}

impl SimulatedVerifier {
    pub fn new(game_wallet: &str) -> Self {
        Self {
            game_wallet: game_wallet.to_string(),
        }
    }
}

#[async_trait]
impl LedgerVerifier for SimulatedVerifier {
    async fn verify(&self, tx_hash: &str) -> Verification {
        tracing::debug!("Simulated verification for {}", tx_hash);
        Verification::simulated(&self.game_wallet)
    }
}

// ==================== TONCENTER ====================

pub struct ToncenterVerifier {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    game_wallet: String,
    fail_open: bool,
}

impl ToncenterVerifier {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(config.ton_verify_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Toncenter HTTP client init failed: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.toncenter_api_url.clone(),
            api_key: config.toncenter_api_key.clone(),
            game_wallet: config.game_wallet_address.clone(),
            fail_open: config.ton_verify_fail_open,
        })
    }

    fn transactions_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/getTransactions",
            self.api_url.trim_end_matches('/')
        ))
        .map_err(|e| AppError::Internal(format!("Invalid Toncenter URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("address", &self.game_wallet)
            .append_pair("limit", &TONCENTER_SCAN_LIMIT.to_string());
        Ok(url)
    }

    async fn fetch_recent(&self) -> Result<Value> {
        let mut request = self.client.get(self.transactions_url()?);
        if let Some(key) = self.api_key.as_deref() {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Toncenter request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalAPI(format!(
                "Toncenter returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Toncenter parse failed: {}", e)))
    }

    fn fallback(&self, tx_hash: &str, source: VerificationSource) -> Verification {
        if self.fail_open {
            tracing::warn!(
                "Falling back to simulated verification for {} ({:?})",
                tx_hash,
                source
            );
            Verification::simulated(&self.game_wallet)
        } else {
            Verification::unverified(source)
        }
    }
}

/// Finds `tx_hash` among a `getTransactions` response body.
fn match_transaction(body: &Value, tx_hash: &str, game_wallet: &str) -> Option<Verification> {
    let entries = body.get("result")?.as_array()?;
    let entry = entries.iter().find(|tx| {
        tx.pointer("/transaction_id/hash").and_then(Value::as_str) == Some(tx_hash)
    })?;

    let amount_nano = entry
        .pointer("/in_msg/value")
        .and_then(|v| match v {
            Value::String(raw) => parse_nano(raw).ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        });
    let from_address = entry
        .pointer("/in_msg/source")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(Verification {
        verified: true,
        amount_nano,
        from_address,
        to_address: Some(game_wallet.to_string()),
        source: VerificationSource::Chain,
    })
}

#[async_trait]
impl LedgerVerifier for ToncenterVerifier {
    async fn verify(&self, tx_hash: &str) -> Verification {
        match self.fetch_recent().await {
            Ok(body) => match match_transaction(&body, tx_hash, &self.game_wallet) {
                Some(found) => {
                    tracing::info!("Transaction {} found on chain", tx_hash);
                    found
                }
                None => self.fallback(tx_hash, VerificationSource::NotFound),
            },
            Err(e) => {
                tracing::warn!("Toncenter verification of {} failed: {}", tx_hash, e);
                self.fallback(tx_hash, VerificationSource::Unavailable)
            }
        }
    }
}
