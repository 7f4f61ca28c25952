use async_trait::async_trait;

use crate::{error::Result, models::WithdrawalTransaction};

/// Sends funds for a pending withdrawal and returns the payout reference.
#[async_trait]
pub trait PayoutGateway: Send + Sync {
    async fn send(&self, withdrawal: &WithdrawalTransaction) -> Result<String>;
}

/// Demo payout: succeeds immediately with a synthetic reference.
#[derive(Debug, Default)]
pub struct SimulatedPayout;

#[async_trait]
impl PayoutGateway for SimulatedPayout {
    async fn send(&self, withdrawal: &WithdrawalTransaction) -> Result<String> {
        let reference = format!(
            "tx_{}_{}",
            chrono::Utc::now().timestamp_millis(),
            hex::encode(rand::random::<[u8; 6]>())
        );
        tracing::info!(
            "Simulated payout of {} nanoTON to {} ({})",
            withdrawal.amount_nano,
            withdrawal.to_address,
            reference
        );
        Ok(reference)
    }
}
