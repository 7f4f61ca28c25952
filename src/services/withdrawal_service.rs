use std::sync::Arc;

use crate::{
    constants::{MAX_TRANSFER_NANO, MIN_WITHDRAWAL_NANO},
    db::LedgerStore,
    error::{AppError, Result},
    models::WithdrawalTransaction,
    services::balance_service::BalanceMutator,
    utils::is_valid_ton_address,
};

#[derive(Debug, Clone)]
pub struct WithdrawalReceipt {
    pub withdrawal: WithdrawalTransaction,
    pub new_balance_nano: i64,
}

pub struct WithdrawalService {
    store: Arc<dyn LedgerStore>,
    balances: BalanceMutator,
}

impl WithdrawalService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            balances: BalanceMutator::new(store.clone()),
            store,
        }
    }

    /// Debits the balance and queues a pending payout.
    ///
    /// Falls back to the user's saved wallet when `to_address` is `None`.
    pub async fn request(
        &self,
        user_id: i64,
        amount_nano: i64,
        to_address: Option<&str>,
    ) -> Result<WithdrawalReceipt> {
        if amount_nano < MIN_WITHDRAWAL_NANO {
            return Err(AppError::BadRequest(
                "Minimum withdrawal amount is 0.02 TON".to_string(),
            ));
        }
        if amount_nano > MAX_TRANSFER_NANO {
            return Err(AppError::BadRequest(
                "Maximum withdrawal amount is 1000000 TON".to_string(),
            ));
        }

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let destination = match to_address.map(str::trim).filter(|a| !a.is_empty()) {
            Some(address) => address.to_string(),
            None => user.wallet_address.clone().ok_or_else(|| {
                AppError::BadRequest("No wallet address saved for withdrawal".to_string())
            })?,
        };
        if !is_valid_ton_address(&destination) {
            return Err(AppError::BadRequest("Invalid TON wallet address".to_string()));
        }

        if user.balance_nano < amount_nano {
            return Err(AppError::InsufficientBalance);
        }

        // the check above is advisory; the store re-checks atomically
        let (withdrawal, new_balance_nano) = self
            .balances
            .debit_for_withdrawal(user_id, amount_nano, &destination)
            .await?
            .ok_or(AppError::InsufficientBalance)?;

        tracing::info!(
            "Withdrawal {} queued: user {} -> {} ({} nanoTON)",
            withdrawal.id,
            user_id,
            destination,
            amount_nano
        );
        Ok(WithdrawalReceipt {
            withdrawal,
            new_balance_nano,
        })
    }

    pub async fn history(&self, user_id: i64) -> Result<Vec<WithdrawalTransaction>> {
        self.store.user_withdrawals(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::GAME_WALLET_ADDRESS, db::MemoryStore, models::WithdrawalStatus};

    #[tokio::test]
    async fn over_balance_request_is_rejected_without_mutation() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 5_000_000_000).await;
        let service = WithdrawalService::new(store.clone());

        let err = service
            .request(user.id, 10_000_000_000, Some(GAME_WALLET_ADDRESS))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InsufficientBalance));
        assert_eq!(store.balance_of(user.id).await, 5_000_000_000);
        assert!(service.history(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_debits_before_monitoring() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 1_000_000_000).await;
        let service = WithdrawalService::new(store.clone());

        let receipt = service
            .request(user.id, 400_000_000, Some(GAME_WALLET_ADDRESS))
            .await
            .unwrap();

        assert_eq!(receipt.new_balance_nano, 600_000_000);
        assert_eq!(receipt.withdrawal.status, WithdrawalStatus::Pending);
        assert_eq!(store.balance_of(user.id).await, 600_000_000);
    }

    #[tokio::test]
    async fn falls_back_to_saved_wallet() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 1_000_000_000).await;
        let service = WithdrawalService::new(store.clone());

        assert!(matches!(
            service.request(user.id, 100_000_000, None).await,
            Err(AppError::BadRequest(_))
        ));

        store
            .save_wallet_address(user.id, GAME_WALLET_ADDRESS)
            .await
            .unwrap();
        let receipt = service.request(user.id, 100_000_000, None).await.unwrap();
        assert_eq!(receipt.withdrawal.to_address, GAME_WALLET_ADDRESS);
    }

    #[tokio::test]
    async fn validates_amount_and_address() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 1_000_000_000).await;
        let service = WithdrawalService::new(store.clone());

        assert!(service
            .request(user.id, 10_000_000, Some(GAME_WALLET_ADDRESS))
            .await
            .is_err());
        assert!(service
            .request(user.id, 100_000_000, Some("not-an-address"))
            .await
            .is_err());
        assert!(matches!(
            service
                .request(user.id, 2_000_000 * 1_000_000_000, Some(GAME_WALLET_ADDRESS))
                .await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            service.request(999, 100_000_000, Some(GAME_WALLET_ADDRESS)).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(store.balance_of(user.id).await, 1_000_000_000);
    }
}
