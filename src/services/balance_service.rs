use std::sync::Arc;

use crate::{
    db::LedgerStore,
    error::{AppError, Result},
    models::{CreditOutcome, WithdrawalTransaction},
};

/// Every balance change goes through here.
#[derive(Clone)]
pub struct BalanceMutator {
    store: Arc<dyn LedgerStore>,
}

impl BalanceMutator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Credits a deposit at most once per `tx_hash`.
    pub async fn credit(&self, user_id: i64, amount_nano: i64, tx_hash: &str) -> Result<CreditOutcome> {
        if amount_nano <= 0 {
            return Err(AppError::BadRequest("Credit amount must be positive".to_string()));
        }

        let outcome = self.store.credit_deposit(user_id, tx_hash, amount_nano).await?;
        match outcome {
            CreditOutcome::Applied { new_balance_nano } => tracing::info!(
                "Credited {} nanoTON to user {} for {} (balance {})",
                amount_nano,
                user_id,
                tx_hash,
                new_balance_nano
            ),
            CreditOutcome::AlreadyApplied { user_id: owner, .. } => tracing::info!(
                "Deposit {} already credited to user {}, skipping",
                tx_hash,
                owner
            ),
        }
        Ok(outcome)
    }

    /// Debits the balance and queues a pending withdrawal in one step.
    ///
    /// Returns `None`, without touching the balance, when it is too small.
    pub async fn debit_for_withdrawal(
        &self,
        user_id: i64,
        amount_nano: i64,
        to_address: &str,
    ) -> Result<Option<(WithdrawalTransaction, i64)>> {
        if amount_nano <= 0 {
            return Err(AppError::BadRequest("Debit amount must be positive".to_string()));
        }
        let debited = self
            .store
            .create_withdrawal(user_id, amount_nano, to_address)
            .await?;
        if let Some((withdrawal, new_balance)) = &debited {
            tracing::info!(
                "Debited {} nanoTON from user {} for withdrawal {} (balance {})",
                amount_nano,
                user_id,
                withdrawal.id,
                new_balance
            );
        }
        Ok(debited)
    }

    /// Marks a withdrawal failed, returning its amount to the user when `refund` is set.
    pub async fn fail_withdrawal(&self, withdrawal_id: i64, note: &str, refund: bool) -> Result<bool> {
        let settled = self.store.fail_withdrawal(withdrawal_id, note, refund).await?;
        if settled && refund {
            tracing::info!("Refunded failed withdrawal {}", withdrawal_id);
        }
        Ok(settled)
    }

    /// Signed manual adjustment; returns `(old_balance, new_balance)`.
    pub async fn adjust(&self, user_id: i64, delta_nano: i64) -> Result<(i64, i64)> {
        if delta_nano == 0 {
            return Err(AppError::BadRequest("Adjustment amount must be non-zero".to_string()));
        }
        if self.store.get_user(user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }

        let new_balance = self
            .store
            .adjust_balance(user_id, delta_nano)
            .await?
            .ok_or(AppError::InsufficientBalance)?;
        tracing::warn!(
            "Manual balance adjustment for user {}: {:+} nanoTON (balance {})",
            user_id,
            delta_nano,
            new_balance
        );
        Ok((new_balance - delta_nano, new_balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::GAME_WALLET_ADDRESS, db::MemoryStore};

    #[tokio::test]
    async fn debit_larger_than_balance_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 5_000_000_000).await;
        let balances = BalanceMutator::new(store.clone());

        let refused = balances
            .debit_for_withdrawal(user.id, 10_000_000_000, GAME_WALLET_ADDRESS)
            .await
            .unwrap();
        assert!(refused.is_none());
        assert_eq!(store.balance_of(user.id).await, 5_000_000_000);
        assert!(store.pending_withdrawals().await.unwrap().is_empty());

        let (withdrawal, new_balance) = balances
            .debit_for_withdrawal(user.id, 5_000_000_000, GAME_WALLET_ADDRESS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new_balance, 0);
        assert_eq!(withdrawal.amount_nano, 5_000_000_000);
        assert_eq!(store.balance_of(user.id).await, 0);
    }

    #[tokio::test]
    async fn failed_withdrawal_refunds_once() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 1_000).await;
        let balances = BalanceMutator::new(store.clone());
        let (withdrawal, _) = balances
            .debit_for_withdrawal(user.id, 400, GAME_WALLET_ADDRESS)
            .await
            .unwrap()
            .unwrap();

        assert!(balances.fail_withdrawal(withdrawal.id, "offline", true).await.unwrap());
        assert!(!balances.fail_withdrawal(withdrawal.id, "offline", true).await.unwrap());
        assert_eq!(store.balance_of(user.id).await, 1_000);
    }

    #[tokio::test]
    async fn credit_reports_prior_application() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 0).await;
        let balances = BalanceMutator::new(store.clone());

        let first = balances.credit(user.id, 50_000_000, "hashA").await.unwrap();
        let second = balances.credit(user.id, 70_000_000, "hashA").await.unwrap();

        assert_eq!(first, CreditOutcome::Applied { new_balance_nano: 50_000_000 });
        assert_eq!(
            second,
            CreditOutcome::AlreadyApplied {
                user_id: user.id,
                amount_nano: 50_000_000
            }
        );
        assert_eq!(store.balance_of(user.id).await, 50_000_000);
    }

    #[tokio::test]
    async fn adjust_returns_old_and_new_and_refuses_negative() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 100).await;
        let balances = BalanceMutator::new(store.clone());

        assert_eq!(balances.adjust(user.id, 50).await.unwrap(), (100, 150));
        assert!(matches!(
            balances.adjust(user.id, -500).await,
            Err(AppError::InsufficientBalance)
        ));
        assert!(matches!(
            balances.adjust(999, 1).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(store.balance_of(user.id).await, 150);
    }
}
