//! In-process store used when `DATABASE_URL` is not configured and by tests.
//!
//! One mutex guards all state, so each trait call is atomic and per-user
//! balance updates are serialized.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use super::LedgerStore;
use crate::{
    error::{AppError, Result},
    models::*,
    utils::new_referral_code,
};

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<i64, User>,
    next_user_id: i64,
    intents: HashMap<String, DepositIntent>,
    // tx_hash -> (user_id, amount_nano)
    credited: HashMap<String, (i64, i64)>,
    withdrawals: BTreeMap<i64, WithdrawalTransaction>,
    next_withdrawal_id: i64,
}

impl MemoryState {
    fn insert_user(&mut self, telegram_id: Option<i64>, username: &str, referred_by_id: Option<i64>) -> User {
        self.next_user_id += 1;
        let user = User {
            id: self.next_user_id,
            telegram_id,
            username: username.to_string(),
            balance_nano: 0,
            total_reward_nano: 0,
            wallet_address: None,
            referral_code: new_referral_code(),
            referred_by_id,
            created_at: Utc::now(),
            last_active: Some(Utc::now()),
        };
        self.users.insert(user.id, user.clone());
        user
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    #[cfg(test)]
    fail_next_completion: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_telegram_user(
        &self,
        telegram_id: i64,
        username: &str,
        referral_code: Option<&str>,
    ) -> Result<User> {
        let mut state = self.state.lock().await;
        if let Some(user) = state
            .users
            .values_mut()
            .find(|u| u.telegram_id == Some(telegram_id))
        {
            user.username = username.to_string();
            user.last_active = Some(Utc::now());
            return Ok(user.clone());
        }

        let referrer = referral_code.and_then(|code| {
            state
                .users
                .values()
                .find(|u| u.referral_code == code)
                .map(|u| u.id)
        });
        Ok(state.insert_user(Some(telegram_id), username, referrer))
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn update_last_active(&self, user_id: i64) -> Result<()> {
        if let Some(user) = self.state.lock().await.users.get_mut(&user_id) {
            user.last_active = Some(Utc::now());
        }
        Ok(())
    }

    async fn save_wallet_address(&self, user_id: i64, address: &str) -> Result<Option<User>> {
        let mut state = self.state.lock().await;
        Ok(state.users.get_mut(&user_id).map(|user| {
            user.wallet_address = Some(address.to_string());
            user.clone()
        }))
    }

    async fn credit_deposit(
        &self,
        user_id: i64,
        tx_hash: &str,
        amount_nano: i64,
    ) -> Result<CreditOutcome> {
        let mut state = self.state.lock().await;
        if let Some(&(owner, amount)) = state.credited.get(tx_hash) {
            return Ok(CreditOutcome::AlreadyApplied {
                user_id: owner,
                amount_nano: amount,
            });
        }

        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
        let new_balance = user
            .balance_nano
            .checked_add(amount_nano)
            .ok_or_else(|| AppError::BadRequest("Balance would overflow".to_string()))?;
        user.balance_nano = new_balance;

        state
            .credited
            .insert(tx_hash.to_string(), (user_id, amount_nano));
        if let Some(intent) = state.intents.get_mut(tx_hash) {
            intent.status = DepositStatus::Confirmed;
            intent.credited_nano = Some(amount_nano);
            intent.updated_at = Utc::now();
        }

        Ok(CreditOutcome::Applied {
            new_balance_nano: new_balance,
        })
    }

    async fn adjust_balance(&self, user_id: i64, delta_nano: i64) -> Result<Option<i64>> {
        let mut state = self.state.lock().await;
        Ok(state.users.get_mut(&user_id).and_then(|user| {
            let next = user.balance_nano.checked_add(delta_nano)?;
            if next < 0 {
                return None;
            }
            user.balance_nano = next;
            Some(next)
        }))
    }

    async fn insert_deposit_intent(
        &self,
        tx_hash: &str,
        user_id: i64,
        claimed_nano: i64,
        from_address: Option<&str>,
    ) -> Result<DepositIntent> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }
        let now = Utc::now();
        let intent = state
            .intents
            .entry(tx_hash.to_string())
            .or_insert_with(|| DepositIntent {
                tx_hash: tx_hash.to_string(),
                user_id,
                claimed_nano,
                credited_nano: None,
                from_address: from_address.map(str::to_string),
                status: DepositStatus::Pending,
                note: None,
                created_at: now,
                updated_at: now,
            });
        Ok(intent.clone())
    }

    async fn get_deposit_intent(&self, tx_hash: &str) -> Result<Option<DepositIntent>> {
        Ok(self.state.lock().await.intents.get(tx_hash).cloned())
    }

    async fn pending_deposit_intents(&self) -> Result<Vec<DepositIntent>> {
        let state = self.state.lock().await;
        let mut pending: Vec<DepositIntent> = state
            .intents
            .values()
            .filter(|intent| intent.status == DepositStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.tx_hash.cmp(&b.tx_hash))
        });
        Ok(pending)
    }

    async fn reject_deposit_intent(&self, tx_hash: &str, note: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.intents.get_mut(tx_hash) {
            Some(intent) if intent.status == DepositStatus::Pending => {
                intent.status = DepositStatus::Rejected;
                intent.note = Some(note.to_string());
                intent.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_withdrawal(
        &self,
        user_id: i64,
        amount_nano: i64,
        to_address: &str,
    ) -> Result<Option<(WithdrawalTransaction, i64)>> {
        let mut state = self.state.lock().await;
        let Some(user) = state.users.get_mut(&user_id) else {
            return Ok(None);
        };
        if user.balance_nano < amount_nano {
            return Ok(None);
        }
        user.balance_nano -= amount_nano;
        let new_balance = user.balance_nano;

        state.next_withdrawal_id += 1;
        let withdrawal = WithdrawalTransaction {
            id: state.next_withdrawal_id,
            user_id,
            amount_nano,
            to_address: to_address.to_string(),
            status: WithdrawalStatus::Pending,
            tx_hash: None,
            note: None,
            refunded: false,
            created_at: Utc::now(),
            processed_at: None,
        };
        state.withdrawals.insert(withdrawal.id, withdrawal.clone());
        Ok(Some((withdrawal, new_balance)))
    }

    async fn pending_withdrawals(&self) -> Result<Vec<WithdrawalTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .values()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .cloned()
            .collect())
    }

    async fn claim_withdrawal(&self, id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.withdrawals.get_mut(&id) {
            Some(w) if w.status == WithdrawalStatus::Pending => {
                w.status = WithdrawalStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_withdrawal(&self, id: i64, tx_hash: &str, note: &str) -> Result<bool> {
        #[cfg(test)]
        if self.fail_next_completion.swap(false, Ordering::SeqCst) {
            return Err(AppError::Internal("store unavailable".to_string()));
        }

        let mut state = self.state.lock().await;
        match state.withdrawals.get_mut(&id) {
            Some(w) if !w.status.is_terminal() => {
                w.status = WithdrawalStatus::Completed;
                w.tx_hash = Some(tx_hash.to_string());
                w.note = Some(note.to_string());
                w.processed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_withdrawal(&self, id: i64, note: &str, refund: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some((user_id, amount_nano)) = state
            .withdrawals
            .get(&id)
            .filter(|w| !w.status.is_terminal())
            .map(|w| (w.user_id, w.amount_nano))
        else {
            return Ok(false);
        };

        if refund {
            let user = state
                .users
                .get_mut(&user_id)
                .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
            user.balance_nano = user.balance_nano.checked_add(amount_nano).ok_or_else(|| {
                AppError::Internal(format!("Refund of withdrawal {} would overflow", id))
            })?;
        }

        if let Some(w) = state.withdrawals.get_mut(&id) {
            w.status = WithdrawalStatus::Failed;
            w.note = Some(note.to_string());
            w.refunded = refund;
            w.processed_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn user_withdrawals(&self, user_id: i64) -> Result<Vec<WithdrawalTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .values()
            .rev()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Creates a user with a starting balance.
    pub async fn seed_user(&self, username: &str, balance_nano: i64) -> User {
        let mut state = self.state.lock().await;
        let mut user = state.insert_user(None, username, None);
        user.balance_nano = balance_nano;
        state.users.insert(user.id, user.clone());
        user
    }

    /// Makes the next `complete_withdrawal` call fail once.
    pub fn break_next_completion(&self) {
        self.fail_next_completion.store(true, Ordering::SeqCst);
    }

    pub async fn balance_of(&self, user_id: i64) -> i64 {
        self.state
            .lock()
            .await
            .users
            .get(&user_id)
            .map(|u| u.balance_nano)
            .unwrap_or_default()
    }
}
