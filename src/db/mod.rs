use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    config::Config,
    error::{AppError, Result},
    models::*,
};

pub mod memory;

pub use memory::MemoryStore;

/// Persistence seam for users, deposits and withdrawals.
///
/// Every method that touches more than one row is atomic: implementations
/// either apply all of it or nothing.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    // users
    async fn upsert_telegram_user(
        &self,
        telegram_id: i64,
        username: &str,
        referral_code: Option<&str>,
    ) -> Result<User>;
    async fn get_user(&self, user_id: i64) -> Result<Option<User>>;
    async fn update_last_active(&self, user_id: i64) -> Result<()>;
    async fn save_wallet_address(&self, user_id: i64, address: &str) -> Result<Option<User>>;

    // balances
    /// Credits `amount_nano` once per `tx_hash` and confirms the matching intent.
    async fn credit_deposit(
        &self,
        user_id: i64,
        tx_hash: &str,
        amount_nano: i64,
    ) -> Result<CreditOutcome>;
    /// Signed adjustment; `None` when the user is missing or the result would be negative.
    async fn adjust_balance(&self, user_id: i64, delta_nano: i64) -> Result<Option<i64>>;

    // deposit intents
    /// Inserts a pending intent, or returns the existing one for this hash.
    async fn insert_deposit_intent(
        &self,
        tx_hash: &str,
        user_id: i64,
        claimed_nano: i64,
        from_address: Option<&str>,
    ) -> Result<DepositIntent>;
    async fn get_deposit_intent(&self, tx_hash: &str) -> Result<Option<DepositIntent>>;
    async fn pending_deposit_intents(&self) -> Result<Vec<DepositIntent>>;
    async fn reject_deposit_intent(&self, tx_hash: &str, note: &str) -> Result<bool>;

    // withdrawals
    /// Debits the balance and records a pending withdrawal in one step.
    async fn create_withdrawal(
        &self,
        user_id: i64,
        amount_nano: i64,
        to_address: &str,
    ) -> Result<Option<(WithdrawalTransaction, i64)>>;
    async fn pending_withdrawals(&self) -> Result<Vec<WithdrawalTransaction>>;
    /// `pending -> processing`; false if another worker claimed it first.
    async fn claim_withdrawal(&self, id: i64) -> Result<bool>;
    /// `pending | processing -> completed`; false if the row was already settled.
    async fn complete_withdrawal(&self, id: i64, tx_hash: &str, note: &str) -> Result<bool>;
    /// `pending | processing -> failed`, optionally returning the debited amount to the user.
    async fn fail_withdrawal(&self, id: i64, note: &str, refund: bool) -> Result<bool>;
    async fn user_withdrawals(&self, user_id: i64) -> Result<Vec<WithdrawalTransaction>>;
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        // migrations live at the crate root: ./migrations
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// ==================== USER QUERIES ====================
#[async_trait]
impl LedgerStore for Database {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_telegram_user(
        &self,
        telegram_id: i64,
        username: &str,
        referral_code: Option<&str>,
    ) -> Result<User> {
        // referred_by_id is only resolved on first insert
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (telegram_id, username, referral_code, referred_by_id, last_active)
            VALUES ($1, $2, $3, (SELECT id FROM users WHERE referral_code = $4), NOW())
            ON CONFLICT (telegram_id) DO UPDATE
            SET username    = EXCLUDED.username,
                last_active = NOW()
            RETURNING *
            "#,
        )
        .bind(telegram_id)
        .bind(username)
        .bind(crate::utils::new_referral_code())
        .bind(referral_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update_last_active(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET last_active = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_wallet_address(&self, user_id: i64, address: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET wallet_address = $2 WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    // ==================== BALANCE QUERIES ====================
    async fn credit_deposit(
        &self,
        user_id: i64,
        tx_hash: &str,
        amount_nano: i64,
    ) -> Result<CreditOutcome> {
        let mut tx = self.pool.begin().await?;

        // The primary key on credited_deposits is the idempotency guard:
        // a concurrent credit of the same hash blocks here, then inserts nothing.
        let inserted = sqlx::query(
            "INSERT INTO credited_deposits (tx_hash, user_id, amount_nano)
             VALUES ($1, $2, $3)
             ON CONFLICT (tx_hash) DO NOTHING",
        )
        .bind(tx_hash)
        .bind(user_id)
        .bind(amount_nano)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let (owner, amount): (i64, i64) = sqlx::query_as(
                "SELECT user_id, amount_nano FROM credited_deposits WHERE tx_hash = $1",
            )
            .bind(tx_hash)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(CreditOutcome::AlreadyApplied {
                user_id: owner,
                amount_nano: amount,
            });
        }

        let new_balance: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET balance_nano = balance_nano + $2 WHERE id = $1 RETURNING balance_nano",
        )
        .bind(user_id)
        .bind(amount_nano)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(new_balance) = new_balance else {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        };

        sqlx::query(
            "UPDATE deposit_intents
             SET status = 'confirmed', credited_nano = $2, updated_at = NOW()
             WHERE tx_hash = $1",
        )
        .bind(tx_hash)
        .bind(amount_nano)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CreditOutcome::Applied {
            new_balance_nano: new_balance,
        })
    }

    async fn adjust_balance(&self, user_id: i64, delta_nano: i64) -> Result<Option<i64>> {
        let new_balance: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET balance_nano = balance_nano + $2
             WHERE id = $1 AND balance_nano + $2 >= 0
             RETURNING balance_nano",
        )
        .bind(user_id)
        .bind(delta_nano)
        .fetch_optional(&self.pool)
        .await?;
        Ok(new_balance)
    }

    // ==================== DEPOSIT INTENT QUERIES ====================
    async fn insert_deposit_intent(
        &self,
        tx_hash: &str,
        user_id: i64,
        claimed_nano: i64,
        from_address: Option<&str>,
    ) -> Result<DepositIntent> {
        let inserted = sqlx::query_as::<_, DepositIntent>(
            r#"
            INSERT INTO deposit_intents (tx_hash, user_id, claimed_nano, from_address, status)
            VALUES ($1, $2, $3, $4, 'pending')
            ON CONFLICT (tx_hash) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(tx_hash)
        .bind(user_id)
        .bind(claimed_nano)
        .bind(from_address)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(intent) => Ok(intent),
            None => self
                .get_deposit_intent(tx_hash)
                .await?
                .ok_or_else(|| AppError::Internal(format!("Deposit intent {} vanished", tx_hash))),
        }
    }

    async fn get_deposit_intent(&self, tx_hash: &str) -> Result<Option<DepositIntent>> {
        let intent =
            sqlx::query_as::<_, DepositIntent>("SELECT * FROM deposit_intents WHERE tx_hash = $1")
                .bind(tx_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(intent)
    }

    async fn pending_deposit_intents(&self) -> Result<Vec<DepositIntent>> {
        let intents = sqlx::query_as::<_, DepositIntent>(
            "SELECT * FROM deposit_intents WHERE status = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(intents)
    }

    async fn reject_deposit_intent(&self, tx_hash: &str, note: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE deposit_intents SET status = 'rejected', note = $2, updated_at = NOW()
             WHERE tx_hash = $1 AND status = 'pending'",
        )
        .bind(tx_hash)
        .bind(note)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    // ==================== WITHDRAWAL QUERIES ====================
    async fn create_withdrawal(
        &self,
        user_id: i64,
        amount_nano: i64,
        to_address: &str,
    ) -> Result<Option<(WithdrawalTransaction, i64)>> {
        let mut tx = self.pool.begin().await?;

        let new_balance: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET balance_nano = balance_nano - $2
             WHERE id = $1 AND balance_nano >= $2
             RETURNING balance_nano",
        )
        .bind(user_id)
        .bind(amount_nano)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(new_balance) = new_balance else {
            tx.rollback().await?;
            return Ok(None);
        };

        let withdrawal = sqlx::query_as::<_, WithdrawalTransaction>(
            r#"
            INSERT INTO withdrawal_transactions (user_id, amount_nano, to_address, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(amount_nano)
        .bind(to_address)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((withdrawal, new_balance)))
    }

    async fn pending_withdrawals(&self) -> Result<Vec<WithdrawalTransaction>> {
        let rows = sqlx::query_as::<_, WithdrawalTransaction>(
            "SELECT * FROM withdrawal_transactions WHERE status = 'pending' ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn claim_withdrawal(&self, id: i64) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE withdrawal_transactions SET status = 'processing'
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn complete_withdrawal(&self, id: i64, tx_hash: &str, note: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE withdrawal_transactions
             SET status = 'completed', tx_hash = $2, note = $3, processed_at = NOW()
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .bind(tx_hash)
        .bind(note)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn fail_withdrawal(&self, id: i64, note: &str, refund: bool) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let failed: Option<(i64, i64)> = sqlx::query_as(
            "UPDATE withdrawal_transactions
             SET status = 'failed', note = $2, refunded = $3, processed_at = NOW()
             WHERE id = $1 AND status IN ('pending', 'processing')
             RETURNING user_id, amount_nano",
        )
        .bind(id)
        .bind(note)
        .bind(refund)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, amount_nano)) = failed else {
            tx.rollback().await?;
            return Ok(false);
        };

        if refund {
            sqlx::query("UPDATE users SET balance_nano = balance_nano + $2 WHERE id = $1")
                .bind(user_id)
                .bind(amount_nano)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn user_withdrawals(&self, user_id: i64) -> Result<Vec<WithdrawalTransaction>> {
        let rows = sqlx::query_as::<_, WithdrawalTransaction>(
            "SELECT * FROM withdrawal_transactions WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
