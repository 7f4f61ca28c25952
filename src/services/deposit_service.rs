use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    constants::{MAX_TRANSFER_NANO, MIN_DEPOSIT_NANO, MIN_TX_HASH_LEN},
    db::LedgerStore,
    error::{AppError, Result},
    models::{CreditOutcome, DepositIntent, DepositStatus},
    services::{
        balance_service::BalanceMutator,
        ledger_verifier::{LedgerVerifier, Verification},
        scheduler::{Clock, PeriodicJob},
    },
    utils::is_valid_ton_address,
};

/// Result of a direct deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectDeposit {
    pub tx_hash: String,
    pub credited_nano: i64,
    pub already_credited: bool,
}

/// Counters from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub confirmed: usize,
    pub rejected: usize,
    pub still_pending: usize,
}

pub struct DepositRegistrar {
    store: Arc<dyn LedgerStore>,
    balances: BalanceMutator,
    verifier: Arc<dyn LedgerVerifier>,
    clock: Arc<dyn Clock>,
    intent_ttl: chrono::Duration,
}

fn validate_claim(tx_hash: &str, claimed_nano: i64, from_address: Option<&str>) -> Result<()> {
    if tx_hash.trim().len() < MIN_TX_HASH_LEN {
        return Err(AppError::BadRequest("Invalid transaction hash".to_string()));
    }
    if claimed_nano < MIN_DEPOSIT_NANO {
        return Err(AppError::BadRequest(
            "Minimum deposit amount is 0.01 TON".to_string(),
        ));
    }
    if claimed_nano > MAX_TRANSFER_NANO {
        return Err(AppError::BadRequest(
            "Maximum deposit amount is 1000000 TON".to_string(),
        ));
    }
    if let Some(address) = from_address {
        if !is_valid_ton_address(address) {
            return Err(AppError::BadRequest("Invalid TON wallet address".to_string()));
        }
    }
    Ok(())
}

impl DepositRegistrar {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        verifier: Arc<dyn LedgerVerifier>,
        clock: Arc<dyn Clock>,
        intent_ttl_hours: i64,
    ) -> Self {
        Self {
            balances: BalanceMutator::new(store.clone()),
            store,
            verifier,
            clock,
            intent_ttl: chrono::Duration::hours(intent_ttl_hours),
        }
    }

    /// Records a claimed deposit as a pending intent.
    pub async fn register(
        &self,
        user_id: i64,
        tx_hash: &str,
        claimed_nano: i64,
        from_address: &str,
    ) -> Result<DepositIntent> {
        validate_claim(tx_hash, claimed_nano, Some(from_address))?;

        let intent = self
            .store
            .insert_deposit_intent(tx_hash, user_id, claimed_nano, Some(from_address))
            .await?;
        if intent.user_id != user_id {
            return Err(AppError::Conflict(
                "Transaction hash is already registered to another account".to_string(),
            ));
        }

        tracing::info!(
            "Deposit intent {} registered for user {} ({} nanoTON, {})",
            tx_hash,
            user_id,
            claimed_nano,
            intent.status.as_str()
        );
        Ok(intent)
    }

    /// Verifies and credits a deposit in one call.
    pub async fn process_direct(
        &self,
        user_id: i64,
        claimed_nano: i64,
        tx_hash: &str,
        from_address: Option<&str>,
    ) -> Result<DirectDeposit> {
        validate_claim(tx_hash, claimed_nano, from_address)?;

        let intent = self
            .store
            .insert_deposit_intent(tx_hash, user_id, claimed_nano, from_address)
            .await?;
        if intent.user_id != user_id {
            return Err(AppError::Conflict(
                "Transaction hash is already registered to another account".to_string(),
            ));
        }
        if let Some(credited) = intent.credited_nano.filter(|_| intent.is_confirmed()) {
            return Ok(DirectDeposit {
                tx_hash: tx_hash.to_string(),
                credited_nano: credited,
                already_credited: true,
            });
        }

        let verification = self.verifier.verify(tx_hash).await;
        if !verification.verified {
            tracing::warn!(
                "Deposit {} could not be verified ({:?}); left pending",
                tx_hash,
                verification.source
            );
            return Err(AppError::VerificationPending(
                "Transaction not yet visible on chain; it will be credited once verified"
                    .to_string(),
            ));
        }

        let amount_nano = credited_amount(tx_hash, claimed_nano, &verification);
        match self.balances.credit(user_id, amount_nano, tx_hash).await? {
            CreditOutcome::Applied { .. } => Ok(DirectDeposit {
                tx_hash: tx_hash.to_string(),
                credited_nano: amount_nano,
                already_credited: false,
            }),
            CreditOutcome::AlreadyApplied {
                user_id: owner,
                amount_nano,
            } => {
                if owner != user_id {
                    return Err(AppError::Conflict(
                        "Transaction hash was credited to another account".to_string(),
                    ));
                }
                Ok(DirectDeposit {
                    tx_hash: tx_hash.to_string(),
                    credited_nano: amount_nano,
                    already_credited: true,
                })
            }
        }
    }

    /// Reconciles one intent now and returns its current state.
    pub async fn verify_intent(&self, tx_hash: &str) -> Result<DepositIntent> {
        let intent = self
            .store
            .get_deposit_intent(tx_hash)
            .await?
            .ok_or_else(|| AppError::NotFound("Deposit not found".to_string()))?;

        if intent.status == DepositStatus::Pending {
            self.reconcile_one(&intent).await?;
        }

        self.store
            .get_deposit_intent(tx_hash)
            .await?
            .ok_or_else(|| AppError::NotFound("Deposit not found".to_string()))
    }

    /// Walks every pending intent once.
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for intent in self.store.pending_deposit_intents().await? {
            match self.reconcile_one(&intent).await {
                Ok(DepositStatus::Confirmed) => report.confirmed += 1,
                Ok(DepositStatus::Rejected) => report.rejected += 1,
                Ok(DepositStatus::Pending) => report.still_pending += 1,
                Err(e) => {
                    report.still_pending += 1;
                    tracing::error!("Failed to reconcile deposit {}: {}", intent.tx_hash, e);
                }
            }
        }
        Ok(report)
    }

    async fn reconcile_one(&self, intent: &DepositIntent) -> Result<DepositStatus> {
        let verification = self.verifier.verify(&intent.tx_hash).await;

        if verification.verified {
            let amount_nano = credited_amount(&intent.tx_hash, intent.claimed_nano, &verification);
            return match self
                .balances
                .credit(intent.user_id, amount_nano, &intent.tx_hash)
                .await?
            {
                CreditOutcome::Applied { .. } => Ok(DepositStatus::Confirmed),
                CreditOutcome::AlreadyApplied { user_id, .. } if user_id == intent.user_id => {
                    Ok(DepositStatus::Confirmed)
                }
                CreditOutcome::AlreadyApplied { user_id, .. } => {
                    let note = format!("Hash already credited to user {}", user_id);
                    self.store
                        .reject_deposit_intent(&intent.tx_hash, &note)
                        .await?;
                    Ok(DepositStatus::Rejected)
                }
            };
        }

        let age = self.clock.now() - intent.created_at;
        if age > self.intent_ttl {
            let note = format!("Not found on chain within {}h", self.intent_ttl.num_hours());
            if self
                .store
                .reject_deposit_intent(&intent.tx_hash, &note)
                .await?
            {
                tracing::warn!("Deposit intent {} rejected: {}", intent.tx_hash, note);
            }
            return Ok(DepositStatus::Rejected);
        }

        Ok(DepositStatus::Pending)
    }
}

/// On-chain amount wins over the claim; simulated results credit the claim.
fn credited_amount(tx_hash: &str, claimed_nano: i64, verification: &Verification) -> i64 {
    match verification.amount_nano.filter(|_| verification.is_on_chain()) {
        Some(on_chain) if on_chain > 0 => {
            if on_chain != claimed_nano {
                tracing::info!(
                    "Deposit {} amount differs: claimed {} nanoTON, on-chain {} nanoTON",
                    tx_hash,
                    claimed_nano,
                    on_chain
                );
            }
            on_chain
        }
        _ => {
            tracing::warn!(
                "Deposit {} credited with the claimed amount ({} nanoTON) without on-chain confirmation",
                tx_hash,
                claimed_nano
            );
            claimed_nano
        }
    }
}

#[async_trait]
impl PeriodicJob for DepositRegistrar {
    fn name(&self) -> &'static str {
        "deposit-reconciler"
    }

    async fn run_once(&self) -> Result<()> {
        let report = self.reconcile_pending().await?;
        if report.confirmed + report.rejected > 0 {
            tracing::info!(
                "Deposit reconciliation: {} confirmed, {} rejected, {} pending",
                report.confirmed,
                report.rejected,
                report.still_pending
            );
        }
        Ok(())
    }
}
