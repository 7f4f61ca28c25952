use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    db::LedgerStore,
    error::Result,
    models::{WithdrawalStatus, WithdrawalTransaction},
    services::{
        audit_log::WithdrawalAuditLog, balance_service::BalanceMutator, payout::PayoutGateway,
        scheduler::PeriodicJob,
    },
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub completed: usize,
    pub failed: usize,
    /// Rows claimed elsewhere, or whose settlement could not be written yet.
    pub skipped: usize,
}

/// What happened to a claimed withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Settlement {
    Paid { reference: String },
    Rejected { reason: String },
}

/// Settles pending withdrawals: `pending -> processing -> completed | failed`.
///
/// A row is claimed before the payout is sent, so later cycles never pay it
/// again. When the settlement cannot be written, the outcome is kept and only
/// the write is retried on the next cycle.
pub struct WithdrawalMonitor {
    store: Arc<dyn LedgerStore>,
    balances: BalanceMutator,
    payout: Arc<dyn PayoutGateway>,
    audit: Arc<WithdrawalAuditLog>,
    refund_on_failure: bool,
    cycle_lock: Mutex<()>,
    unrecorded: Mutex<Vec<(WithdrawalTransaction, Settlement)>>,
}

impl WithdrawalMonitor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        payout: Arc<dyn PayoutGateway>,
        audit: Arc<WithdrawalAuditLog>,
        refund_on_failure: bool,
    ) -> Self {
        Self {
            balances: BalanceMutator::new(store.clone()),
            store,
            payout,
            audit,
            refund_on_failure,
            cycle_lock: Mutex::new(()),
            unrecorded: Mutex::new(Vec::new()),
        }
    }

    /// Processes every pending withdrawal once, in id order.
    ///
    /// Returns `None` when another cycle is already running.
    pub async fn run_cycle(&self) -> Result<Option<CycleReport>> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            tracing::debug!("Withdrawal cycle already in progress, skipping tick");
            return Ok(None);
        };

        let mut report = CycleReport::default();
        let retries = std::mem::take(&mut *self.unrecorded.lock().await);
        for (withdrawal, settlement) in retries {
            tracing::info!("Retrying settlement record for withdrawal {}", withdrawal.id);
            let outcome = self.record(&withdrawal, settlement).await;
            tally(&mut report, withdrawal.id, outcome);
        }

        let pending = self.store.pending_withdrawals().await?;
        if !pending.is_empty() {
            tracing::info!("Processing {} pending withdrawals", pending.len());
        }
        for withdrawal in pending {
            let outcome = self.settle(&withdrawal).await;
            tally(&mut report, withdrawal.id, outcome);
        }

        if report != CycleReport::default() {
            tracing::info!(
                "Withdrawal cycle done: {} completed, {} failed, {} skipped",
                report.completed,
                report.failed,
                report.skipped
            );
        }
        Ok(Some(report))
    }

    async fn settle(&self, withdrawal: &WithdrawalTransaction) -> Result<Option<WithdrawalStatus>> {
        if !self.store.claim_withdrawal(withdrawal.id).await? {
            return Ok(None);
        }

        let settlement = match self.payout.send(withdrawal).await {
            Ok(reference) => Settlement::Paid { reference },
            Err(e) => Settlement::Rejected {
                reason: e.to_string(),
            },
        };
        self.record(withdrawal, settlement).await
    }

    /// Writes the settlement and its audit line. On a store error the
    /// settlement is queued for the next cycle.
    async fn record(
        &self,
        withdrawal: &WithdrawalTransaction,
        settlement: Settlement,
    ) -> Result<Option<WithdrawalStatus>> {
        let written = match &settlement {
            Settlement::Paid { reference } => self
                .store
                .complete_withdrawal(withdrawal.id, reference, &format!("Payout sent: {}", reference))
                .await
                .map(|done| done.then_some(WithdrawalStatus::Completed)),
            Settlement::Rejected { reason } => self
                .balances
                .fail_withdrawal(withdrawal.id, reason, self.refund_on_failure)
                .await
                .map(|done| done.then_some(WithdrawalStatus::Failed)),
        };

        let status = match written {
            Ok(Some(status)) => status,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.unrecorded
                    .lock()
                    .await
                    .push((withdrawal.clone(), settlement));
                return Err(e);
            }
        };

        let reference = match &settlement {
            Settlement::Paid { reference } => Some(reference.as_str()),
            Settlement::Rejected { reason } => {
                tracing::warn!(
                    "Withdrawal {} failed ({}); refunded: {}",
                    withdrawal.id,
                    reason,
                    self.refund_on_failure
                );
                None
            }
        };

        let user = match self.store.get_user(withdrawal.user_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("Could not load user {} for audit line: {}", withdrawal.user_id, e);
                None
            }
        };
        if let Err(e) = self
            .audit
            .record(withdrawal, user.as_ref(), status, reference)
            .await
        {
            tracing::error!("Failed to write audit line for withdrawal {}: {}", withdrawal.id, e);
        }
        Ok(Some(status))
    }
}

fn tally(report: &mut CycleReport, id: i64, outcome: Result<Option<WithdrawalStatus>>) {
    match outcome {
        Ok(Some(WithdrawalStatus::Completed)) => report.completed += 1,
        Ok(Some(WithdrawalStatus::Failed)) => report.failed += 1,
        Ok(_) => report.skipped += 1,
        Err(e) => {
            report.skipped += 1;
            tracing::error!("Failed to settle withdrawal {}: {}", id, e);
        }
    }
}

#[async_trait]
impl PeriodicJob for WithdrawalMonitor {
    fn name(&self) -> &'static str {
        "withdrawal-monitor"
    }

    async fn run_once(&self) -> Result<()> {
        self.run_cycle().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::GAME_WALLET_ADDRESS, db::MemoryStore, error::AppError,
        services::payout::SimulatedPayout,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingPayout;

    #[async_trait]
    impl PayoutGateway for FailingPayout {
        async fn send(&self, _withdrawal: &WithdrawalTransaction) -> Result<String> {
            Err(AppError::ExternalAPI("wallet offline".to_string()))
        }
    }

    fn monitor(
        store: Arc<MemoryStore>,
        payout: Arc<dyn PayoutGateway>,
        dir: &tempfile::TempDir,
        refund: bool,
    ) -> (WithdrawalMonitor, Arc<WithdrawalAuditLog>) {
        let audit = Arc::new(WithdrawalAuditLog::new(dir.path().join("withdrawals.txt")));
        (
            WithdrawalMonitor::new(store, payout, audit.clone(), refund),
            audit,
        )
    }

    #[tokio::test]
    async fn two_withdrawals_of_one_user_settle_in_one_cycle() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 1_000_000_000).await;
        store
            .create_withdrawal(user.id, 300_000_000, GAME_WALLET_ADDRESS)
            .await
            .unwrap()
            .unwrap();
        store
            .create_withdrawal(user.id, 200_000_000, GAME_WALLET_ADDRESS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.balance_of(user.id).await, 500_000_000);

        let dir = tempfile::tempdir().unwrap();
        let (monitor, audit) = monitor(store.clone(), Arc::new(SimulatedPayout), &dir, true);
        let report = monitor.run_cycle().await.unwrap().unwrap();

        assert_eq!(report.completed, 2);
        assert_eq!(store.balance_of(user.id).await, 500_000_000);
        assert!(store.pending_withdrawals().await.unwrap().is_empty());

        let text = audit.read_all().await.unwrap();
        let lines: Vec<&str> = text.lines().filter(|l| l.starts_with('[')).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("ID: 1 |"));
        assert!(lines[1].contains("ID: 2 |"));
        assert!(lines.iter().all(|l| l.contains("User: alice") && l.contains("Status: completed")));
        assert_ne!(lines[0], lines[1]);

        let second = monitor.run_cycle().await.unwrap().unwrap();
        assert_eq!(second, CycleReport::default());
    }

    #[tokio::test]
    async fn failed_payout_is_refunded_and_logged() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 1_000_000_000).await;
        store
            .create_withdrawal(user.id, 300_000_000, GAME_WALLET_ADDRESS)
            .await
            .unwrap()
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let (monitor, audit) = monitor(store.clone(), Arc::new(FailingPayout), &dir, true);
        let report = monitor.run_cycle().await.unwrap().unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(store.balance_of(user.id).await, 1_000_000_000);
        let history = store.user_withdrawals(user.id).await.unwrap();
        assert_eq!(history[0].status, WithdrawalStatus::Failed);
        assert!(history[0].refunded);
        assert!(audit.read_all().await.unwrap().contains("Status: failed | TxHash: N/A"));
    }

    #[tokio::test]
    async fn failed_payout_can_be_held_for_review() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 1_000_000_000).await;
        store
            .create_withdrawal(user.id, 300_000_000, GAME_WALLET_ADDRESS)
            .await
            .unwrap()
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let (monitor, _audit) = monitor(store.clone(), Arc::new(FailingPayout), &dir, false);
        monitor.run_cycle().await.unwrap();

        assert_eq!(store.balance_of(user.id).await, 700_000_000);
        assert!(!store.user_withdrawals(user.id).await.unwrap()[0].refunded);
    }

    struct CountingPayout(AtomicUsize);

    #[async_trait]
    impl PayoutGateway for CountingPayout {
        async fn send(&self, withdrawal: &WithdrawalTransaction) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("tx_{}", withdrawal.id))
        }
    }

    #[tokio::test]
    async fn lost_completion_write_is_retried_without_paying_again() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", 1_000_000_000).await;
        let (withdrawal, _) = store
            .create_withdrawal(user.id, 300_000_000, GAME_WALLET_ADDRESS)
            .await
            .unwrap()
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let payout = Arc::new(CountingPayout(AtomicUsize::new(0)));
        let (monitor, audit) = monitor(store.clone(), payout.clone(), &dir, true);

        store.break_next_completion();
        let first = monitor.run_cycle().await.unwrap().unwrap();
        assert_eq!(first.skipped, 1);
        assert_eq!(payout.0.load(Ordering::SeqCst), 1);
        let history = store.user_withdrawals(user.id).await.unwrap();
        assert_eq!(history[0].status, WithdrawalStatus::Processing);
        assert!(store.pending_withdrawals().await.unwrap().is_empty());

        let second = monitor.run_cycle().await.unwrap().unwrap();
        assert_eq!(second.completed, 1);
        assert_eq!(payout.0.load(Ordering::SeqCst), 1);

        let history = store.user_withdrawals(user.id).await.unwrap();
        assert_eq!(history[0].id, withdrawal.id);
        assert_eq!(history[0].status, WithdrawalStatus::Completed);
        assert_eq!(history[0].tx_hash.as_deref(), Some("tx_1"));
        assert_eq!(store.balance_of(user.id).await, 700_000_000);

        let text = audit.read_all().await.unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with('[')).count(), 1);

        let third = monitor.run_cycle().await.unwrap().unwrap();
        assert_eq!(third, CycleReport::default());
        assert_eq!(payout.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overlapping_cycle_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let dir = tempfile::tempdir().unwrap();
        let (monitor, _audit) = monitor(store, Arc::new(SimulatedPayout), &dir, true);

        let _held = monitor.cycle_lock.lock().await;
        assert_eq!(monitor.run_cycle().await.unwrap(), None);
    }
}
