// All service modules
pub mod audit_log;
pub mod balance_service;
pub mod deposit_service;
pub mod ledger_verifier;
pub mod payout;
pub mod scheduler;
pub mod session;
pub mod withdrawal_monitor;
pub mod withdrawal_service;

// Re-export for convenience
pub use audit_log::WithdrawalAuditLog;
pub use balance_service::BalanceMutator;
pub use deposit_service::DepositRegistrar;
pub use ledger_verifier::{LedgerVerifier, VerificationSource};
pub use payout::SimulatedPayout;
pub use scheduler::{PeriodicJob, SystemClock};
pub use session::{MemorySessionStore, RedisSessionStore, Session, SessionStore};
pub use withdrawal_monitor::WithdrawalMonitor;
pub use withdrawal_service::WithdrawalService;

use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle, time::Duration};

use crate::{config::Config, db::LedgerStore};

/// Handles to the running periodic jobs.
pub struct BackgroundServices {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundServices {
    /// Signals every job and waits for in-flight runs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Background job panicked: {}", e);
            }
        }
        tracing::info!("Background services stopped");
    }
}

/// Start all background services
pub fn start_background_services(
    store: Arc<dyn LedgerStore>,
    verifier: Arc<dyn LedgerVerifier>,
    audit: Arc<WithdrawalAuditLog>,
    config: &Config,
) -> BackgroundServices {
    tracing::info!("Starting background services...");
    let (shutdown, signal) = watch::channel(false);

    let monitor: Arc<dyn PeriodicJob> = Arc::new(WithdrawalMonitor::new(
        store.clone(),
        Arc::new(SimulatedPayout),
        audit,
        config.withdrawal_refund_on_failure,
    ));
    let reconciler: Arc<dyn PeriodicJob> = Arc::new(DepositRegistrar::new(
        store,
        verifier,
        Arc::new(SystemClock),
        config.deposit_intent_ttl_hours,
    ));

    let handles = vec![
        scheduler::spawn_periodic(
            monitor,
            Duration::from_secs(config.withdrawal_monitor_interval_secs),
            signal.clone(),
        ),
        scheduler::spawn_periodic(
            reconciler,
            Duration::from_secs(config.deposit_reconcile_interval_secs),
            signal,
        ),
    ];

    tracing::info!("All background services started successfully");
    BackgroundServices { shutdown, handles }
}
