use chrono::{DateTime, SecondsFormat, Utc};
use std::path::PathBuf;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::{
    constants::{WITHDRAWAL_LOG_EMPTY, WITHDRAWAL_LOG_HEADER},
    error::Result,
    models::{User, WithdrawalStatus, WithdrawalTransaction},
    utils::nano_to_ton,
};

/// Append-only text log of processed withdrawals.
///
/// Writers are serialized through an async mutex so lines never interleave.
pub struct WithdrawalAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl WithdrawalAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates the file with its header if it does not exist yet.
    pub async fn init(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if fs::try_exists(&self.path).await? {
            return Ok(());
        }
        fs::write(&self.path, WITHDRAWAL_LOG_HEADER).await?;
        tracing::info!("Created withdrawal log at {}", self.path.display());
        Ok(())
    }

    pub fn format_line(
        at: DateTime<Utc>,
        withdrawal: &WithdrawalTransaction,
        user: Option<&User>,
        status: WithdrawalStatus,
        tx_hash: Option<&str>,
    ) -> String {
        format!(
            "[{}] ID: {} | User: {} (ID: {}) | Amount: {} TON | To: {} | Status: {} | TxHash: {}\n",
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
            withdrawal.id,
            user.map(|u| u.username.as_str()).unwrap_or("unknown"),
            withdrawal.user_id,
            nano_to_ton(withdrawal.amount_nano),
            withdrawal.to_address,
            status,
            tx_hash.unwrap_or("N/A")
        )
    }

    pub async fn record(
        &self,
        withdrawal: &WithdrawalTransaction,
        user: Option<&User>,
        status: WithdrawalStatus,
        tx_hash: Option<&str>,
    ) -> Result<()> {
        let line = Self::format_line(Utc::now(), withdrawal, user, status, tx_hash);

        let _guard = self.write_lock.lock().await;
        let is_new = !fs::try_exists(&self.path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        if is_new {
            file.write_all(WITHDRAWAL_LOG_HEADER.as_bytes()).await?;
        }
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Full log text, or a placeholder when nothing was written yet.
    pub async fn read_all(&self) -> Result<String> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(WITHDRAWAL_LOG_EMPTY.to_string())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn withdrawal(id: i64) -> WithdrawalTransaction {
        WithdrawalTransaction {
            id,
            user_id: 3,
            amount_nano: 1_250_000_000,
            to_address: "UQdest".to_string(),
            status: WithdrawalStatus::Pending,
            tx_hash: None,
            note: None,
            refunded: false,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn line_format_matches_log_layout() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let line = WithdrawalAuditLog::format_line(
            at,
            &withdrawal(9),
            None,
            WithdrawalStatus::Failed,
            None,
        );
        assert_eq!(
            line,
            "[2024-05-01T10:00:00.000Z] ID: 9 | User: unknown (ID: 3) | Amount: 1.25 TON | To: UQdest | Status: failed | TxHash: N/A\n"
        );
    }

    #[tokio::test]
    async fn missing_file_reads_as_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let log = WithdrawalAuditLog::new(dir.path().join("absent.txt"));
        assert_eq!(log.read_all().await.unwrap(), WITHDRAWAL_LOG_EMPTY);
    }

    #[tokio::test]
    async fn concurrent_records_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(WithdrawalAuditLog::new(dir.path().join("log.txt")));
        log.init().await.unwrap();

        let mut handles = Vec::new();
        for id in 1..=20 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.record(&withdrawal(id), None, WithdrawalStatus::Completed, Some("tx_ref"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let text = log.read_all().await.unwrap();
        assert!(text.starts_with(WITHDRAWAL_LOG_HEADER));
        let lines: Vec<&str> = text.lines().filter(|l| l.starts_with('[')).collect();
        assert_eq!(lines.len(), 20);
        assert!(lines.iter().all(|l| l.ends_with("TxHash: tx_ref")));
    }
}
