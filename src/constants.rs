/// Application constants

// Custodial game wallet (default, overridable through GAME_WALLET_ADDRESS)
pub const GAME_WALLET_ADDRESS: &str = "UQANJGqFrn96wqLaDQz4O2pVcTt1m-IRpf6aH-i-KpamjONa";

// Units
pub const NANO_PER_TON: i64 = 1_000_000_000;
pub const TON_DECIMALS: u32 = 9;

// Deposit / withdrawal limits (nanoTON)
pub const MIN_DEPOSIT_NANO: i64 = 10_000_000; // 0.01 TON
pub const MIN_WITHDRAWAL_NANO: i64 = 20_000_000; // 0.02 TON
pub const MAX_TRANSFER_NANO: i64 = 1_000_000 * NANO_PER_TON; // 1M TON per deposit or withdrawal
pub const MIN_TX_HASH_LEN: usize = 5;

// Simulated verification result
pub const SIMULATED_DEPOSIT_NANO: i64 = 20_000_000; // 0.02 TON
pub const SIMULATED_SOURCE_ADDRESS: &str = "UserWalletAddress";

// Toncenter
pub const TONCENTER_API_URL: &str = "https://toncenter.com/api/v2";
pub const TONCENTER_SCAN_LIMIT: u32 = 10;
pub const TON_VERIFY_TIMEOUT_SECS: u64 = 10;

// Sessions
pub const SESSION_TTL_HOURS: i64 = 24;
pub const SESSION_KEY_PREFIX: &str = "nebulachest:session:";
pub const TELEGRAM_INIT_DATA_MAX_AGE_SECS: i64 = 86_400;

// Audit log
pub const WITHDRAWAL_LOG_PATH: &str = "withdrawal-transactions.txt";
pub const WITHDRAWAL_LOG_HEADER: &str = "# TON Withdrawal Transaction Logs\n\n";
pub const WITHDRAWAL_LOG_EMPTY: &str = "No withdrawal transactions have been recorded yet.";

// API version
pub const API_VERSION: &str = "v1";

// Background service intervals
pub const WITHDRAWAL_MONITOR_INTERVAL_SECS: u64 = 60;
pub const DEPOSIT_RECONCILE_INTERVAL_SECS: u64 = 60;
pub const DEPOSIT_INTENT_TTL_HOURS: i64 = 24;

// Upper bound for SESSION_TTL_HOURS and DEPOSIT_INTENT_TTL_HOURS (one year)
pub const MAX_TTL_HOURS: i64 = 24 * 365;
