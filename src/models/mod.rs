// src/models/mod.rs
pub mod ledger;
pub mod user;

// Re-export commonly used types so other modules can use `crate::models::X`
pub use ledger::{
    CreditOutcome,
    DepositIntent,
    DepositStatus,
    WithdrawalStatus,
    WithdrawalTransaction,
};
pub use user::{ApiResponse, User};
