use thiserror::Error;

use super::{Cents, HoldId, HoldStatus, TransactionId, UserId, WalletId};

/// Failure taxonomy of the ledger. Validation variants are returned before
/// any mutation; once a balance mutation begins, any failure rolls the whole
/// unit back, so callers never observe a partial wallet update.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Wallet is inactive: {0}")]
    WalletInactive(WalletId),

    #[error(
        "Insufficient balance in wallet {wallet_id}: available {available} cents, required {required} cents"
    )]
    InsufficientBalance {
        wallet_id: WalletId,
        available: Cents,
        required: Cents,
    },

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Hold not found: {0}")]
    HoldNotFound(HoldId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Driver account not found for user: {0}")]
    DriverAccountNotFound(UserId),

    #[error("User {user_id} does not own wallet {wallet_id}")]
    Forbidden { user_id: UserId, wallet_id: WalletId },

    #[error("Hold {hold_id} is {status}, expected active")]
    InvalidHoldState { hold_id: HoldId, status: HoldStatus },

    #[error("Cannot transfer funds from a wallet to itself")]
    SelfTransfer,

    #[error("Transaction {0} cannot be refunded: {1}")]
    RefundNotAllowed(TransactionId, String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}
