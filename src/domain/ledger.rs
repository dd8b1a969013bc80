use super::{Cents, HoldStatus, TransactionStatus, Wallet, WalletHold, WalletTransaction};

/// Replay a wallet's transaction history from zero and return the resulting
/// balance. Transactions must be ordered by sequence. Only completed entries
/// move the balance; hold/release bookkeeping entries and cash settlements
/// carry equal snapshots and replay as no-ops.
///
/// Each balance-moving entry is also checked for snapshot continuity: its
/// `balance_before` must equal the running balance, and its delta must match
/// the signed amount (zero for cash settlements).
pub fn replay_balance(transactions: &[WalletTransaction]) -> Result<Cents, ReplayError> {
    let mut balance: Cents = 0;

    for tx in transactions {
        if tx.status != TransactionStatus::Completed {
            continue;
        }
        if tx.balance_before_cents != balance {
            return Err(ReplayError::BrokenChain {
                transaction_id: tx.id.to_string(),
                expected_before: balance,
                found_before: tx.balance_before_cents,
            });
        }
        let delta = tx.delta_cents();
        if delta != 0 && delta.abs() != tx.amount_cents {
            return Err(ReplayError::DeltaMismatch {
                transaction_id: tx.id.to_string(),
                amount: tx.amount_cents,
                delta,
            });
        }
        balance = tx.balance_after_cents;
    }

    Ok(balance)
}

/// Sum of active holds, which must equal the wallet's `held_cents`.
pub fn active_hold_total(holds: &[WalletHold]) -> Cents {
    holds
        .iter()
        .filter(|h| h.status == HoldStatus::Active)
        .map(|h| h.amount_cents)
        .sum()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    BrokenChain {
        transaction_id: String,
        expected_before: Cents,
        found_before: Cents,
    },
    DeltaMismatch {
        transaction_id: String,
        amount: Cents,
        delta: Cents,
    },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::BrokenChain {
                transaction_id,
                expected_before,
                found_before,
            } => write!(
                f,
                "transaction {} breaks the snapshot chain: expected balance_before {} cents, found {}",
                transaction_id, expected_before, found_before
            ),
            ReplayError::DeltaMismatch {
                transaction_id,
                amount,
                delta,
            } => write!(
                f,
                "transaction {} moved {} cents but records an amount of {} cents",
                transaction_id, delta, amount
            ),
        }
    }
}

impl std::error::Error for ReplayError {}

/// One problem found while verifying a wallet.
#[derive(Debug, Clone)]
pub enum IntegrityIssue {
    Replay {
        error: ReplayError,
    },
    BalanceMismatch {
        stored: Cents,
        replayed: Cents,
    },
    HeldMismatch {
        stored: Cents,
        active_holds: Cents,
    },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::Replay { error } => write!(f, "{}", error),
            IntegrityIssue::BalanceMismatch { stored, replayed } => write!(
                f,
                "stored balance {} cents does not match replayed balance {} cents",
                stored, replayed
            ),
            IntegrityIssue::HeldMismatch {
                stored,
                active_holds,
            } => write!(
                f,
                "stored held balance {} cents does not match active holds total {} cents",
                stored, active_holds
            ),
        }
    }
}

/// Result of verifying every wallet's ledger against its stored balances.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub wallets_checked: usize,
    pub transactions_checked: usize,
    pub issues: Vec<(String, IntegrityIssue)>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Verify one wallet against its full, sequence-ordered transaction history
/// and its holds, appending any findings to the report.
pub fn verify_wallet(
    report: &mut IntegrityReport,
    wallet: &Wallet,
    transactions: &[WalletTransaction],
    holds: &[WalletHold],
) {
    report.wallets_checked += 1;
    report.transactions_checked += transactions.len();
    let label = format!("{} ({})", wallet.id, wallet.kind);

    match replay_balance(transactions) {
        Ok(replayed) => {
            if replayed != wallet.balance_cents {
                report.issues.push((
                    label.clone(),
                    IntegrityIssue::BalanceMismatch {
                        stored: wallet.balance_cents,
                        replayed,
                    },
                ));
            }
        }
        Err(error) => {
            report
                .issues
                .push((label.clone(), IntegrityIssue::Replay { error }));
        }
    }

    let active_holds = active_hold_total(holds);
    if active_holds != wallet.held_cents {
        report.issues.push((
            label,
            IntegrityIssue::HeldMismatch {
                stored: wallet.held_cents,
                active_holds,
            },
        ));
    }
}
