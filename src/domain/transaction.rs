use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, WalletId};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
    Refund,
    Hold,
    Release,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
            TransactionKind::Refund => "refund",
            TransactionKind::Hold => "hold",
            TransactionKind::Release => "release",
            TransactionKind::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "credit" => Some(TransactionKind::Credit),
            "debit" => Some(TransactionKind::Debit),
            "refund" => Some(TransactionKind::Refund),
            "hold" => Some(TransactionKind::Hold),
            "release" => Some(TransactionKind::Release),
            "transfer" => Some(TransactionKind::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Held,
    Released,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Held => "held",
            TransactionStatus::Released => "released",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "cancelled" => Some(TransactionStatus::Cancelled),
            "held" => Some(TransactionStatus::Held),
            "released" => Some(TransactionStatus::Released),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Settled against the digital wallet balance.
    Wallet,
    /// Settled in cash outside the ledger; recorded for reconciliation.
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Cash => "cash",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "wallet" => Some(PaymentMethod::Wallet),
            "cash" => Some(PaymentMethod::Cash),
            _ => None,
        }
    }
}

/// An immutable ledger entry. Entries are created exactly once per mutation
/// and never updated or deleted; corrections are made via refunds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: TransactionId,
    /// Monotonically increasing sequence number for ordering, assigned by
    /// the repository on insert.
    pub sequence: i64,
    pub wallet_id: WalletId,
    pub kind: TransactionKind,
    /// Always positive; direction comes from `kind`.
    pub amount_cents: Cents,
    pub balance_before_cents: Cents,
    pub balance_after_cents: Cents,
    pub status: TransactionStatus,
    /// Domain object this entry settles against (e.g. "ride", "order",
    /// "commission"). The ledger is reference-kind-agnostic.
    pub reference_kind: Option<String>,
    pub reference_id: Option<String>,
    /// Opaque payload owned by the caller; stored and returned untouched.
    pub metadata: serde_json::Value,
    pub payment_method: Option<PaymentMethod>,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// The balance movement this entry records. Zero for entries that track
    /// money settled outside the digital balance (cash captures, holds).
    pub fn delta_cents(&self) -> Cents {
        self.balance_after_cents - self.balance_before_cents
    }
}

/// Everything the caller decides about a ledger entry. The balance snapshots,
/// sequence and timestamps are filled in by the balance mutator at commit
/// time.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub kind: TransactionKind,
    pub amount_cents: Cents,
    pub status: TransactionStatus,
    pub reference_kind: Option<String>,
    pub reference_id: Option<String>,
    pub metadata: serde_json::Value,
    pub payment_method: Option<PaymentMethod>,
}

impl TransactionDraft {
    pub fn new(kind: TransactionKind, amount_cents: Cents) -> Self {
        Self {
            kind,
            amount_cents,
            status: TransactionStatus::Completed,
            reference_kind: None,
            reference_id: None,
            metadata: serde_json::Value::Null,
            payment_method: None,
        }
    }

    pub fn credit(amount_cents: Cents) -> Self {
        Self::new(TransactionKind::Credit, amount_cents)
    }

    pub fn debit(amount_cents: Cents) -> Self {
        Self::new(TransactionKind::Debit, amount_cents)
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_reference(
        mut self,
        kind: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        self.reference_kind = Some(kind.into());
        self.reference_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    /// Materialize the draft into an entry with balance snapshots.
    pub fn into_transaction(
        self,
        wallet_id: WalletId,
        balance_before_cents: Cents,
        balance_after_cents: Cents,
    ) -> WalletTransaction {
        let now = Utc::now();
        WalletTransaction {
            id: Uuid::new_v4(),
            sequence: 0, // Will be set by repository
            wallet_id,
            kind: self.kind,
            amount_cents: self.amount_cents,
            balance_before_cents,
            balance_after_cents,
            status: self.status,
            reference_kind: self.reference_kind,
            reference_id: self.reference_id,
            metadata: self.metadata,
            payment_method: self.payment_method,
            processed_at: now,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            TransactionKind::Credit,
            TransactionKind::Debit,
            TransactionKind::Refund,
            TransactionKind::Hold,
            TransactionKind::Release,
            TransactionKind::Transfer,
        ] {
            assert_eq!(TransactionKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
            TransactionStatus::Held,
            TransactionStatus::Released,
        ] {
            assert_eq!(TransactionStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_draft_into_transaction_snapshots() {
        let wallet_id = Uuid::new_v4();
        let tx = TransactionDraft::debit(3000)
            .with_reference("ride", "r1")
            .into_transaction(wallet_id, 10000, 7000);

        assert_eq!(tx.wallet_id, wallet_id);
        assert_eq!(tx.kind, TransactionKind::Debit);
        assert_eq!(tx.amount_cents, 3000);
        assert_eq!(tx.balance_before_cents, 10000);
        assert_eq!(tx.balance_after_cents, 7000);
        assert_eq!(tx.delta_cents(), -3000);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.reference_kind.as_deref(), Some("ride"));
    }

    #[test]
    fn test_cash_settlement_has_zero_delta() {
        let tx = TransactionDraft::debit(1180)
            .with_payment_method(PaymentMethod::Cash)
            .into_transaction(Uuid::new_v4(), 5000, 5000);

        assert_eq!(tx.amount_cents, 1180);
        assert_eq!(tx.delta_cents(), 0);
    }
}
