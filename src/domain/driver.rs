use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, UserId};

pub type DriverAccountId = Uuid;
pub type AuditId = Uuid;

/// Operational standing of a driver account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStanding {
    Active,
    Restricted,
}

impl AccountStanding {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStanding::Active => "active",
            AccountStanding::Restricted => "restricted",
        }
    }
}

impl std::fmt::Display for AccountStanding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Restriction state for one driver. Created lazily alongside the driver's
/// wallet; the ledger flips `is_restricted` as the balance crosses the
/// threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverAccount {
    pub id: DriverAccountId,
    pub user_id: UserId,
    pub is_restricted: bool,
    /// Balance below this restricts the account at the next recheck.
    pub min_balance_cents: Cents,
    pub restricted_at: Option<DateTime<Utc>>,
    pub restriction_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DriverAccount {
    pub fn new(user_id: UserId, min_balance_cents: Cents) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            is_restricted: false,
            min_balance_cents,
            restricted_at: None,
            restriction_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn standing(&self) -> AccountStanding {
        if self.is_restricted {
            AccountStanding::Restricted
        } else {
            AccountStanding::Active
        }
    }
}

/// What kind of balance change an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Credit,
    Debit,
    Commission,
    Penalty,
    Subscription,
    CashCollection,
    CashPayment,
    Transfer,
    Refund,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Credit => "credit",
            AuditAction::Debit => "debit",
            AuditAction::Commission => "commission",
            AuditAction::Penalty => "penalty",
            AuditAction::Subscription => "subscription",
            AuditAction::CashCollection => "cash_collection",
            AuditAction::CashPayment => "cash_payment",
            AuditAction::Transfer => "transfer",
            AuditAction::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "credit" => Some(AuditAction::Credit),
            "debit" => Some(AuditAction::Debit),
            "commission" => Some(AuditAction::Commission),
            "penalty" => Some(AuditAction::Penalty),
            "subscription" => Some(AuditAction::Subscription),
            "cash_collection" => Some(AuditAction::CashCollection),
            "cash_payment" => Some(AuditAction::CashPayment),
            "transfer" => Some(AuditAction::Transfer),
            "refund" => Some(AuditAction::Refund),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only record of a balance change on a driver wallet, kept
/// independently of the transaction log for compliance review. Never
/// mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverBalanceAudit {
    pub id: AuditId,
    pub driver_account_id: DriverAccountId,
    pub user_id: UserId,
    pub previous_balance_cents: Cents,
    pub new_balance_cents: Cents,
    pub change_cents: Cents,
    pub action: AuditAction,
    pub reason: Option<String>,
    /// True when this change pushed the balance below the restriction
    /// threshold while the account was still active.
    pub triggered_restriction: bool,
    pub created_at: DateTime<Utc>,
}

impl DriverBalanceAudit {
    pub fn new(
        driver_account_id: DriverAccountId,
        user_id: UserId,
        previous_balance_cents: Cents,
        new_balance_cents: Cents,
        action: AuditAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            driver_account_id,
            user_id,
            previous_balance_cents,
            new_balance_cents,
            change_cents: new_balance_cents - previous_balance_cents,
            action,
            reason: None,
            triggered_restriction: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_triggered_restriction(mut self, triggered: bool) -> Self {
        self.triggered_restriction = triggered;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_is_active() {
        let account = DriverAccount::new(Uuid::new_v4(), 0);
        assert_eq!(account.standing(), AccountStanding::Active);
        assert!(account.restricted_at.is_none());
    }

    #[test]
    fn test_audit_change_is_signed() {
        let audit = DriverBalanceAudit::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1000,
            -500,
            AuditAction::Commission,
        );
        assert_eq!(audit.change_cents, -1500);
        assert!(!audit.triggered_restriction);
    }

    #[test]
    fn test_audit_action_roundtrip() {
        for action in [
            AuditAction::Credit,
            AuditAction::Debit,
            AuditAction::Commission,
            AuditAction::Penalty,
            AuditAction::Subscription,
            AuditAction::CashCollection,
            AuditAction::CashPayment,
            AuditAction::Transfer,
            AuditAction::Refund,
        ] {
            assert_eq!(AuditAction::from_str(action.as_str()), Some(action));
        }
    }
}
