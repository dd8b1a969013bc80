use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type WalletId = Uuid;
pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    /// Passengers topping up and paying for rides
    Rider,
    /// Drivers earning fares and owing commission
    Driver,
    /// The marketplace's own operating account
    Platform,
    /// Home-services providers (cleaners, technicians, etc.)
    ServiceProvider,
}

impl WalletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletKind::Rider => "rider",
            WalletKind::Driver => "driver",
            WalletKind::Platform => "platform",
            WalletKind::ServiceProvider => "service_provider",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rider" => Some(WalletKind::Rider),
            "driver" => Some(WalletKind::Driver),
            "platform" => Some(WalletKind::Platform),
            "service_provider" => Some(WalletKind::ServiceProvider),
            _ => None,
        }
    }

    /// Driver wallets may go negative: commission and penalty deductions can
    /// exceed cash on hand, which is what drives account restriction. The
    /// platform account is the house ledger and may run negative too.
    pub fn allows_negative(&self) -> bool {
        matches!(self, WalletKind::Driver | WalletKind::Platform)
    }
}

impl std::fmt::Display for WalletKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A balance-holding account scoped to one user and one kind.
/// Wallets are created lazily on first access and never hard-deleted;
/// `is_active` gates every mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub kind: WalletKind,
    pub balance_cents: Cents,
    /// Total of this wallet's active holds.
    pub held_cents: Cents,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: UserId, kind: WalletKind, currency: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            balance_cents: 0,
            held_cents: 0,
            currency,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// The amount usable for new debits: balance minus active holds.
    pub fn available_cents(&self) -> Cents {
        self.balance_cents - self.held_cents
    }

    pub fn allows_negative(&self) -> bool {
        self.kind.allows_negative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_kind_roundtrip() {
        for kind in [
            WalletKind::Rider,
            WalletKind::Driver,
            WalletKind::Platform,
            WalletKind::ServiceProvider,
        ] {
            let parsed = WalletKind::from_str(kind.as_str()).unwrap();
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn test_driver_wallet_allows_negative() {
        let wallet = Wallet::new(Uuid::new_v4(), WalletKind::Driver, "USD".into());
        assert!(wallet.allows_negative());
    }

    #[test]
    fn test_rider_wallet_disallows_negative() {
        let wallet = Wallet::new(Uuid::new_v4(), WalletKind::Rider, "USD".into());
        assert!(!wallet.allows_negative());
        let wallet = Wallet::new(Uuid::new_v4(), WalletKind::ServiceProvider, "USD".into());
        assert!(!wallet.allows_negative());
    }

    #[test]
    fn test_available_subtracts_holds() {
        let mut wallet = Wallet::new(Uuid::new_v4(), WalletKind::Rider, "USD".into());
        wallet.balance_cents = 10000;
        wallet.held_cents = 2500;
        assert_eq!(wallet.available_cents(), 7500);
    }

    #[test]
    fn test_new_wallet_starts_active_and_empty() {
        let wallet = Wallet::new(Uuid::new_v4(), WalletKind::Driver, "USD".into());
        assert!(wallet.is_active);
        assert_eq!(wallet.balance_cents, 0);
        assert_eq!(wallet.held_cents, 0);
    }
}
