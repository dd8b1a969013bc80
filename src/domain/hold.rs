use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, WalletId};

pub type HoldId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    Active,
    /// Released explicitly by the wallet owner or a calling module.
    Released,
    /// Converted into a completed transaction (full or partial capture).
    Captured,
    /// Released by the expiry sweep after `expires_at` passed.
    Expired,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Active => "active",
            HoldStatus::Released => "released",
            HoldStatus::Captured => "captured",
            HoldStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(HoldStatus::Active),
            "released" => Some(HoldStatus::Released),
            "captured" => Some(HoldStatus::Captured),
            "expired" => Some(HoldStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reservation of funds against a pending obligation. While `active` the
/// amount counts toward the wallet's `held_cents`; terminal states are
/// retained forever for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletHold {
    pub id: HoldId,
    pub wallet_id: WalletId,
    /// Always positive.
    pub amount_cents: Cents,
    pub reference_kind: Option<String>,
    pub reference_id: Option<String>,
    pub status: HoldStatus,
    pub expires_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WalletHold {
    pub fn new(wallet_id: WalletId, amount_cents: Cents, expires_at: DateTime<Utc>) -> Self {
        assert!(amount_cents > 0, "Hold amount must be positive");
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            amount_cents,
            reference_kind: None,
            reference_id: None,
            status: HoldStatus::Active,
            expires_at,
            released_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_reference(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.reference_kind = Some(kind.into());
        self.reference_id = Some(id.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at < now
    }
}
