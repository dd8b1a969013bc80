//! Ledger configuration, loadable from `FARELEDGER_*` environment
//! variables with sensible defaults for every knob.

use serde::{Deserialize, Serialize};

use crate::domain::Cents;

/// Default cap on a single credit operation, in cents (10,000.00).
const DEFAULT_MAX_TRANSACTION_CENTS: Cents = 1_000_000;

/// Default hold lifetime before the expiry sweep reclaims it.
const DEFAULT_HOLD_DURATION_SECS: i64 = 30 * 60;

/// Default sweep cadence. This is the maximum staleness window for an
/// expired hold: a hold past `expires_at` is reclaimed within one interval.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default TTL for cached wallet reads.
const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Per-transaction cap on credits (add funds, cash collection).
    pub max_transaction_cents: Cents,
    /// Hold lifetime when the caller does not pass one.
    pub default_hold_duration_secs: i64,
    /// How often the expiry sweep runs.
    pub sweep_interval_secs: u64,
    /// TTL for cache-aside wallet reads.
    pub cache_ttl_secs: u64,
    /// Restriction threshold for newly created driver accounts.
    pub default_min_balance_cents: Cents,
    /// Currency for lazily created wallets.
    pub default_currency: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_transaction_cents: DEFAULT_MAX_TRANSACTION_CENTS,
            default_hold_duration_secs: DEFAULT_HOLD_DURATION_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            default_min_balance_cents: 0,
            default_currency: "USD".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load the configuration from environment variables, falling back to
    /// the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_transaction_cents: parsed_var("FARELEDGER_MAX_TRANSACTION_CENTS")
                .unwrap_or(defaults.max_transaction_cents),
            default_hold_duration_secs: parsed_var("FARELEDGER_HOLD_DURATION_SECS")
                .unwrap_or(defaults.default_hold_duration_secs),
            sweep_interval_secs: parsed_var("FARELEDGER_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval_secs),
            cache_ttl_secs: parsed_var("FARELEDGER_CACHE_TTL_SECS")
                .unwrap_or(defaults.cache_ttl_secs),
            default_min_balance_cents: parsed_var("FARELEDGER_MIN_BALANCE_CENTS")
                .unwrap_or(defaults.default_min_balance_cents),
            default_currency: non_empty_var("FARELEDGER_CURRENCY")
                .unwrap_or(defaults.default_currency),
        }
    }

    pub fn default_hold_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_hold_duration_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Returns the value of an environment variable if it exists and is
/// non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    non_empty_var(name).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.max_transaction_cents, 1_000_000);
        assert_eq!(config.default_hold_duration_secs, 1800);
        assert_eq!(config.default_min_balance_cents, 0);
        assert_eq!(config.default_currency, "USD");
    }

    #[test]
    fn test_duration_helpers() {
        let config = LedgerConfig::default();
        assert_eq!(config.default_hold_duration(), chrono::Duration::minutes(30));
        assert_eq!(config.sweep_interval(), std::time::Duration::from_secs(60));
        assert_eq!(config.cache_ttl(), std::time::Duration::from_secs(300));
    }
}
