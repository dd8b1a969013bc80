//! Driver account restriction: a two-state machine (`active` /
//! `restricted`) driven by the wallet balance crossing the account's
//! minimum-balance threshold.
//!
//! Rechecks after a debit run as detached background work: the debit is
//! financially authoritative and never waits on the flag, so the
//! restriction is eventually consistent by design. The recheck itself is
//! idempotent and safe to rerun at any time.

use chrono::Utc;
use tracing::warn;

use crate::cache::driver_key;
use crate::domain::{
    AccountStanding, AuditAction, DriverAccount, DriverBalanceAudit, LedgerError, UserId, Wallet,
    WalletKind, WalletTransaction, format_cents,
};

use super::WalletService;

/// Outcome of a restriction recheck.
#[derive(Debug, Clone)]
pub struct RestrictionOutcome {
    pub standing: AccountStanding,
    pub reason: Option<String>,
    /// Whether this recheck flipped the state.
    pub changed: bool,
}

impl WalletService {
    /// Resolve a driver's restriction state, creating it with the
    /// configured default threshold on first contact.
    pub async fn get_or_create_driver_account(
        &self,
        user_id: UserId,
    ) -> Result<DriverAccount, LedgerError> {
        if let Some(account) = self.repo().get_driver_account(user_id).await? {
            return Ok(account);
        }

        let account = DriverAccount::new(user_id, self.config().default_min_balance_cents);
        match self.repo().save_driver_account(&account).await {
            Ok(()) => Ok(account),
            // Lost a creation race on the unique user_id index.
            Err(err) => match self.repo().get_driver_account(user_id).await? {
                Some(existing) => Ok(existing),
                None => Err(err.into()),
            },
        }
    }

    /// Get a driver's restriction state, failing if none exists yet.
    pub async fn get_driver_account(&self, user_id: UserId) -> Result<DriverAccount, LedgerError> {
        self.repo()
            .get_driver_account(user_id)
            .await?
            .ok_or(LedgerError::DriverAccountNotFound(user_id))
    }

    /// Restrict a driver's operating account, stamping reason and time and
    /// invalidating the driver's cached profile.
    pub async fn restrict_driver_account(
        &self,
        user_id: UserId,
        reason: &str,
    ) -> Result<(), LedgerError> {
        self.get_or_create_driver_account(user_id).await?;
        self.repo()
            .set_driver_restriction(user_id, true, Some(reason), Some(Utc::now()))
            .await?;
        self.invalidate_driver(user_id);
        Ok(())
    }

    /// Lift a driver's restriction.
    pub async fn unrestrict_driver_account(&self, user_id: UserId) -> Result<(), LedgerError> {
        self.get_or_create_driver_account(user_id).await?;
        self.repo()
            .set_driver_restriction(user_id, false, None, None)
            .await?;
        self.invalidate_driver(user_id);
        Ok(())
    }

    /// Read the driver's balance, evaluate it against the threshold and
    /// transition the account if needed. Returns the resulting standing.
    /// Fails with `WalletNotFound` when the driver has no wallet.
    pub async fn check_and_enforce_account_restriction(
        &self,
        user_id: UserId,
    ) -> Result<RestrictionOutcome, LedgerError> {
        let wallet = self
            .repo()
            .get_wallet_by_user(user_id, WalletKind::Driver)
            .await?
            .ok_or_else(|| {
                LedgerError::WalletNotFound(format!("{} ({})", user_id, WalletKind::Driver))
            })?;

        let account = self.get_or_create_driver_account(user_id).await?;

        if !account.is_restricted && wallet.balance_cents < account.min_balance_cents {
            let reason = format!(
                "Wallet balance {} below minimum {}",
                format_cents(wallet.balance_cents),
                format_cents(account.min_balance_cents)
            );
            self.restrict_driver_account(user_id, &reason).await?;
            return Ok(RestrictionOutcome {
                standing: AccountStanding::Restricted,
                reason: Some(reason),
                changed: true,
            });
        }

        if account.is_restricted && wallet.balance_cents >= 0 {
            self.unrestrict_driver_account(user_id).await?;
            return Ok(RestrictionOutcome {
                standing: AccountStanding::Active,
                reason: None,
                changed: true,
            });
        }

        Ok(RestrictionOutcome {
            standing: account.standing(),
            reason: account.restriction_reason,
            changed: false,
        })
    }

    /// Post-commit side effects of a driver-wallet mutation: warn on a
    /// negative result, append the audit entry and dispatch the restriction
    /// recheck. None of these may fail the mutation that triggered them —
    /// audit and recheck failures are logged and swallowed.
    pub(crate) async fn post_driver_mutation(
        &self,
        wallet: &Wallet,
        transaction: &WalletTransaction,
        action: AuditAction,
        reason: Option<String>,
    ) {
        if wallet.kind != WalletKind::Driver {
            return;
        }

        if wallet.balance_cents < 0 {
            warn!(
                user_id = %wallet.user_id,
                balance = %format_cents(wallet.balance_cents),
                action = %action,
                "driver wallet balance went negative"
            );
        }

        if let Err(err) = self.audit_driver_mutation(wallet, transaction, action, reason).await {
            warn!(
                user_id = %wallet.user_id,
                error = %err,
                "failed to record driver balance audit"
            );
        }

        self.spawn_restriction_recheck(wallet.user_id);
    }

    async fn audit_driver_mutation(
        &self,
        wallet: &Wallet,
        transaction: &WalletTransaction,
        action: AuditAction,
        reason: Option<String>,
    ) -> Result<(), LedgerError> {
        let account = self.get_or_create_driver_account(wallet.user_id).await?;

        let previous = transaction.balance_before_cents;
        let new = transaction.balance_after_cents;
        let triggered = !account.is_restricted
            && previous >= account.min_balance_cents
            && new < account.min_balance_cents;

        let mut audit = DriverBalanceAudit::new(account.id, wallet.user_id, previous, new, action)
            .with_triggered_restriction(triggered);
        if let Some(reason) = reason {
            audit = audit.with_reason(reason);
        }

        self.repo().insert_balance_audit(&audit).await?;
        Ok(())
    }

    /// List a driver's balance audit trail, oldest first.
    pub async fn list_balance_audits(
        &self,
        user_id: UserId,
    ) -> Result<Vec<DriverBalanceAudit>, LedgerError> {
        Ok(self.repo().list_audits_for_user(user_id).await?)
    }

    /// Dispatch a fire-and-forget recheck. The caller's response never
    /// waits on it; it tolerates running after the debit is already
    /// visible.
    pub(crate) fn spawn_restriction_recheck(&self, user_id: UserId) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(err) = service.check_and_enforce_account_restriction(user_id).await {
                warn!(user_id = %user_id, error = %err, "restriction recheck failed");
            }
        });
    }

    fn invalidate_driver(&self, user_id: UserId) {
        self.cache_handle().delete(&driver_key(user_id));
    }
}
