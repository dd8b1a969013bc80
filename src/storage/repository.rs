use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::{
    Cents, DriverAccount, DriverBalanceAudit, HoldId, HoldStatus, LedgerError, PaymentMethod,
    TransactionDraft, TransactionId, TransactionKind, TransactionStatus, UserId, Wallet,
    WalletHold, WalletId, WalletKind, WalletTransaction,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_HOLDS, MIGRATION_003_DRIVER_RESTRICTION};

/// Result of one atomic balance mutation: the wallet after the change and
/// the ledger entry recording it.
#[derive(Debug, Clone)]
pub struct BalanceChange {
    pub wallet: Wallet,
    pub transaction: WalletTransaction,
}

/// Result of an atomic transfer: both wallets after the change and the
/// paired debit/credit entries, committed together.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub from_wallet: Wallet,
    pub to_wallet: Wallet,
    pub debit: WalletTransaction,
    pub credit: WalletTransaction,
}

/// Result of creating a hold: the wallet with its held balance bumped, the
/// hold itself, and the bookkeeping entry.
#[derive(Debug, Clone)]
pub struct HoldCreation {
    pub wallet: Wallet,
    pub hold: WalletHold,
    pub transaction: WalletTransaction,
}

/// Result of taking a hold out of `active` (release, capture, or expiry).
#[derive(Debug, Clone)]
pub struct HoldSettlement {
    pub wallet: Wallet,
    pub hold: WalletHold,
    pub transaction: WalletTransaction,
}

/// Repository for persisting and querying wallets, transactions, holds and
/// driver restriction state. Every mutating method runs its reads and writes
/// inside a single database transaction; SQLite serializes concurrent
/// writers, so read-modify-write sequences never lose updates.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Failed to parse database URL")?
            // Wait for a contended write lock instead of failing immediately
            // with SQLITE_BUSY.
            .busy_timeout(Duration::from_secs(5));
        // Serialize access over a single connection: SQLite allows only one
        // writer, and the fire-and-forget restriction recheck can otherwise
        // deadlock a foreground write (two deferred transactions each holding
        // a shared lock), which surfaces as a non-retryable SQLITE_BUSY.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::query(MIGRATION_002_HOLDS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        sqlx::query(MIGRATION_003_DRIVER_RESTRICTION)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 003")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Wallet operations
    // ========================

    /// Save a new wallet. The (user_id, kind) pair is unique; callers
    /// resolve-or-create explicitly and never repurpose an existing wallet's
    /// kind.
    pub async fn save_wallet(&self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, kind, balance_cents, held_cents, currency, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(wallet.id.to_string())
        .bind(wallet.user_id.to_string())
        .bind(wallet.kind.as_str())
        .bind(wallet.balance_cents)
        .bind(wallet.held_cents)
        .bind(&wallet.currency)
        .bind(wallet.is_active)
        .bind(wallet.created_at.to_rfc3339())
        .bind(wallet.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save wallet")?;
        Ok(())
    }

    /// Get a wallet by ID.
    pub async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch wallet")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_wallet(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a user's wallet of a specific kind.
    pub async fn get_wallet_by_user(
        &self,
        user_id: UserId,
        kind: WalletKind,
    ) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE user_id = ? AND kind = ?")
            .bind(user_id.to_string())
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch wallet by user")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_wallet(&row)?)),
            None => Ok(None),
        }
    }

    /// List all wallets.
    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let rows = sqlx::query("SELECT * FROM wallets ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list wallets")?;

        rows.iter().map(Self::row_to_wallet).collect()
    }

    /// Activate or deactivate a wallet. Inactive wallets refuse every
    /// mutating operation.
    pub async fn set_wallet_active(&self, id: WalletId, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE wallets SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update wallet active flag")?;
        Ok(())
    }

    // ========================
    // Balance mutator
    // ========================

    /// Atomically apply a signed delta to a wallet and record the matching
    /// ledger entry. Reads the wallet, re-checks preconditions, writes the
    /// new balance and inserts the transaction in one scope that commits or
    /// rolls back as a unit.
    ///
    /// `allow_negative` controls whether the debit may push the available
    /// balance below zero (driver/platform wallets yes, cash settlement no).
    pub async fn apply_balance_change(
        &self,
        wallet_id: WalletId,
        delta: Cents,
        allow_negative: bool,
        draft: TransactionDraft,
    ) -> Result<BalanceChange, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let mut wallet = Self::load_wallet_tx(&mut tx, wallet_id).await?;

        if !wallet.is_active {
            return Err(LedgerError::WalletInactive(wallet.id));
        }
        if delta < 0 && !allow_negative {
            let available = wallet.available_cents();
            if available + delta < 0 {
                return Err(LedgerError::InsufficientBalance {
                    wallet_id: wallet.id,
                    available,
                    required: -delta,
                });
            }
        }

        let balance_before = wallet.balance_cents;
        wallet.balance_cents += delta;
        wallet.updated_at = Utc::now();

        Self::write_wallet_balances_tx(&mut tx, &wallet).await?;

        let mut record =
            draft.into_transaction(wallet.id, balance_before, wallet.balance_cents);
        Self::insert_transaction_tx(&mut tx, &mut record).await?;

        tx.commit().await.context("Failed to commit transaction")?;

        Ok(BalanceChange {
            wallet,
            transaction: record,
        })
    }

    /// Atomically debit one wallet and credit another, inserting the paired
    /// entries together. Either everything commits or nothing does, so a
    /// failure on the recipient side never leaves a dangling debit.
    pub async fn transfer_between(
        &self,
        from_id: WalletId,
        to_id: WalletId,
        amount_cents: Cents,
        debit_draft: TransactionDraft,
        credit_draft: TransactionDraft,
    ) -> Result<TransferOutcome, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let mut from_wallet = Self::load_wallet_tx(&mut tx, from_id).await?;
        let mut to_wallet = Self::load_wallet_tx(&mut tx, to_id).await?;

        if !from_wallet.is_active {
            return Err(LedgerError::WalletInactive(from_wallet.id));
        }
        if !to_wallet.is_active {
            return Err(LedgerError::WalletInactive(to_wallet.id));
        }
        // Transfers are discretionary moves, not owed deductions: the sender
        // must cover the amount even when its kind may run negative.
        let available = from_wallet.available_cents();
        if available < amount_cents {
            return Err(LedgerError::InsufficientBalance {
                wallet_id: from_wallet.id,
                available,
                required: amount_cents,
            });
        }

        let now = Utc::now();

        let from_before = from_wallet.balance_cents;
        from_wallet.balance_cents -= amount_cents;
        from_wallet.updated_at = now;
        Self::write_wallet_balances_tx(&mut tx, &from_wallet).await?;

        let to_before = to_wallet.balance_cents;
        to_wallet.balance_cents += amount_cents;
        to_wallet.updated_at = now;
        Self::write_wallet_balances_tx(&mut tx, &to_wallet).await?;

        let mut debit =
            debit_draft.into_transaction(from_wallet.id, from_before, from_wallet.balance_cents);
        Self::insert_transaction_tx(&mut tx, &mut debit).await?;

        let mut credit =
            credit_draft.into_transaction(to_wallet.id, to_before, to_wallet.balance_cents);
        Self::insert_transaction_tx(&mut tx, &mut credit).await?;

        tx.commit().await.context("Failed to commit transfer")?;

        Ok(TransferOutcome {
            from_wallet,
            to_wallet,
            debit,
            credit,
        })
    }

    // ========================
    // Transaction queries
    // ========================

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<WalletTransaction>> {
        let row = sqlx::query("SELECT * FROM wallet_transactions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch transaction")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    /// List a wallet's transactions with optional filters, ordered by
    /// sequence.
    pub async fn list_transactions_for_wallet(
        &self,
        wallet_id: WalletId,
        kind: Option<TransactionKind>,
        reference_kind: Option<&str>,
        from_date: Option<DateTime<Utc>>,
        to_date: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<WalletTransaction>> {
        let mut query = String::from("SELECT * FROM wallet_transactions WHERE wallet_id = ?");

        let from_date_str = from_date.map(|dt| dt.to_rfc3339());
        let to_date_str = to_date.map(|dt| dt.to_rfc3339());

        if kind.is_some() {
            query.push_str(" AND kind = ?");
        }
        if reference_kind.is_some() {
            query.push_str(" AND reference_kind = ?");
        }
        if from_date.is_some() {
            query.push_str(" AND processed_at >= ?");
        }
        if to_date.is_some() {
            query.push_str(" AND processed_at <= ?");
        }

        query.push_str(" ORDER BY seq");

        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query).bind(wallet_id.to_string());

        if let Some(k) = kind {
            sql_query = sql_query.bind(k.as_str());
        }
        if let Some(rk) = reference_kind {
            sql_query = sql_query.bind(rk);
        }
        if let Some(ref fd) = from_date_str {
            sql_query = sql_query.bind(fd);
        }
        if let Some(ref td) = to_date_str {
            sql_query = sql_query.bind(td);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    // ========================
    // Hold operations
    // ========================

    /// Atomically create a hold, bump the wallet's held balance and insert
    /// the bookkeeping entry. The hold is a tracking reservation: no
    /// available-balance requirement applies on creation.
    pub async fn create_hold(&self, hold: WalletHold) -> Result<HoldCreation, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let mut wallet = Self::load_wallet_tx(&mut tx, hold.wallet_id).await?;

        if !wallet.is_active {
            return Err(LedgerError::WalletInactive(wallet.id));
        }

        wallet.held_cents += hold.amount_cents;
        wallet.updated_at = Utc::now();
        Self::write_wallet_balances_tx(&mut tx, &wallet).await?;

        sqlx::query(
            r#"
            INSERT INTO wallet_holds (id, wallet_id, amount_cents, reference_kind, reference_id, status, expires_at, released_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(hold.id.to_string())
        .bind(hold.wallet_id.to_string())
        .bind(hold.amount_cents)
        .bind(&hold.reference_kind)
        .bind(&hold.reference_id)
        .bind(hold.status.as_str())
        .bind(hold.expires_at.to_rfc3339())
        .bind(hold.released_at.map(|dt| dt.to_rfc3339()))
        .bind(hold.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to save hold")?;

        let mut draft = TransactionDraft::new(TransactionKind::Hold, hold.amount_cents)
            .with_status(TransactionStatus::Held);
        draft.reference_kind = hold.reference_kind.clone();
        draft.reference_id = hold.reference_id.clone();

        let mut record =
            draft.into_transaction(wallet.id, wallet.balance_cents, wallet.balance_cents);
        Self::insert_transaction_tx(&mut tx, &mut record).await?;

        tx.commit().await.context("Failed to commit hold")?;

        Ok(HoldCreation {
            wallet,
            hold,
            transaction: record,
        })
    }

    /// Get a hold by ID.
    pub async fn get_hold(&self, id: HoldId) -> Result<Option<WalletHold>> {
        let row = sqlx::query("SELECT * FROM wallet_holds WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch hold")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_hold(&row)?)),
            None => Ok(None),
        }
    }

    /// List holds for a wallet, newest first.
    pub async fn list_holds_for_wallet(&self, wallet_id: WalletId) -> Result<Vec<WalletHold>> {
        let rows =
            sqlx::query("SELECT * FROM wallet_holds WHERE wallet_id = ? ORDER BY created_at DESC")
                .bind(wallet_id.to_string())
                .fetch_all(&self.pool)
                .await
                .context("Failed to list holds")?;

        rows.iter().map(Self::row_to_hold).collect()
    }

    /// List active holds whose expiry has passed.
    pub async fn list_expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<WalletHold>> {
        let rows = sqlx::query(
            "SELECT * FROM wallet_holds WHERE status = 'active' AND expires_at < ? ORDER BY expires_at",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list expired holds")?;

        rows.iter().map(Self::row_to_hold).collect()
    }

    /// Atomically take a hold out of `active` into `released` or `expired`,
    /// decrement the wallet's held balance and insert a release entry.
    ///
    /// Returns `Ok(None)` when the hold is no longer active: the status
    /// transition is guarded, so two racing settlements resolve to exactly
    /// one winner and reprocessing is a no-op.
    pub async fn settle_hold_released(
        &self,
        hold_id: HoldId,
        to_status: HoldStatus,
    ) -> Result<Option<HoldSettlement>, LedgerError> {
        debug_assert!(matches!(
            to_status,
            HoldStatus::Released | HoldStatus::Expired
        ));

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let mut hold = match Self::load_hold_tx(&mut tx, hold_id).await? {
            Some(hold) => hold,
            None => return Err(LedgerError::HoldNotFound(hold_id)),
        };

        let released_at = Utc::now();
        let updated = sqlx::query(
            "UPDATE wallet_holds SET status = ?, released_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(to_status.as_str())
        .bind(released_at.to_rfc3339())
        .bind(hold_id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to update hold status")?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        hold.status = to_status;
        hold.released_at = Some(released_at);

        let mut wallet = Self::load_wallet_tx(&mut tx, hold.wallet_id).await?;
        wallet.held_cents -= hold.amount_cents;
        wallet.updated_at = released_at;
        Self::write_wallet_balances_tx(&mut tx, &wallet).await?;

        let mut draft = TransactionDraft::new(TransactionKind::Release, hold.amount_cents)
            .with_status(TransactionStatus::Released);
        draft.reference_kind = hold.reference_kind.clone();
        draft.reference_id = hold.reference_id.clone();

        let mut record =
            draft.into_transaction(wallet.id, wallet.balance_cents, wallet.balance_cents);
        Self::insert_transaction_tx(&mut tx, &mut record).await?;

        tx.commit().await.context("Failed to commit hold release")?;

        Ok(Some(HoldSettlement {
            wallet,
            hold,
            transaction: record,
        }))
    }

    /// Atomically capture a hold: guarded transition to `captured`,
    /// decrement the held balance by the full hold amount and insert a
    /// completed debit for the capture amount.
    ///
    /// Cash captures record the settlement without altering the digital
    /// balance (the money changed hands outside the ledger); wallet captures
    /// debit the balance and honor the wallet's negative-balance rules.
    pub async fn settle_hold_captured(
        &self,
        hold_id: HoldId,
        capture_cents: Cents,
        method: PaymentMethod,
    ) -> Result<Option<HoldSettlement>, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let mut hold = match Self::load_hold_tx(&mut tx, hold_id).await? {
            Some(hold) => hold,
            None => return Err(LedgerError::HoldNotFound(hold_id)),
        };

        let captured_at = Utc::now();
        let updated = sqlx::query(
            "UPDATE wallet_holds SET status = ?, released_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(HoldStatus::Captured.as_str())
        .bind(captured_at.to_rfc3339())
        .bind(hold_id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to update hold status")?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        hold.status = HoldStatus::Captured;
        hold.released_at = Some(captured_at);

        let mut wallet = Self::load_wallet_tx(&mut tx, hold.wallet_id).await?;
        wallet.held_cents -= hold.amount_cents;

        let balance_before = wallet.balance_cents;
        if method == PaymentMethod::Wallet {
            if !wallet.allows_negative() {
                let available = wallet.balance_cents - wallet.held_cents;
                if available < capture_cents {
                    return Err(LedgerError::InsufficientBalance {
                        wallet_id: wallet.id,
                        available,
                        required: capture_cents,
                    });
                }
            }
            wallet.balance_cents -= capture_cents;
        }
        wallet.updated_at = captured_at;
        Self::write_wallet_balances_tx(&mut tx, &wallet).await?;

        let mut draft = TransactionDraft::debit(capture_cents).with_payment_method(method);
        draft.reference_kind = hold.reference_kind.clone();
        draft.reference_id = hold.reference_id.clone();

        let mut record = draft.into_transaction(wallet.id, balance_before, wallet.balance_cents);
        Self::insert_transaction_tx(&mut tx, &mut record).await?;

        tx.commit().await.context("Failed to commit hold capture")?;

        Ok(Some(HoldSettlement {
            wallet,
            hold,
            transaction: record,
        }))
    }

    // ========================
    // Driver accounts & audit
    // ========================

    /// Get a driver's restriction state.
    pub async fn get_driver_account(&self, user_id: UserId) -> Result<Option<DriverAccount>> {
        let row = sqlx::query("SELECT * FROM driver_accounts WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch driver account")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_driver_account(&row)?)),
            None => Ok(None),
        }
    }

    /// Save a new driver account.
    pub async fn save_driver_account(&self, account: &DriverAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO driver_accounts (id, user_id, is_restricted, min_balance_cents, restricted_at, restriction_reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(account.user_id.to_string())
        .bind(account.is_restricted)
        .bind(account.min_balance_cents)
        .bind(account.restricted_at.map(|dt| dt.to_rfc3339()))
        .bind(&account.restriction_reason)
        .bind(account.created_at.to_rfc3339())
        .bind(account.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save driver account")?;
        Ok(())
    }

    /// Flip a driver's restriction flag, stamping reason and time.
    pub async fn set_driver_restriction(
        &self,
        user_id: UserId,
        restricted: bool,
        reason: Option<&str>,
        restricted_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE driver_accounts
            SET is_restricted = ?, restriction_reason = ?, restricted_at = ?, updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(restricted)
        .bind(reason)
        .bind(restricted_at.map(|dt| dt.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update driver restriction")?;
        Ok(())
    }

    /// Append a balance audit entry. Audit rows are never updated or
    /// deleted.
    pub async fn insert_balance_audit(&self, audit: &DriverBalanceAudit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO driver_balance_audit (id, driver_account_id, user_id, previous_balance_cents, new_balance_cents, change_cents, action, reason, triggered_restriction, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(audit.id.to_string())
        .bind(audit.driver_account_id.to_string())
        .bind(audit.user_id.to_string())
        .bind(audit.previous_balance_cents)
        .bind(audit.new_balance_cents)
        .bind(audit.change_cents)
        .bind(audit.action.as_str())
        .bind(&audit.reason)
        .bind(audit.triggered_restriction)
        .bind(audit.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert balance audit")?;
        Ok(())
    }

    /// List a driver's audit trail, oldest first.
    pub async fn list_audits_for_user(&self, user_id: UserId) -> Result<Vec<DriverBalanceAudit>> {
        let rows =
            sqlx::query("SELECT * FROM driver_balance_audit WHERE user_id = ? ORDER BY created_at")
                .bind(user_id.to_string())
                .fetch_all(&self.pool)
                .await
                .context("Failed to list balance audits")?;

        rows.iter().map(Self::row_to_audit).collect()
    }

    // ========================
    // Transaction-scoped helpers
    // ========================

    async fn load_wallet_tx(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        wallet_id: WalletId,
    ) -> Result<Wallet, LedgerError> {
        let row = sqlx::query("SELECT * FROM wallets WHERE id = ?")
            .bind(wallet_id.to_string())
            .fetch_optional(&mut **tx)
            .await
            .context("Failed to fetch wallet")?;

        match row {
            Some(row) => Ok(Self::row_to_wallet(&row)?),
            None => Err(LedgerError::WalletNotFound(wallet_id.to_string())),
        }
    }

    async fn load_hold_tx(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        hold_id: HoldId,
    ) -> Result<Option<WalletHold>, LedgerError> {
        let row = sqlx::query("SELECT * FROM wallet_holds WHERE id = ?")
            .bind(hold_id.to_string())
            .fetch_optional(&mut **tx)
            .await
            .context("Failed to fetch hold")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_hold(&row)?)),
            None => Ok(None),
        }
    }

    async fn write_wallet_balances_tx(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        wallet: &Wallet,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "UPDATE wallets SET balance_cents = ?, held_cents = ?, updated_at = ? WHERE id = ?",
        )
        .bind(wallet.balance_cents)
        .bind(wallet.held_cents)
        .bind(wallet.updated_at.to_rfc3339())
        .bind(wallet.id.to_string())
        .execute(&mut **tx)
        .await
        .context("Failed to write wallet balances")?;
        Ok(())
    }

    /// Insert a ledger entry and assign its sequence number.
    async fn insert_transaction_tx(
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        record: &mut WalletTransaction,
    ) -> Result<(), LedgerError> {
        let metadata_json =
            serde_json::to_string(&record.metadata).context("Failed to serialize metadata")?;

        let row = sqlx::query(
            r#"
            INSERT INTO wallet_transactions (id, wallet_id, kind, amount_cents, balance_before_cents, balance_after_cents, status, reference_kind, reference_id, metadata, payment_method, processed_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING seq
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.wallet_id.to_string())
        .bind(record.kind.as_str())
        .bind(record.amount_cents)
        .bind(record.balance_before_cents)
        .bind(record.balance_after_cents)
        .bind(record.status.as_str())
        .bind(&record.reference_kind)
        .bind(&record.reference_id)
        .bind(&metadata_json)
        .bind(record.payment_method.map(|m| m.as_str()))
        .bind(record.processed_at.to_rfc3339())
        .bind(record.created_at.to_rfc3339())
        .fetch_one(&mut **tx)
        .await
        .context("Failed to insert transaction")?;

        record.sequence = row.get("seq");
        Ok(())
    }

    // ========================
    // Row mapping
    // ========================

    fn row_to_wallet(row: &sqlx::sqlite::SqliteRow) -> Result<Wallet> {
        let id_str: String = row.get("id");
        let user_id_str: String = row.get("user_id");
        let kind_str: String = row.get("kind");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(Wallet {
            id: Uuid::parse_str(&id_str).context("Invalid wallet ID")?,
            user_id: Uuid::parse_str(&user_id_str).context("Invalid user ID")?,
            kind: WalletKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid wallet kind: {}", kind_str))?,
            balance_cents: row.get("balance_cents"),
            held_cents: row.get("held_cents"),
            currency: row.get("currency"),
            is_active: row.get::<i32, _>("is_active") != 0,
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }

    fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<WalletTransaction> {
        let id_str: String = row.get("id");
        let wallet_id_str: String = row.get("wallet_id");
        let kind_str: String = row.get("kind");
        let status_str: String = row.get("status");
        let metadata_json: String = row.get("metadata");
        let payment_method_str: Option<String> = row.get("payment_method");
        let processed_at_str: String = row.get("processed_at");
        let created_at_str: String = row.get("created_at");

        Ok(WalletTransaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            sequence: row.get("seq"),
            wallet_id: Uuid::parse_str(&wallet_id_str).context("Invalid wallet ID")?,
            kind: TransactionKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
            amount_cents: row.get("amount_cents"),
            balance_before_cents: row.get("balance_before_cents"),
            balance_after_cents: row.get("balance_after_cents"),
            status: TransactionStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?,
            reference_kind: row.get("reference_kind"),
            reference_id: row.get("reference_id"),
            metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
            payment_method: payment_method_str.as_deref().and_then(PaymentMethod::from_str),
            processed_at: parse_timestamp(&processed_at_str)?,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    fn row_to_hold(row: &sqlx::sqlite::SqliteRow) -> Result<WalletHold> {
        let id_str: String = row.get("id");
        let wallet_id_str: String = row.get("wallet_id");
        let status_str: String = row.get("status");
        let expires_at_str: String = row.get("expires_at");
        let released_at_str: Option<String> = row.get("released_at");
        let created_at_str: String = row.get("created_at");

        Ok(WalletHold {
            id: Uuid::parse_str(&id_str).context("Invalid hold ID")?,
            wallet_id: Uuid::parse_str(&wallet_id_str).context("Invalid wallet ID")?,
            amount_cents: row.get("amount_cents"),
            reference_kind: row.get("reference_kind"),
            reference_id: row.get("reference_id"),
            status: HoldStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid hold status: {}", status_str))?,
            expires_at: parse_timestamp(&expires_at_str)?,
            released_at: released_at_str.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    fn row_to_driver_account(row: &sqlx::sqlite::SqliteRow) -> Result<DriverAccount> {
        let id_str: String = row.get("id");
        let user_id_str: String = row.get("user_id");
        let restricted_at_str: Option<String> = row.get("restricted_at");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(DriverAccount {
            id: Uuid::parse_str(&id_str).context("Invalid driver account ID")?,
            user_id: Uuid::parse_str(&user_id_str).context("Invalid user ID")?,
            is_restricted: row.get::<i32, _>("is_restricted") != 0,
            min_balance_cents: row.get("min_balance_cents"),
            restricted_at: restricted_at_str.as_deref().map(parse_timestamp).transpose()?,
            restriction_reason: row.get("restriction_reason"),
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }

    fn row_to_audit(row: &sqlx::sqlite::SqliteRow) -> Result<DriverBalanceAudit> {
        let id_str: String = row.get("id");
        let driver_account_id_str: String = row.get("driver_account_id");
        let user_id_str: String = row.get("user_id");
        let action_str: String = row.get("action");
        let created_at_str: String = row.get("created_at");

        Ok(DriverBalanceAudit {
            id: Uuid::parse_str(&id_str).context("Invalid audit ID")?,
            driver_account_id: Uuid::parse_str(&driver_account_id_str)
                .context("Invalid driver account ID")?,
            user_id: Uuid::parse_str(&user_id_str).context("Invalid user ID")?,
            previous_balance_cents: row.get("previous_balance_cents"),
            new_balance_cents: row.get("new_balance_cents"),
            change_cents: row.get("change_cents"),
            action: crate::domain::AuditAction::from_str(&action_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid audit action: {}", action_str))?,
            reason: row.get("reason"),
            triggered_restriction: row.get::<i32, _>("triggered_restriction") != 0,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("Invalid timestamp")?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use crate::domain::WalletKind;

    use super::*;

    async fn test_repo() -> (Repository, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
        let repo = Repository::init(&url).await.unwrap();
        (repo, dir)
    }

    #[tokio::test]
    async fn test_aborted_transaction_persists_nothing() {
        let (repo, _dir) = test_repo().await;

        let wallet = Wallet::new(Uuid::new_v4(), WalletKind::Rider, "USD".into());
        repo.save_wallet(&wallet).await.unwrap();

        // Write the balance, then drop the transaction without committing:
        // neither the wallet update nor a ledger entry may survive.
        {
            let mut tx = repo.pool.begin().await.unwrap();

            let mut staged = wallet.clone();
            staged.balance_cents = 9999;
            Repository::write_wallet_balances_tx(&mut tx, &staged)
                .await
                .unwrap();
            // Dropped here: implicit rollback before the transaction record
            // would have been inserted.
        }

        let reloaded = repo.get_wallet(wallet.id).await.unwrap().unwrap();
        assert_eq!(reloaded.balance_cents, 0);

        let entries = repo
            .list_transactions_for_wallet(wallet.id, None, None, None, None, None)
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_balance_change_commits_wallet_and_entry_together() {
        let (repo, _dir) = test_repo().await;

        let wallet = Wallet::new(Uuid::new_v4(), WalletKind::Rider, "USD".into());
        repo.save_wallet(&wallet).await.unwrap();

        let change = repo
            .apply_balance_change(wallet.id, 5000, false, TransactionDraft::credit(5000))
            .await
            .unwrap();

        assert_eq!(change.wallet.balance_cents, 5000);
        assert_eq!(change.transaction.balance_before_cents, 0);
        assert_eq!(change.transaction.balance_after_cents, 5000);
        assert!(change.transaction.sequence > 0);

        let entries = repo
            .list_transactions_for_wallet(wallet.id, None, None, None, None, None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_balance_rolls_back_cleanly() {
        let (repo, _dir) = test_repo().await;

        let wallet = Wallet::new(Uuid::new_v4(), WalletKind::Rider, "USD".into());
        repo.save_wallet(&wallet).await.unwrap();

        let result = repo
            .apply_balance_change(wallet.id, -100, false, TransactionDraft::debit(100))
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { .. })
        ));

        let entries = repo
            .list_transactions_for_wallet(wallet.id, None, None, None, None, None)
            .await
            .unwrap();
        assert!(entries.is_empty());
    }
}
