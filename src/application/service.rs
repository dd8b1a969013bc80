use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::cache::{MemoryCache, WalletCache, wallet_key};
use crate::domain::{
    AuditAction, Cents, HoldId, HoldStatus, IntegrityReport, LedgerError, PaymentMethod,
    TransactionDraft, TransactionId, TransactionKind, UserId, Wallet, WalletHold, WalletId,
    WalletKind, WalletTransaction, format_cents, verify_wallet,
};
use crate::storage::{BalanceChange, HoldCreation, HoldSettlement, Repository, TransferOutcome};

use super::LedgerConfig;

/// The ledger façade. Every balance change funnels through the repository's
/// atomic balance mutator; holds funnel through the hold settlement
/// operations. Calling modules (orders, rides, admin) hit this service with
/// a reference kind/id naming their own domain object — the ledger never
/// interprets references or metadata.
///
/// Cloning is cheap and hands out a handle to the same pool and cache,
/// which is how the background sweep and restriction rechecks run.
#[derive(Clone)]
pub struct WalletService {
    repo: Repository,
    cache: Arc<dyn WalletCache>,
    config: LedgerConfig,
}

/// Filter for querying a wallet's transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub reference_kind: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl WalletService {
    /// Create a new service over an existing repository and cache.
    pub fn new(repo: Repository, cache: Arc<dyn WalletCache>, config: LedgerConfig) -> Self {
        Self {
            repo,
            cache,
            config,
        }
    }

    /// Initialize a new database at the given path, with an in-process
    /// cache and default configuration.
    pub async fn init(database_path: &str) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(
            repo,
            Arc::new(MemoryCache::new()),
            LedgerConfig::default(),
        ))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(
            repo,
            Arc::new(MemoryCache::new()),
            LedgerConfig::default(),
        ))
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(crate) fn repo(&self) -> &Repository {
        &self.repo
    }

    pub(crate) fn cache_handle(&self) -> &dyn WalletCache {
        self.cache.as_ref()
    }

    // ========================
    // Wallet resolution
    // ========================

    /// Resolve a user's wallet of the given kind, creating it if absent.
    /// A missing kind is never satisfied by repurposing another wallet of
    /// the same user; each (user, kind) pair is its own wallet.
    pub async fn get_or_create_wallet(
        &self,
        user_id: UserId,
        kind: WalletKind,
    ) -> Result<Wallet, LedgerError> {
        if let Some(wallet) = self.repo.get_wallet_by_user(user_id, kind).await? {
            return Ok(wallet);
        }

        let wallet = Wallet::new(user_id, kind, self.config.default_currency.clone());
        match self.repo.save_wallet(&wallet).await {
            Ok(()) => Ok(wallet),
            // Lost a creation race: the unique (user_id, kind) index kicked
            // in, so the winner's row is there to fetch.
            Err(err) => match self.repo.get_wallet_by_user(user_id, kind).await? {
                Some(existing) => Ok(existing),
                None => Err(err.into()),
            },
        }
    }

    /// Cache-aside wallet read. Mutating operations never trust this copy;
    /// the balance mutator re-reads inside its own transaction.
    pub async fn get_wallet(
        &self,
        user_id: UserId,
        kind: WalletKind,
    ) -> Result<Wallet, LedgerError> {
        let key = wallet_key(user_id, kind);
        if let Some(json) = self.cache.get(&key) {
            if let Ok(wallet) = serde_json::from_str::<Wallet>(&json) {
                return Ok(wallet);
            }
        }

        let wallet = self
            .repo
            .get_wallet_by_user(user_id, kind)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(format!("{} ({})", user_id, kind)))?;

        if let Ok(json) = serde_json::to_string(&wallet) {
            self.cache.set(&key, json, self.config.cache_ttl());
        }
        Ok(wallet)
    }

    /// Get a wallet by ID.
    pub async fn get_wallet_by_id(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        self.repo
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))
    }

    /// List every wallet in the ledger.
    pub async fn list_wallets(&self) -> Result<Vec<Wallet>, LedgerError> {
        Ok(self.repo.list_wallets().await?)
    }

    /// Activate or deactivate a wallet.
    pub async fn set_wallet_active(
        &self,
        user_id: UserId,
        kind: WalletKind,
        is_active: bool,
    ) -> Result<Wallet, LedgerError> {
        let wallet = self.get_or_create_wallet(user_id, kind).await?;
        self.repo.set_wallet_active(wallet.id, is_active).await?;
        self.invalidate_wallet(user_id, kind);
        self.get_wallet_by_id(wallet.id).await
    }

    pub(crate) fn invalidate_wallet(&self, user_id: UserId, kind: WalletKind) {
        self.cache.delete(&wallet_key(user_id, kind));
    }

    // ========================
    // Credits and debits
    // ========================

    /// Credit a wallet from a top-up. Capped per transaction.
    pub async fn add_funds(
        &self,
        user_id: UserId,
        kind: WalletKind,
        amount_cents: Cents,
        metadata: serde_json::Value,
    ) -> Result<BalanceChange, LedgerError> {
        validate_amount(amount_cents, Some(self.config.max_transaction_cents))?;

        let wallet = self.get_or_create_wallet(user_id, kind).await?;
        let draft = TransactionDraft::credit(amount_cents).with_metadata(metadata);
        let change = self
            .repo
            .apply_balance_change(wallet.id, amount_cents, true, draft)
            .await?;
        self.invalidate_wallet(user_id, kind);
        self.post_driver_mutation(&change.wallet, &change.transaction, AuditAction::Credit, None)
            .await;
        Ok(change)
    }

    /// Debit a wallet for a cash-out. Requires sufficient available balance
    /// for every wallet kind; withdrawals never push a balance negative.
    pub async fn withdraw_funds(
        &self,
        user_id: UserId,
        kind: WalletKind,
        amount_cents: Cents,
        metadata: serde_json::Value,
    ) -> Result<BalanceChange, LedgerError> {
        validate_amount(amount_cents, None)?;

        let wallet = self.get_or_create_wallet(user_id, kind).await?;
        let draft = TransactionDraft::debit(amount_cents).with_metadata(metadata);
        let change = self
            .repo
            .apply_balance_change(wallet.id, -amount_cents, false, draft)
            .await?;
        self.invalidate_wallet(user_id, kind);
        self.post_driver_mutation(&change.wallet, &change.transaction, AuditAction::Debit, None)
            .await;
        Ok(change)
    }

    /// Generic credit entry point for calling modules (order completion,
    /// refund flows, promotions).
    pub async fn credit_wallet(
        &self,
        user_id: UserId,
        kind: WalletKind,
        amount_cents: Cents,
        reference_kind: impl Into<String>,
        reference_id: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<BalanceChange, LedgerError> {
        validate_amount(amount_cents, None)?;

        let wallet = self.get_or_create_wallet(user_id, kind).await?;
        let draft = TransactionDraft::credit(amount_cents)
            .with_reference(reference_kind, reference_id)
            .with_metadata(metadata);
        let change = self
            .repo
            .apply_balance_change(wallet.id, amount_cents, true, draft)
            .await?;
        self.invalidate_wallet(user_id, kind);
        self.post_driver_mutation(&change.wallet, &change.transaction, AuditAction::Credit, None)
            .await;
        Ok(change)
    }

    /// Generic debit entry point for calling modules. Rider and
    /// service-provider wallets must cover the amount from their available
    /// balance; driver and platform wallets may go negative.
    pub async fn debit_wallet(
        &self,
        user_id: UserId,
        kind: WalletKind,
        amount_cents: Cents,
        reference_kind: impl Into<String>,
        reference_id: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<BalanceChange, LedgerError> {
        validate_amount(amount_cents, None)?;

        let wallet = self.get_or_create_wallet(user_id, kind).await?;
        let draft = TransactionDraft::debit(amount_cents)
            .with_reference(reference_kind, reference_id)
            .with_metadata(metadata);
        let change = self
            .repo
            .apply_balance_change(wallet.id, -amount_cents, wallet.allows_negative(), draft)
            .await?;
        self.invalidate_wallet(user_id, kind);
        self.post_driver_mutation(&change.wallet, &change.transaction, AuditAction::Debit, None)
            .await;
        Ok(change)
    }

    /// Move funds between two wallets. The paired debit and credit entries
    /// commit atomically together; a failure on either side leaves both
    /// wallets untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer_funds(
        &self,
        from_user: UserId,
        from_kind: WalletKind,
        to_user: UserId,
        to_kind: WalletKind,
        amount_cents: Cents,
        reference_kind: impl Into<String>,
        reference_id: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<TransferOutcome, LedgerError> {
        validate_amount(amount_cents, None)?;

        let from_wallet = self.get_or_create_wallet(from_user, from_kind).await?;
        let to_wallet = self.get_or_create_wallet(to_user, to_kind).await?;

        if from_wallet.id == to_wallet.id {
            return Err(LedgerError::SelfTransfer);
        }

        let reference_kind = reference_kind.into();
        let reference_id = reference_id.into();
        let debit_draft = TransactionDraft::debit(amount_cents)
            .with_reference(reference_kind.clone(), reference_id.clone())
            .with_metadata(metadata.clone());
        let credit_draft = TransactionDraft::credit(amount_cents)
            .with_reference(reference_kind, reference_id)
            .with_metadata(metadata);

        let outcome = self
            .repo
            .transfer_between(
                from_wallet.id,
                to_wallet.id,
                amount_cents,
                debit_draft,
                credit_draft,
            )
            .await?;

        self.invalidate_wallet(from_user, from_kind);
        self.invalidate_wallet(to_user, to_kind);
        self.post_driver_mutation(
            &outcome.from_wallet,
            &outcome.debit,
            AuditAction::Transfer,
            None,
        )
        .await;
        self.post_driver_mutation(
            &outcome.to_wallet,
            &outcome.credit,
            AuditAction::Transfer,
            None,
        )
        .await;
        Ok(outcome)
    }

    /// Compensate a completed debit with a refund credit. The original
    /// entry is never touched; the refund references it.
    pub async fn refund_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<BalanceChange, LedgerError> {
        let original = self
            .repo
            .get_transaction(transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;

        if original.kind != TransactionKind::Debit
            || original.status != crate::domain::TransactionStatus::Completed
            || original.delta_cents() == 0
        {
            return Err(LedgerError::RefundNotAllowed(
                transaction_id,
                "only completed balance-moving debits can be refunded".to_string(),
            ));
        }

        let wallet = self.get_wallet_by_id(original.wallet_id).await?;
        let draft = TransactionDraft::new(TransactionKind::Refund, original.amount_cents)
            .with_reference("transaction", original.id.to_string());
        let change = self
            .repo
            .apply_balance_change(wallet.id, original.amount_cents, true, draft)
            .await?;
        self.invalidate_wallet(wallet.user_id, wallet.kind);
        self.post_driver_mutation(&change.wallet, &change.transaction, AuditAction::Refund, None)
            .await;
        Ok(change)
    }

    // ========================
    // Driver wallet operations
    // ========================

    /// Debit a driver's wallet past zero if needed. Negative results are
    /// allowed by design (the deduction is owed regardless of cash on hand)
    /// and surface as a warning plus an audit entry and a background
    /// restriction recheck.
    pub async fn debit_driver_wallet(
        &self,
        user_id: UserId,
        amount_cents: Cents,
        action: AuditAction,
        reference_kind: impl Into<String>,
        reference_id: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<BalanceChange, LedgerError> {
        validate_amount(amount_cents, None)?;

        let wallet = self.get_or_create_wallet(user_id, WalletKind::Driver).await?;
        let draft = TransactionDraft::debit(amount_cents)
            .with_reference(reference_kind, reference_id)
            .with_metadata(metadata);
        let change = self
            .repo
            .apply_balance_change(wallet.id, -amount_cents, true, draft)
            .await?;
        self.invalidate_wallet(user_id, WalletKind::Driver);
        self.post_driver_mutation(&change.wallet, &change.transaction, action, None)
            .await;
        Ok(change)
    }

    /// Deduct the platform's commission for a completed ride/order.
    pub async fn deduct_commission(
        &self,
        user_id: UserId,
        amount_cents: Cents,
        reference_id: impl Into<String>,
    ) -> Result<BalanceChange, LedgerError> {
        self.debit_driver_wallet(
            user_id,
            amount_cents,
            AuditAction::Commission,
            "commission",
            reference_id,
            serde_json::Value::Null,
        )
        .await
    }

    /// Deduct a penalty (cancellation fee, policy violation).
    pub async fn deduct_penalty(
        &self,
        user_id: UserId,
        amount_cents: Cents,
        reference_id: impl Into<String>,
    ) -> Result<BalanceChange, LedgerError> {
        self.debit_driver_wallet(
            user_id,
            amount_cents,
            AuditAction::Penalty,
            "penalty",
            reference_id,
            serde_json::Value::Null,
        )
        .await
    }

    /// Deduct a subscription fee.
    pub async fn deduct_subscription(
        &self,
        user_id: UserId,
        amount_cents: Cents,
        reference_id: impl Into<String>,
    ) -> Result<BalanceChange, LedgerError> {
        self.debit_driver_wallet(
            user_id,
            amount_cents,
            AuditAction::Subscription,
            "subscription",
            reference_id,
            serde_json::Value::Null,
        )
        .await
    }

    /// Return a driver's available balance, signalling `InsufficientBalance`
    /// when it does not cover the requested amount. Never mutates.
    pub async fn validate_driver_wallet_balance(
        &self,
        user_id: UserId,
        required_cents: Cents,
    ) -> Result<Cents, LedgerError> {
        let wallet = self
            .repo
            .get_wallet_by_user(user_id, WalletKind::Driver)
            .await?
            .ok_or_else(|| {
                LedgerError::WalletNotFound(format!("{} ({})", user_id, WalletKind::Driver))
            })?;

        let available = wallet.available_cents();
        if available < required_cents {
            return Err(LedgerError::InsufficientBalance {
                wallet_id: wallet.id,
                available,
                required: required_cents,
            });
        }
        Ok(available)
    }

    /// Record cash a driver collected on the platform's behalf as a
    /// cash-tagged credit, for later reconciliation.
    pub async fn record_cash_collection(
        &self,
        user_id: UserId,
        amount_cents: Cents,
        reference_kind: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Result<BalanceChange, LedgerError> {
        validate_amount(amount_cents, Some(self.config.max_transaction_cents))?;

        let wallet = self.get_or_create_wallet(user_id, WalletKind::Driver).await?;
        let draft = TransactionDraft::credit(amount_cents)
            .with_reference(reference_kind, reference_id)
            .with_payment_method(PaymentMethod::Cash);
        let change = self
            .repo
            .apply_balance_change(wallet.id, amount_cents, true, draft)
            .await?;
        self.invalidate_wallet(user_id, WalletKind::Driver);
        self.post_driver_mutation(
            &change.wallet,
            &change.transaction,
            AuditAction::CashCollection,
            None,
        )
        .await;
        Ok(change)
    }

    /// Record a driver settling collected cash back to the platform as a
    /// cash-tagged debit. Settlement must be covered by the available
    /// balance.
    pub async fn record_cash_payment(
        &self,
        user_id: UserId,
        amount_cents: Cents,
        reference_kind: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Result<BalanceChange, LedgerError> {
        validate_amount(amount_cents, Some(self.config.max_transaction_cents))?;

        let wallet = self.get_or_create_wallet(user_id, WalletKind::Driver).await?;
        let draft = TransactionDraft::debit(amount_cents)
            .with_reference(reference_kind, reference_id)
            .with_payment_method(PaymentMethod::Cash);
        let change = self
            .repo
            .apply_balance_change(wallet.id, -amount_cents, false, draft)
            .await?;
        self.invalidate_wallet(user_id, WalletKind::Driver);
        self.post_driver_mutation(
            &change.wallet,
            &change.transaction,
            AuditAction::CashPayment,
            None,
        )
        .await;
        Ok(change)
    }

    // ========================
    // Holds
    // ========================

    /// Reserve funds against a pending obligation. The reservation counts
    /// toward `held_cents` immediately but does not require available
    /// balance: for cash-tracked flows it models an expected charge, not a
    /// balance lock.
    pub async fn hold_funds(
        &self,
        user_id: UserId,
        kind: WalletKind,
        amount_cents: Cents,
        reference_kind: impl Into<String>,
        reference_id: impl Into<String>,
        duration: Option<Duration>,
    ) -> Result<HoldCreation, LedgerError> {
        validate_amount(amount_cents, None)?;

        let wallet = self.get_or_create_wallet(user_id, kind).await?;
        let expires_at =
            Utc::now() + duration.unwrap_or_else(|| self.config.default_hold_duration());
        let hold = WalletHold::new(wallet.id, amount_cents, expires_at)
            .with_reference(reference_kind, reference_id);

        let creation = self.repo.create_hold(hold).await?;
        self.invalidate_wallet(user_id, kind);
        Ok(creation)
    }

    /// Release an active hold, returning the reserved amount to the
    /// available balance. Only the wallet owner may release.
    pub async fn release_hold(
        &self,
        user_id: UserId,
        hold_id: HoldId,
    ) -> Result<HoldSettlement, LedgerError> {
        let (hold, wallet) = self.load_owned_hold(user_id, hold_id).await?;

        match self
            .repo
            .settle_hold_released(hold.id, HoldStatus::Released)
            .await?
        {
            Some(settlement) => {
                self.invalidate_wallet(wallet.user_id, wallet.kind);
                Ok(settlement)
            }
            None => Err(self.hold_state_error(hold_id).await),
        }
    }

    /// Capture an active hold into a completed debit, fully or partially.
    /// Cash captures record the settlement without touching the digital
    /// balance; wallet captures debit it.
    pub async fn capture_hold(
        &self,
        user_id: UserId,
        hold_id: HoldId,
        capture_cents: Option<Cents>,
        method: PaymentMethod,
    ) -> Result<HoldSettlement, LedgerError> {
        let (hold, wallet) = self.load_owned_hold(user_id, hold_id).await?;

        let capture_cents = capture_cents.unwrap_or(hold.amount_cents);
        if capture_cents <= 0 {
            return Err(LedgerError::InvalidAmount(
                "Capture amount must be positive".to_string(),
            ));
        }
        if capture_cents > hold.amount_cents {
            return Err(LedgerError::InvalidAmount(format!(
                "Capture amount {} exceeds hold amount {}",
                format_cents(capture_cents),
                format_cents(hold.amount_cents)
            )));
        }

        match self
            .repo
            .settle_hold_captured(hold.id, capture_cents, method)
            .await?
        {
            Some(settlement) => {
                self.invalidate_wallet(wallet.user_id, wallet.kind);
                if settlement.transaction.delta_cents() != 0 {
                    self.post_driver_mutation(
                        &settlement.wallet,
                        &settlement.transaction,
                        AuditAction::Debit,
                        None,
                    )
                    .await;
                }
                Ok(settlement)
            }
            None => Err(self.hold_state_error(hold_id).await),
        }
    }

    /// Get a hold by ID.
    pub async fn get_hold(&self, hold_id: HoldId) -> Result<WalletHold, LedgerError> {
        self.repo
            .get_hold(hold_id)
            .await?
            .ok_or(LedgerError::HoldNotFound(hold_id))
    }

    /// List a user's holds for one wallet kind, newest first.
    pub async fn list_holds(
        &self,
        user_id: UserId,
        kind: WalletKind,
    ) -> Result<Vec<WalletHold>, LedgerError> {
        let wallet = self.get_wallet(user_id, kind).await?;
        Ok(self.repo.list_holds_for_wallet(wallet.id).await?)
    }

    async fn load_owned_hold(
        &self,
        user_id: UserId,
        hold_id: HoldId,
    ) -> Result<(WalletHold, Wallet), LedgerError> {
        let hold = self
            .repo
            .get_hold(hold_id)
            .await?
            .ok_or(LedgerError::HoldNotFound(hold_id))?;
        let wallet = self.get_wallet_by_id(hold.wallet_id).await?;
        if wallet.user_id != user_id {
            return Err(LedgerError::Forbidden {
                user_id,
                wallet_id: wallet.id,
            });
        }
        Ok((hold, wallet))
    }

    /// The guarded transition found the hold already settled; report its
    /// current state.
    async fn hold_state_error(&self, hold_id: HoldId) -> LedgerError {
        match self.repo.get_hold(hold_id).await {
            Ok(Some(hold)) => LedgerError::InvalidHoldState {
                hold_id,
                status: hold.status,
            },
            Ok(None) => LedgerError::HoldNotFound(hold_id),
            Err(err) => LedgerError::Database(err),
        }
    }

    // ========================
    // Queries & integrity
    // ========================

    /// Get a transaction by ID.
    pub async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<WalletTransaction, LedgerError> {
        self.repo
            .get_transaction(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    /// List a user's transactions for one wallet kind.
    pub async fn list_transactions(
        &self,
        user_id: UserId,
        kind: WalletKind,
        filter: TransactionFilter,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let wallet = self.get_wallet(user_id, kind).await?;
        Ok(self
            .repo
            .list_transactions_for_wallet(
                wallet.id,
                filter.kind,
                filter.reference_kind.as_deref(),
                filter.from_date,
                filter.to_date,
                filter.limit,
            )
            .await?)
    }

    /// Verify every wallet: replay its completed transactions against the
    /// stored balance and its active holds against the held balance.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let wallets = self.repo.list_wallets().await?;
        let mut report = IntegrityReport::default();

        for wallet in &wallets {
            let transactions = self
                .repo
                .list_transactions_for_wallet(wallet.id, None, None, None, None, None)
                .await?;
            let holds = self.repo.list_holds_for_wallet(wallet.id).await?;
            verify_wallet(&mut report, wallet, &transactions, &holds);
        }

        Ok(report)
    }
}

fn validate_amount(amount_cents: Cents, cap: Option<Cents>) -> Result<(), LedgerError> {
    if amount_cents <= 0 {
        return Err(LedgerError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    if let Some(cap) = cap {
        if amount_cents > cap {
            return Err(LedgerError::InvalidAmount(format!(
                "Amount {} exceeds the per-transaction cap of {}",
                format_cents(amount_cents),
                format_cents(cap)
            )));
        }
    }
    Ok(())
}
