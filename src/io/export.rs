use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::WalletService;
use crate::domain::{Wallet, WalletHold, WalletKind, WalletTransaction, format_cents};

/// Ledger snapshot for full export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub wallets: Vec<Wallet>,
    pub transactions: Vec<WalletTransaction>,
    pub holds: Vec<WalletHold>,
}

/// Exporter for reconciliation and compliance review: transactions and
/// balances as CSV, the full ledger as a JSON snapshot.
pub struct Exporter<'a> {
    service: &'a WalletService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a WalletService) -> Self {
        Self { service }
    }

    /// Export every wallet's transactions to CSV, ordered per wallet by
    /// sequence.
    pub async fn export_transactions_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "sequence",
            "wallet_id",
            "user_id",
            "wallet_kind",
            "kind",
            "status",
            "amount",
            "balance_before",
            "balance_after",
            "reference_kind",
            "reference_id",
            "payment_method",
            "processed_at",
        ])?;

        let mut count = 0;
        for wallet in self.service.list_wallets().await? {
            let transactions = self
                .service
                .repo()
                .list_transactions_for_wallet(wallet.id, None, None, None, None, None)
                .await?;

            for tx in &transactions {
                csv_writer.write_record([
                    tx.id.to_string(),
                    tx.sequence.to_string(),
                    wallet.id.to_string(),
                    wallet.user_id.to_string(),
                    wallet.kind.to_string(),
                    tx.kind.to_string(),
                    tx.status.to_string(),
                    format_cents(tx.amount_cents),
                    format_cents(tx.balance_before_cents),
                    format_cents(tx.balance_after_cents),
                    tx.reference_kind.clone().unwrap_or_default(),
                    tx.reference_id.clone().unwrap_or_default(),
                    tx.payment_method
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                    tx.processed_at.to_rfc3339(),
                ])?;
                count += 1;
            }
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export wallet balances to CSV.
    pub async fn export_balances_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "user_id", "kind", "currency", "balance", "held", "available", "active",
        ])?;

        let mut count = 0;
        for wallet in self.service.list_wallets().await? {
            csv_writer.write_record([
                wallet.user_id.to_string(),
                wallet.kind.to_string(),
                wallet.currency.clone(),
                format_cents(wallet.balance_cents),
                format_cents(wallet.held_cents),
                format_cents(wallet.available_cents()),
                wallet.is_active.to_string(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export every driver's balance audit trail to CSV.
    pub async fn export_audit_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "user_id",
            "previous_balance",
            "new_balance",
            "change",
            "action",
            "reason",
            "triggered_restriction",
            "created_at",
        ])?;

        let mut count = 0;
        for wallet in self.service.list_wallets().await? {
            if wallet.kind != WalletKind::Driver {
                continue;
            }
            for audit in self.service.repo().list_audits_for_user(wallet.user_id).await? {
                csv_writer.write_record([
                    audit.id.to_string(),
                    audit.user_id.to_string(),
                    format_cents(audit.previous_balance_cents),
                    format_cents(audit.new_balance_cents),
                    format_cents(audit.change_cents),
                    audit.action.to_string(),
                    audit.reason.clone().unwrap_or_default(),
                    audit.triggered_restriction.to_string(),
                    audit.created_at.to_rfc3339(),
                ])?;
                count += 1;
            }
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export the full ledger as a JSON snapshot.
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<LedgerSnapshot> {
        let wallets = self.service.list_wallets().await?;

        let mut transactions = Vec::new();
        let mut holds = Vec::new();
        for wallet in &wallets {
            transactions.extend(
                self.service
                    .repo()
                    .list_transactions_for_wallet(wallet.id, None, None, None, None, None)
                    .await?,
            );
            holds.extend(self.service.repo().list_holds_for_wallet(wallet.id).await?);
        }

        let snapshot = LedgerSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            wallets,
            transactions,
            holds,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
