use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{LedgerConfig, TransactionFilter, WalletService};
use crate::domain::{UserId, WalletKind, format_cents, parse_cents};
use crate::io::Exporter;

/// Fareledger - wallet ledger ops tool
#[derive(Parser)]
#[command(name = "fareledger")]
#[command(about = "Operations tool for the marketplace wallet ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "fareledger.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Wallet inspection commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Credit a wallet manually (support/admin correction)
    AddFunds {
        /// User ID (UUID)
        user: String,

        /// Wallet kind: rider, driver, platform, service_provider
        kind: String,

        /// Amount to credit (e.g., "50.00" or "50")
        amount: String,
    },

    /// List a wallet's transactions
    Transactions {
        /// User ID (UUID)
        user: String,

        /// Wallet kind
        kind: String,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Hold management commands
    #[command(subcommand)]
    Holds(HoldCommands),

    /// Driver restriction commands
    #[command(subcommand)]
    Driver(DriverCommands),

    /// Verify ledger integrity (replay every wallet)
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, balances, audit, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Show one wallet's balances
    Show {
        /// User ID (UUID)
        user: String,

        /// Wallet kind
        kind: String,
    },

    /// List all wallets
    List,
}

#[derive(Subcommand)]
pub enum HoldCommands {
    /// List a wallet's holds
    List {
        /// User ID (UUID)
        user: String,

        /// Wallet kind
        kind: String,
    },

    /// Release expired holds now
    Sweep,
}

#[derive(Subcommand)]
pub enum DriverCommands {
    /// Show a driver's restriction state
    Status {
        /// Driver user ID (UUID)
        user: String,
    },

    /// Recheck the balance against the threshold and enforce
    Recheck {
        /// Driver user ID (UUID)
        user: String,
    },

    /// Restrict a driver's account
    Restrict {
        /// Driver user ID (UUID)
        user: String,

        /// Reason for the restriction
        reason: String,
    },

    /// Lift a driver's restriction
    Unrestrict {
        /// Driver user ID (UUID)
        user: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(if self.verbose { "debug" } else { "warn" })
        });
        tracing_subscriber::fmt().with_env_filter(filter).init();

        if matches!(self.command, Commands::Init) {
            let service = WalletService::init(&self.database).await?;
            drop(service);
            println!("Initialized ledger database at {}", self.database);
            return Ok(());
        }

        let service = WalletService::connect(&self.database)
            .await?
            .with_config(LedgerConfig::from_env());

        match self.command {
            Commands::Init => unreachable!(),

            Commands::Wallet(cmd) => run_wallet(&service, cmd).await,

            Commands::AddFunds { user, kind, amount } => {
                let user = parse_user(&user)?;
                let kind = parse_kind(&kind)?;
                let amount_cents = parse_cents(&amount).context("Invalid amount")?;

                let change = service
                    .add_funds(user, kind, amount_cents, serde_json::Value::Null)
                    .await?;
                println!(
                    "Credited {} -> balance {}",
                    format_cents(change.transaction.amount_cents),
                    format_cents(change.wallet.balance_cents)
                );
                Ok(())
            }

            Commands::Transactions { user, kind, limit } => {
                let user = parse_user(&user)?;
                let kind = parse_kind(&kind)?;

                let filter = TransactionFilter {
                    limit,
                    ..Default::default()
                };
                let transactions = service.list_transactions(user, kind, filter).await?;
                for tx in &transactions {
                    println!(
                        "{}  #{:<5} {:<8} {:<9} {:>12}  {} -> {}  {}",
                        tx.processed_at.format("%Y-%m-%d %H:%M:%S"),
                        tx.sequence,
                        tx.kind,
                        tx.status,
                        format_cents(tx.amount_cents),
                        format_cents(tx.balance_before_cents),
                        format_cents(tx.balance_after_cents),
                        tx.reference_id.as_deref().unwrap_or("-"),
                    );
                }
                println!("{} transaction(s)", transactions.len());
                Ok(())
            }

            Commands::Holds(cmd) => run_holds(&service, cmd).await,

            Commands::Driver(cmd) => run_driver(&service, cmd).await,

            Commands::Check => {
                let report = service.check_integrity().await?;
                println!(
                    "Checked {} wallet(s), {} transaction(s)",
                    report.wallets_checked, report.transactions_checked
                );
                if report.is_clean() {
                    println!("Ledger is consistent");
                } else {
                    for (wallet, issue) in &report.issues {
                        println!("ISSUE {}: {}", wallet, issue);
                    }
                    anyhow::bail!("{} integrity issue(s) found", report.issues.len());
                }
                Ok(())
            }

            Commands::Export {
                export_type,
                output,
            } => run_export(&service, &export_type, output.as_deref()).await,
        }
    }
}

async fn run_wallet(service: &WalletService, cmd: WalletCommands) -> Result<()> {
    match cmd {
        WalletCommands::Show { user, kind } => {
            let user = parse_user(&user)?;
            let kind = parse_kind(&kind)?;
            let wallet = service.get_wallet(user, kind).await?;
            println!("Wallet    {}", wallet.id);
            println!("User      {}", wallet.user_id);
            println!("Kind      {}", wallet.kind);
            println!("Currency  {}", wallet.currency);
            println!("Balance   {}", format_cents(wallet.balance_cents));
            println!("Held      {}", format_cents(wallet.held_cents));
            println!("Available {}", format_cents(wallet.available_cents()));
            println!("Active    {}", wallet.is_active);
            Ok(())
        }
        WalletCommands::List => {
            let wallets = service.list_wallets().await?;
            for wallet in &wallets {
                println!(
                    "{}  {:<16} {:>12} held {:>12}  {}",
                    wallet.user_id,
                    wallet.kind.to_string(),
                    format_cents(wallet.balance_cents),
                    format_cents(wallet.held_cents),
                    if wallet.is_active { "active" } else { "inactive" },
                );
            }
            println!("{} wallet(s)", wallets.len());
            Ok(())
        }
    }
}

async fn run_holds(service: &WalletService, cmd: HoldCommands) -> Result<()> {
    match cmd {
        HoldCommands::List { user, kind } => {
            let user = parse_user(&user)?;
            let kind = parse_kind(&kind)?;
            let holds = service.list_holds(user, kind).await?;
            for hold in &holds {
                println!(
                    "{}  {:<9} {:>12}  expires {}  {}",
                    hold.id,
                    hold.status.to_string(),
                    format_cents(hold.amount_cents),
                    hold.expires_at.format("%Y-%m-%d %H:%M:%S"),
                    hold.reference_id.as_deref().unwrap_or("-"),
                );
            }
            println!("{} hold(s)", holds.len());
            Ok(())
        }
        HoldCommands::Sweep => {
            let report = service.release_expired_holds().await?;
            println!(
                "Released {} expired hold(s), {} skipped, {} failed",
                report.released, report.skipped, report.failed
            );
            Ok(())
        }
    }
}

async fn run_driver(service: &WalletService, cmd: DriverCommands) -> Result<()> {
    match cmd {
        DriverCommands::Status { user } => {
            let user = parse_user(&user)?;
            let account = service.get_driver_account(user).await?;
            println!("Driver     {}", account.user_id);
            println!("Standing   {}", account.standing());
            println!("Threshold  {}", format_cents(account.min_balance_cents));
            if let Some(reason) = &account.restriction_reason {
                println!("Reason     {}", reason);
            }
            if let Some(at) = account.restricted_at {
                println!("Since      {}", at.format("%Y-%m-%d %H:%M:%S"));
            }
            Ok(())
        }
        DriverCommands::Recheck { user } => {
            let user = parse_user(&user)?;
            let outcome = service.check_and_enforce_account_restriction(user).await?;
            println!(
                "Standing: {}{}",
                outcome.standing,
                if outcome.changed { " (changed)" } else { "" }
            );
            if let Some(reason) = outcome.reason {
                println!("Reason: {}", reason);
            }
            Ok(())
        }
        DriverCommands::Restrict { user, reason } => {
            let user = parse_user(&user)?;
            service.restrict_driver_account(user, &reason).await?;
            println!("Driver {} restricted", user);
            Ok(())
        }
        DriverCommands::Unrestrict { user } => {
            let user = parse_user(&user)?;
            service.unrestrict_driver_account(user).await?;
            println!("Driver {} unrestricted", user);
            Ok(())
        }
    }
}

async fn run_export(
    service: &WalletService,
    export_type: &str,
    output: Option<&str>,
) -> Result<()> {
    let exporter = Exporter::new(service);

    let mut writer: Box<dyn std::io::Write> = match output {
        Some(path) => Box::new(std::fs::File::create(path).context("Failed to create output file")?),
        None => Box::new(std::io::stdout()),
    };

    match export_type {
        "transactions" => {
            let count = exporter.export_transactions_csv(&mut writer).await?;
            eprintln!("Exported {} transaction(s)", count);
        }
        "balances" => {
            let count = exporter.export_balances_csv(&mut writer).await?;
            eprintln!("Exported {} balance(s)", count);
        }
        "audit" => {
            let count = exporter.export_audit_csv(&mut writer).await?;
            eprintln!("Exported {} audit entrie(s)", count);
        }
        "full" => {
            let snapshot = exporter.export_full_json(&mut writer).await?;
            eprintln!(
                "Exported {} wallet(s), {} transaction(s), {} hold(s)",
                snapshot.wallets.len(),
                snapshot.transactions.len(),
                snapshot.holds.len()
            );
        }
        other => anyhow::bail!(
            "Unknown export type '{}' (expected transactions, balances, audit, full)",
            other
        ),
    }

    Ok(())
}

fn parse_user(input: &str) -> Result<UserId> {
    Uuid::parse_str(input).context("Invalid user ID (expected a UUID)")
}

fn parse_kind(input: &str) -> Result<WalletKind> {
    WalletKind::from_str(input).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid wallet kind '{}' (expected rider, driver, platform, service_provider)",
            input
        )
    })
}
