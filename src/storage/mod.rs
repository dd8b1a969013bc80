mod repository;

pub use repository::*;

/// SQL migration for wallets and the transaction ledger
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for holds
pub const MIGRATION_002_HOLDS: &str = include_str!("migrations/002_holds.sql");

/// SQL migration for driver restriction state and balance audit
pub const MIGRATION_003_DRIVER_RESTRICTION: &str =
    include_str!("migrations/003_driver_restriction.sql");
