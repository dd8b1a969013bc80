// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use fareledger::application::WalletService;
use fareledger::domain::{UserId, WalletKind};
use tempfile::TempDir;
use uuid::Uuid;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(WalletService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = WalletService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

pub fn user() -> UserId {
    Uuid::new_v4()
}

/// Fixture: a rider wallet funded with the given balance.
pub async fn funded_rider(service: &WalletService, cents: i64) -> Result<UserId> {
    let rider = user();
    service
        .add_funds(rider, WalletKind::Rider, cents, serde_json::Value::Null)
        .await?;
    Ok(rider)
}

/// Fixture: a driver wallet funded with the given balance.
pub async fn funded_driver(service: &WalletService, cents: i64) -> Result<UserId> {
    let driver = user();
    service
        .add_funds(driver, WalletKind::Driver, cents, serde_json::Value::Null)
        .await?;
    Ok(driver)
}
