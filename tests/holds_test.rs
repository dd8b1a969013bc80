mod common;

use anyhow::Result;
use chrono::Duration;
use common::{funded_driver, funded_rider, test_service, user};
use fareledger::domain::{
    HoldStatus, LedgerError, PaymentMethod, TransactionKind, TransactionStatus, WalletKind,
};

#[tokio::test]
async fn test_hold_then_partial_cash_capture() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 5000).await?;

    // Reserve 12.50 against a pending ride for 30 minutes
    let creation = service
        .hold_funds(
            driver,
            WalletKind::Driver,
            1250,
            "ride",
            "r1",
            Some(Duration::seconds(1800)),
        )
        .await?;
    assert_eq!(creation.hold.status, HoldStatus::Active);
    assert_eq!(creation.wallet.held_cents, 1250);
    assert_eq!(creation.wallet.available_cents(), 3750);
    assert_eq!(creation.transaction.status, TransactionStatus::Held);

    // Capture 11.80 of it, settled in cash
    let settlement = service
        .capture_hold(driver, creation.hold.id, Some(1180), PaymentMethod::Cash)
        .await?;
    assert_eq!(settlement.hold.status, HoldStatus::Captured);
    assert_eq!(settlement.transaction.kind, TransactionKind::Debit);
    assert_eq!(settlement.transaction.status, TransactionStatus::Completed);
    assert_eq!(settlement.transaction.amount_cents, 1180);
    assert_eq!(
        settlement.transaction.payment_method,
        Some(PaymentMethod::Cash)
    );

    // Cash settled outside the ledger: digital balance untouched, the full
    // reservation returned
    assert_eq!(settlement.wallet.balance_cents, 5000);
    assert_eq!(settlement.wallet.held_cents, 0);

    let report = service.check_integrity().await?;
    assert!(report.is_clean(), "issues: {:?}", report.issues);

    Ok(())
}

#[tokio::test]
async fn test_wallet_capture_debits_the_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let rider = funded_rider(&service, 5000).await?;

    let creation = service
        .hold_funds(rider, WalletKind::Rider, 2000, "order", "o1", None)
        .await?;

    let settlement = service
        .capture_hold(rider, creation.hold.id, None, PaymentMethod::Wallet)
        .await?;
    assert_eq!(settlement.transaction.amount_cents, 2000);
    assert_eq!(settlement.transaction.balance_before_cents, 5000);
    assert_eq!(settlement.transaction.balance_after_cents, 3000);
    assert_eq!(settlement.wallet.balance_cents, 3000);
    assert_eq!(settlement.wallet.held_cents, 0);

    let report = service.check_integrity().await?;
    assert!(report.is_clean());

    Ok(())
}

#[tokio::test]
async fn test_no_double_capture() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 5000).await?;

    let creation = service
        .hold_funds(driver, WalletKind::Driver, 1000, "ride", "r2", None)
        .await?;

    service
        .capture_hold(driver, creation.hold.id, None, PaymentMethod::Cash)
        .await?;

    // The second capture loses the guarded transition
    let result = service
        .capture_hold(driver, creation.hold.id, None, PaymentMethod::Cash)
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::InvalidHoldState {
            status: HoldStatus::Captured,
            ..
        })
    ));

    // The held balance was only returned once
    let wallet = service.get_wallet(driver, WalletKind::Driver).await?;
    assert_eq!(wallet.held_cents, 0);

    Ok(())
}

#[tokio::test]
async fn test_no_double_release() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 5000).await?;

    let creation = service
        .hold_funds(driver, WalletKind::Driver, 1000, "ride", "r3", None)
        .await?;

    let settlement = service.release_hold(driver, creation.hold.id).await?;
    assert_eq!(settlement.hold.status, HoldStatus::Released);
    assert!(settlement.hold.released_at.is_some());
    assert_eq!(settlement.wallet.held_cents, 0);

    let result = service.release_hold(driver, creation.hold.id).await;
    assert!(matches!(
        result,
        Err(LedgerError::InvalidHoldState {
            status: HoldStatus::Released,
            ..
        })
    ));

    // Releasing a captured hold fails the same way
    let other = service
        .hold_funds(driver, WalletKind::Driver, 500, "ride", "r4", None)
        .await?;
    service
        .capture_hold(driver, other.hold.id, None, PaymentMethod::Cash)
        .await?;
    let result = service.release_hold(driver, other.hold.id).await;
    assert!(matches!(result, Err(LedgerError::InvalidHoldState { .. })));

    Ok(())
}

#[tokio::test]
async fn test_only_the_owner_may_settle() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 5000).await?;
    let stranger = user();

    let creation = service
        .hold_funds(driver, WalletKind::Driver, 1000, "ride", "r5", None)
        .await?;

    let result = service.release_hold(stranger, creation.hold.id).await;
    assert!(matches!(result, Err(LedgerError::Forbidden { .. })));

    let result = service
        .capture_hold(stranger, creation.hold.id, None, PaymentMethod::Cash)
        .await;
    assert!(matches!(result, Err(LedgerError::Forbidden { .. })));

    // The hold is still active for its owner
    let hold = service.get_hold(creation.hold.id).await?;
    assert_eq!(hold.status, HoldStatus::Active);

    Ok(())
}

#[tokio::test]
async fn test_capture_cannot_exceed_hold_amount() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 5000).await?;

    let creation = service
        .hold_funds(driver, WalletKind::Driver, 1000, "ride", "r6", None)
        .await?;

    let result = service
        .capture_hold(driver, creation.hold.id, Some(1001), PaymentMethod::Cash)
        .await;
    assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));

    // The failed validation left the hold active
    let hold = service.get_hold(creation.hold.id).await?;
    assert_eq!(hold.status, HoldStatus::Active);

    Ok(())
}

#[tokio::test]
async fn test_hold_does_not_require_available_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 1000).await?;

    // A tracking reservation, not a balance lock: holding more than the
    // balance is allowed for cash-tracked flows
    let creation = service
        .hold_funds(driver, WalletKind::Driver, 5000, "ride", "r7", None)
        .await?;
    assert_eq!(creation.wallet.held_cents, 5000);
    assert_eq!(creation.wallet.available_cents(), -4000);

    Ok(())
}

#[tokio::test]
async fn test_expiry_sweep_releases_exactly_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 5000).await?;

    // One hold already past its expiry, one still live
    let expired = service
        .hold_funds(
            driver,
            WalletKind::Driver,
            1200,
            "ride",
            "r8",
            Some(Duration::seconds(-60)),
        )
        .await?;
    let live = service
        .hold_funds(
            driver,
            WalletKind::Driver,
            800,
            "ride",
            "r9",
            Some(Duration::minutes(30)),
        )
        .await?;

    let report = service.release_expired_holds().await?;
    assert_eq!(report.released, 1);
    assert_eq!(report.failed, 0);

    let hold = service.get_hold(expired.hold.id).await?;
    assert_eq!(hold.status, HoldStatus::Expired);
    assert!(hold.released_at.is_some());

    let untouched = service.get_hold(live.hold.id).await?;
    assert_eq!(untouched.status, HoldStatus::Active);

    // Only the expired hold's amount was returned
    let wallet = service.get_wallet(driver, WalletKind::Driver).await?;
    assert_eq!(wallet.held_cents, 800);

    // Rerunning the sweep is a no-op
    let report = service.release_expired_holds().await?;
    assert_eq!(report.released, 0);
    assert_eq!(report.skipped, 0);

    let wallet = service.get_wallet(driver, WalletKind::Driver).await?;
    assert_eq!(wallet.held_cents, 800);

    let report = service.check_integrity().await?;
    assert!(report.is_clean(), "issues: {:?}", report.issues);

    Ok(())
}

#[tokio::test]
async fn test_background_sweeper_reclaims_expired_holds() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 5000).await?;

    let expired = service
        .hold_funds(
            driver,
            WalletKind::Driver,
            1500,
            "ride",
            "r10",
            Some(Duration::seconds(-5)),
        )
        .await?;

    let handle = fareledger::application::spawn_hold_sweeper(
        service.clone(),
        std::time::Duration::from_millis(20),
    );
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    handle.abort();

    let hold = service.get_hold(expired.hold.id).await?;
    assert_eq!(hold.status, HoldStatus::Expired);

    let wallet = service.get_wallet(driver, WalletKind::Driver).await?;
    assert_eq!(wallet.held_cents, 0);

    Ok(())
}

#[tokio::test]
async fn test_settling_a_missing_hold_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 1000).await?;

    let result = service.release_hold(driver, uuid::Uuid::new_v4()).await;
    assert!(matches!(result, Err(LedgerError::HoldNotFound(_))));

    Ok(())
}
