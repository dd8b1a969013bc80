mod common;

use anyhow::Result;
use common::{funded_driver, test_service, user};
use fareledger::domain::{AccountStanding, AuditAction, LedgerError, PaymentMethod, WalletKind};

#[tokio::test]
async fn test_negative_balance_restriction_round_trip() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = user();

    // Threshold 0: debiting a fresh wallet to -5.00 restricts at the next
    // recheck
    service.deduct_penalty(driver, 500, "cancellation").await?;

    let outcome = service
        .check_and_enforce_account_restriction(driver)
        .await?;
    assert_eq!(outcome.standing, AccountStanding::Restricted);
    assert!(outcome.reason.is_some());

    let account = service.get_driver_account(driver).await?;
    assert!(account.is_restricted);
    assert!(account.restricted_at.is_some());

    // Crediting back to 0.00 and rechecking lifts it
    service
        .add_funds(driver, WalletKind::Driver, 500, serde_json::Value::Null)
        .await?;
    let outcome = service
        .check_and_enforce_account_restriction(driver)
        .await?;
    assert_eq!(outcome.standing, AccountStanding::Active);

    let account = service.get_driver_account(driver).await?;
    assert!(!account.is_restricted);

    Ok(())
}

#[tokio::test]
async fn test_recheck_is_idempotent() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = user();

    service.deduct_commission(driver, 300, "r1").await?;

    let first = service
        .check_and_enforce_account_restriction(driver)
        .await?;
    assert_eq!(first.standing, AccountStanding::Restricted);

    // Rerunning against the same balance changes nothing
    let second = service
        .check_and_enforce_account_restriction(driver)
        .await?;
    assert_eq!(second.standing, AccountStanding::Restricted);
    assert!(!second.changed);

    Ok(())
}

#[tokio::test]
async fn test_recheck_without_wallet_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = service.check_and_enforce_account_restriction(user()).await;
    assert!(matches!(result, Err(LedgerError::WalletNotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_manual_restrict_and_unrestrict() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 10000).await?;

    service
        .restrict_driver_account(driver, "fraud review")
        .await?;
    let account = service.get_driver_account(driver).await?;
    assert!(account.is_restricted);
    assert_eq!(account.restriction_reason.as_deref(), Some("fraud review"));

    service.unrestrict_driver_account(driver).await?;
    let account = service.get_driver_account(driver).await?;
    assert!(!account.is_restricted);
    assert!(account.restriction_reason.is_none());

    Ok(())
}

#[tokio::test]
async fn test_every_driver_mutation_writes_an_audit_row() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 10000).await?;

    service.deduct_commission(driver, 1500, "r1").await?;
    service.deduct_subscription(driver, 2000, "monthly").await?;

    let audits = service.list_balance_audits(driver).await?;
    assert_eq!(audits.len(), 3); // initial credit + two deductions

    let commission = &audits[1];
    assert_eq!(commission.action, AuditAction::Commission);
    assert_eq!(commission.previous_balance_cents, 10000);
    assert_eq!(commission.new_balance_cents, 8500);
    assert_eq!(commission.change_cents, -1500);
    assert!(!commission.triggered_restriction);

    Ok(())
}

#[tokio::test]
async fn test_audit_flags_the_restricting_debit() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 1000).await?;

    // This debit crosses the threshold
    service.deduct_penalty(driver, 1500, "no-show").await?;

    let audits = service.list_balance_audits(driver).await?;
    let penalty = audits.last().unwrap();
    assert_eq!(penalty.action, AuditAction::Penalty);
    assert_eq!(penalty.new_balance_cents, -500);
    assert!(penalty.triggered_restriction);

    Ok(())
}

#[tokio::test]
async fn test_validate_driver_wallet_balance_never_mutates() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 5000).await?;

    let available = service.validate_driver_wallet_balance(driver, 3000).await?;
    assert_eq!(available, 5000);

    let result = service.validate_driver_wallet_balance(driver, 6000).await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientBalance {
            available: 5000,
            required: 6000,
            ..
        })
    ));

    let wallet = service.get_wallet(driver, WalletKind::Driver).await?;
    assert_eq!(wallet.balance_cents, 5000);

    Ok(())
}

#[tokio::test]
async fn test_cash_collection_and_settlement() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = user();

    // Driver collected 20.00 in cash for a ride
    let collection = service
        .record_cash_collection(driver, 2000, "ride", "r1")
        .await?;
    assert_eq!(
        collection.transaction.payment_method,
        Some(PaymentMethod::Cash)
    );
    assert_eq!(collection.wallet.balance_cents, 2000);

    // Settles 15.00 of it back to the platform
    let payment = service
        .record_cash_payment(driver, 1500, "settlement", "s1")
        .await?;
    assert_eq!(payment.wallet.balance_cents, 500);

    // Settlement must be covered by the available balance
    let result = service
        .record_cash_payment(driver, 1000, "settlement", "s2")
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientBalance { .. })
    ));

    let audits = service.list_balance_audits(driver).await?;
    assert_eq!(audits.len(), 2);
    assert_eq!(audits[0].action, AuditAction::CashCollection);
    assert_eq!(audits[1].action, AuditAction::CashPayment);

    Ok(())
}
