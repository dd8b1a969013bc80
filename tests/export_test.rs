mod common;

use anyhow::Result;
use common::{funded_driver, funded_rider, test_service};
use fareledger::domain::{PaymentMethod, WalletKind};
use fareledger::io::Exporter;

#[tokio::test]
async fn test_transactions_csv_export() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let rider = funded_rider(&service, 10000).await?;

    service
        .withdraw_funds(rider, WalletKind::Rider, 2500, serde_json::Value::Null)
        .await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter.export_transactions_csv(&mut buffer).await?;
    assert_eq!(count, 2);

    let csv = String::from_utf8(buffer)?;
    let mut lines = csv.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("id,sequence,wallet_id"));
    assert_eq!(lines.count(), 2);
    assert!(csv.contains("credit"));
    assert!(csv.contains("25.00"));

    Ok(())
}

#[tokio::test]
async fn test_balances_csv_export() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_rider(&service, 10000).await?;
    let driver = funded_driver(&service, 5000).await?;

    service
        .hold_funds(
            driver,
            WalletKind::Driver,
            1200,
            "ride",
            "r1",
            None,
        )
        .await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter.export_balances_csv(&mut buffer).await?;
    assert_eq!(count, 2);

    let csv = String::from_utf8(buffer)?;
    // Driver row shows balance, held and available
    assert!(csv.contains("driver,USD,50.00,12.00,38.00,true"));

    Ok(())
}

#[tokio::test]
async fn test_audit_csv_export_covers_drivers_only() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_rider(&service, 10000).await?;
    let driver = funded_driver(&service, 5000).await?;
    service.deduct_commission(driver, 700, "r3").await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter.export_audit_csv(&mut buffer).await?;
    assert_eq!(count, 2); // driver credit + commission, no rider rows

    let csv = String::from_utf8(buffer)?;
    assert!(csv.contains("commission"));

    Ok(())
}

#[tokio::test]
async fn test_full_json_snapshot() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let driver = funded_driver(&service, 5000).await?;

    let creation = service
        .hold_funds(driver, WalletKind::Driver, 1000, "ride", "r1", None)
        .await?;
    service
        .capture_hold(driver, creation.hold.id, Some(900), PaymentMethod::Cash)
        .await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let snapshot = exporter.export_full_json(&mut buffer).await?;

    assert_eq!(snapshot.wallets.len(), 1);
    assert_eq!(snapshot.transactions.len(), 3); // credit, hold, capture
    assert_eq!(snapshot.holds.len(), 1);

    // The written JSON parses back into the same shape
    let parsed: fareledger::io::LedgerSnapshot = serde_json::from_slice(&buffer)?;
    assert_eq!(parsed.wallets.len(), 1);
    assert_eq!(parsed.holds[0].id, creation.hold.id);

    Ok(())
}
