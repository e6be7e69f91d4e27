use std::sync::Arc;

use chrono::Utc;
use sea_orm::{Database, DatabaseConnection};

use engine::{Engine, EngineError, Money, NewTransaction, TransactionKind, TransferRequest};
use migration::MigratorTrait;
use uuid::Uuid;

const USER: i64 = 4242;

async fn engine_with_db() -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    (engine, db)
}

async fn engine_with_file_db() -> (Engine, std::path::PathBuf) {
    let root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();

    let path = root.join(format!("ledger_{}.db", Uuid::new_v4()));
    let url = format!("sqlite:{}?mode=rwc", path.display());

    let db = Database::connect(&url).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder().database(db).build().await.unwrap();
    (engine, path)
}

fn expense(description: &str, amount: i64, method: &str) -> NewTransaction {
    NewTransaction {
        description: description.to_string(),
        amount: Money::new(amount),
        merchant: "Warung".to_string(),
        method: method.to_string(),
        occurred_at: Utc::now(),
        kind: TransactionKind::Expense,
    }
}

#[tokio::test]
async fn unknown_balance_reads_as_zero() {
    let (engine, _db) = engine_with_db().await;
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::ZERO);
    assert!(engine.user(USER).await.unwrap().is_none());
}

#[tokio::test]
async fn add_and_deduct_accumulate() {
    let (engine, _db) = engine_with_db().await;

    engine.add_balance(USER, "BCA", Money::new(100_000)).await.unwrap();
    engine.add_balance(USER, "BCA", Money::new(25_000)).await.unwrap();
    let change = engine
        .deduct_balance(USER, "BCA", Money::new(40_000))
        .await
        .unwrap();

    assert_eq!(change.previous, Money::new(125_000));
    assert_eq!(change.current, Money::new(85_000));
    assert_eq!(engine.balance(USER, "BCA").await.unwrap(), Money::new(85_000));
}

#[tokio::test]
async fn deduct_can_go_negative() {
    let (engine, _db) = engine_with_db().await;
    engine.deduct_balance(USER, "OVO", Money::new(5_000)).await.unwrap();
    assert_eq!(engine.balance(USER, "OVO").await.unwrap(), Money::new(-5_000));
}

#[tokio::test]
async fn negative_amounts_are_rejected() {
    let (engine, _db) = engine_with_db().await;
    let err = engine
        .add_balance(USER, "Cash", Money::new(-1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));
}

#[tokio::test]
async fn set_balance_overwrites() {
    let (engine, _db) = engine_with_db().await;
    engine.add_balance(USER, "Cash", Money::new(10_000)).await.unwrap();
    let change = engine
        .set_balance(USER, "Cash", Money::new(3_000))
        .await
        .unwrap();
    assert_eq!(change.previous, Money::new(10_000));
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(3_000));
}

#[tokio::test]
async fn apply_to_ledger_sums_per_method() {
    let (engine, _db) = engine_with_db().await;
    engine.set_balance(USER, "Cash", Money::new(50_000)).await.unwrap();

    let written = engine
        .record_transactions(
            USER,
            &[
                expense("Nasi goreng", 15_000, "Cash"),
                expense("Es teh", 5_000, "Cash"),
                expense("Pulsa", 20_000, "GoPay"),
            ],
        )
        .await
        .unwrap();
    let changes = engine.apply_to_ledger(USER, &written).await.unwrap();

    assert_eq!(changes.len(), 2);
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(30_000));
    assert_eq!(engine.balance(USER, "GoPay").await.unwrap(), Money::new(-20_000));
}

#[tokio::test]
async fn transfer_moves_amount_and_charges_fee() {
    let (engine, _db) = engine_with_db().await;
    engine.set_balance(USER, "Cash", Money::new(100_000)).await.unwrap();

    let receipt = engine
        .transfer(
            USER,
            TransferRequest {
                source: "Cash".to_string(),
                destination: "GoPay".to_string(),
                amount: Money::new(50_000),
                fee: Money::new(2_000),
                occurred_at: Utc::now(),
            },
        )
        .await
        .unwrap();

    assert_eq!(receipt.source.current, Money::new(48_000));
    assert_eq!(receipt.destination.current, Money::new(50_000));
    assert_eq!(receipt.transaction.kind, TransactionKind::Transfer);
    assert_eq!(receipt.transaction.amount, Money::new(52_000));
    assert_eq!(receipt.transaction.method, "Cash");
    assert_eq!(receipt.transaction.description, "Transfer to GoPay");

    let recent = engine.recent_transactions(USER, 10).await.unwrap();
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn transfer_to_same_method_is_rejected() {
    let (engine, _db) = engine_with_db().await;
    let err = engine
        .transfer(
            USER,
            TransferRequest {
                source: "Cash".to_string(),
                destination: " cash ".to_string(),
                amount: Money::new(1_000),
                fee: Money::ZERO,
                occurred_at: Utc::now(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::ZERO);
}

#[tokio::test]
async fn balances_follow_catalog_order_and_total() {
    let (engine, _db) = engine_with_db().await;
    engine.set_balance(USER, "BCA", Money::new(200_000)).await.unwrap();
    engine.set_balance(USER, "Cash", Money::new(15_000)).await.unwrap();
    engine.set_balance(USER, "Old Wallet", Money::new(1_000)).await.unwrap();

    let sheet = engine.balances(USER).await.unwrap();
    assert_eq!(sheet.balances[0].method, "Cash");
    assert_eq!(sheet.balances[0].amount, Money::new(15_000));
    assert_eq!(
        sheet.balances.last().map(|b| b.method.as_str()),
        Some("Old Wallet")
    );
    assert_eq!(sheet.total, Money::new(216_000));
}

#[tokio::test]
async fn reset_balances_zeroes_everything() {
    let (engine, _db) = engine_with_db().await;
    engine.set_balance(USER, "BCA", Money::new(200_000)).await.unwrap();
    engine.set_balance(USER, "Cash", Money::new(15_000)).await.unwrap();

    assert_eq!(engine.reset_balances(USER).await.unwrap(), 2);
    assert_eq!(engine.balance(USER, "BCA").await.unwrap(), Money::ZERO);
    assert_eq!(engine.balances(USER).await.unwrap().total, Money::ZERO);
}

#[tokio::test]
async fn concurrent_adds_are_not_lost() {
    let (engine, path) = engine_with_file_db().await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .add_balance(USER, "Cash", Money::new(1_000))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(20_000));
    drop(engine);
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn batch_total_overflow_is_rejected_without_touching_balances() {
    let (engine, _db) = engine_with_db().await;
    let huge = i64::MAX / 2 + 1;
    let mut first = expense("Bonus", huge, "BCA");
    first.kind = TransactionKind::Income;
    let mut second = expense("Bonus", huge, "BCA");
    second.kind = TransactionKind::Income;
    let written = engine
        .record_transactions(USER, &[first, second])
        .await
        .unwrap();

    let err = engine.apply_to_ledger(USER, &written).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));
    assert_eq!(engine.balance(USER, "BCA").await.unwrap(), Money::ZERO);
}
