use chrono::Utc;
use sea_orm::Database;

use engine::{DebtStatus, Engine, EngineError, Money, NewDebt, TransactionKind};
use migration::MigratorTrait;

const USER: i64 = 7;
const OTHER: i64 = 8;

async fn engine() -> Engine {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    Engine::builder().database(db).build().await.unwrap()
}

fn lunch_debt(amount: i64) -> NewDebt {
    NewDebt {
        creditor: "Budi".to_string(),
        description: "Lunch".to_string(),
        amount: Money::new(amount),
        merchant: "Warteg".to_string(),
        occurred_at: Utc::now(),
    }
}

#[tokio::test]
async fn creating_a_debt_writes_entry_without_ledger_effect() {
    let engine = engine().await;
    engine.set_balance(USER, "Cash", Money::new(10_000)).await.unwrap();

    let (debt, entry) = engine.create_debt(USER, lunch_debt(30_000)).await.unwrap();

    assert_eq!(debt.status, DebtStatus::Unpaid);
    assert_eq!(debt.grouping_id, entry.grouping_id);
    assert_eq!(entry.kind, TransactionKind::Debt);
    assert_eq!(entry.method, "Debt - Budi");
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(10_000));

    let unpaid = engine
        .debts(USER, Some(DebtStatus::Unpaid))
        .await
        .unwrap();
    assert_eq!(unpaid.len(), 1);
}

#[tokio::test]
async fn paying_requires_enough_funds() {
    let engine = engine().await;
    engine.set_balance(USER, "Cash", Money::new(10_000)).await.unwrap();
    let (debt, _) = engine.create_debt(USER, lunch_debt(30_000)).await.unwrap();

    let err = engine.pay_debt(USER, debt.id, "Cash").await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds(_)));

    // Nothing changed.
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(10_000));
    let debt = engine.debt(USER, debt.id).await.unwrap();
    assert_eq!(debt.status, DebtStatus::Unpaid);
    assert_eq!(engine.recent_transactions(USER, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn paying_settles_debt_and_deducts_balance() {
    let engine = engine().await;
    engine.set_balance(USER, "BCA", Money::new(50_000)).await.unwrap();
    let (debt, _) = engine.create_debt(USER, lunch_debt(30_000)).await.unwrap();

    let payment = engine.pay_debt(USER, debt.id, "BCA").await.unwrap();

    assert_eq!(payment.debt.status, DebtStatus::Paid);
    assert_eq!(payment.debt.paid_with.as_deref(), Some("BCA"));
    assert_eq!(payment.balance.current, Money::new(20_000));
    assert_eq!(payment.transaction.kind, TransactionKind::Expense);
    assert_eq!(payment.transaction.description, "Debt payment - Budi: Lunch");
    assert_eq!(payment.transaction.merchant, "Warteg");

    let stored = engine.debt(USER, debt.id).await.unwrap();
    assert_eq!(stored.status, DebtStatus::Paid);
    assert!(stored.paid_at.is_some());
}

#[tokio::test]
async fn paying_twice_is_rejected() {
    let engine = engine().await;
    engine.set_balance(USER, "Cash", Money::new(100_000)).await.unwrap();
    let (debt, _) = engine.create_debt(USER, lunch_debt(30_000)).await.unwrap();

    engine.pay_debt(USER, debt.id, "Cash").await.unwrap();
    let err = engine.pay_debt(USER, debt.id, "Cash").await.unwrap_err();

    assert!(matches!(err, EngineError::AlreadyPaid(_)));
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(70_000));
}

#[tokio::test]
async fn debts_of_other_users_are_not_found() {
    let engine = engine().await;
    let (debt, _) = engine.create_debt(USER, lunch_debt(30_000)).await.unwrap();
    engine.set_balance(OTHER, "Cash", Money::new(100_000)).await.unwrap();

    let err = engine.pay_debt(OTHER, debt.id, "Cash").await.unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound(_)));
    assert_eq!(engine.balance(OTHER, "Cash").await.unwrap(), Money::new(100_000));
}

#[tokio::test]
async fn debt_amount_must_be_positive() {
    let engine = engine().await;
    let err = engine.create_debt(USER, lunch_debt(0)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));
}
