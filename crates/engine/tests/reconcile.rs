use chrono::{TimeZone, Utc};
use sea_orm::Database;

use engine::{
    Engine, EngineError, Money, MirrorUpdate, NewTransaction, ReconcileOutcome, SkipReason,
    TransactionKind,
};
use migration::MigratorTrait;

const USER: i64 = 555;
const SECRET: &str = "hook-secret";

async fn engine() -> Engine {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    Engine::builder()
        .database(db)
        .webhook_secret(Some(SECRET))
        .build()
        .await
        .unwrap()
}

async fn seed_expense(engine: &Engine, amount: i64, method: &str) -> String {
    let written = engine
        .record_transactions(
            USER,
            &[NewTransaction {
                description: "Bakso".to_string(),
                amount: Money::new(amount),
                merchant: "Pak Kumis".to_string(),
                method: method.to_string(),
                occurred_at: Utc::now(),
                kind: TransactionKind::Expense,
            }],
        )
        .await
        .unwrap();
    engine.apply_to_ledger(USER, &written).await.unwrap();
    written[0].grouping_id.clone()
}

#[tokio::test]
async fn wrong_or_missing_secret_is_unauthorized() {
    let engine = engine().await;
    let update = MirrorUpdate {
        grouping_id: "abc".to_string(),
        external_id: Some(USER),
        amount: Some(Money::new(1_000)),
        ..MirrorUpdate::default()
    };

    let err = engine.reconcile(None, update.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));
    let err = engine.reconcile(Some("nope"), update).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    assert!(engine.user(USER).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_row_with_owner_is_inserted() {
    let engine = engine().await;
    let update = MirrorUpdate {
        grouping_id: "sheet-1".to_string(),
        external_id: Some(USER),
        mirror_row_id: Some("row-9".to_string()),
        description: Some("Salary".to_string()),
        amount: Some(Money::new(100_000)),
        method: Some("BCA".to_string()),
        kind: Some(TransactionKind::Income),
        ..MirrorUpdate::default()
    };

    let outcome = engine.reconcile(Some(SECRET), update).await.unwrap();
    let ReconcileOutcome::Inserted(entry) = outcome else {
        panic!("expected insert, got {outcome:?}");
    };
    assert!(entry.synced);
    assert_eq!(entry.merchant, "-");
    assert_eq!(entry.mirror_row_id.as_deref(), Some("row-9"));
    assert!(engine.user(USER).await.unwrap().is_some());
    assert_eq!(engine.balance(USER, "BCA").await.unwrap(), Money::new(100_000));
}

#[tokio::test]
async fn insert_uses_defaults_for_missing_fields() {
    let engine = engine().await;
    let update = MirrorUpdate {
        grouping_id: "sheet-2".to_string(),
        external_id: Some(USER),
        amount: Some(Money::new(4_000)),
        ..MirrorUpdate::default()
    };

    let ReconcileOutcome::Inserted(entry) = engine.reconcile(Some(SECRET), update).await.unwrap()
    else {
        panic!("expected insert");
    };
    assert_eq!(entry.description, "Manual Entry");
    assert_eq!(entry.method, "Cash");
    assert_eq!(entry.kind, TransactionKind::Expense);
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(-4_000));
}

#[tokio::test]
async fn unknown_row_without_owner_is_skipped() {
    let engine = engine().await;
    let update = MirrorUpdate {
        grouping_id: "ghost".to_string(),
        amount: Some(Money::new(1_000)),
        ..MirrorUpdate::default()
    };
    let outcome = engine.reconcile(Some(SECRET), update).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Skipped(SkipReason::Unattributed));
}

#[tokio::test]
async fn update_reverts_old_effect_and_applies_new_one() {
    let engine = engine().await;
    engine.set_balance(USER, "Cash", Money::new(100_000)).await.unwrap();
    let grouping_id = seed_expense(&engine, 20_000, "Cash").await;
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(80_000));

    let occurred_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let update = MirrorUpdate {
        grouping_id: grouping_id.clone(),
        description: Some("Bakso urat".to_string()),
        amount: Some(Money::new(25_000)),
        method: Some("GoPay".to_string()),
        occurred_at: Some(occurred_at),
        kind: Some(TransactionKind::Expense),
        ..MirrorUpdate::default()
    };
    let outcome = engine.reconcile(Some(SECRET), update).await.unwrap();
    let ReconcileOutcome::Updated(entry) = outcome else {
        panic!("expected update, got {outcome:?}");
    };

    assert_eq!(entry.description, "Bakso urat");
    assert_eq!(entry.amount, Money::new(25_000));
    assert_eq!(entry.method, "GoPay");
    assert_eq!(entry.occurred_at, occurred_at);
    assert_eq!(entry.merchant, "Pak Kumis");
    assert!(entry.synced);
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(100_000));
    assert_eq!(engine.balance(USER, "GoPay").await.unwrap(), Money::new(-25_000));
}

#[tokio::test]
async fn type_change_flips_ledger_direction() {
    let engine = engine().await;
    let grouping_id = seed_expense(&engine, 10_000, "BCA").await;
    assert_eq!(engine.balance(USER, "BCA").await.unwrap(), Money::new(-10_000));

    let update = MirrorUpdate {
        grouping_id,
        kind: Some(TransactionKind::Income),
        ..MirrorUpdate::default()
    };
    engine.reconcile(Some(SECRET), update).await.unwrap();

    assert_eq!(engine.balance(USER, "BCA").await.unwrap(), Money::new(10_000));
}

#[tokio::test]
async fn missing_amount_and_unknown_type_keep_stored_values() {
    let engine = engine().await;
    let grouping_id = seed_expense(&engine, 10_000, "Cash").await;

    let update = MirrorUpdate {
        grouping_id,
        merchant: Some("Pak Kumis 2".to_string()),
        ..MirrorUpdate::default()
    };
    let ReconcileOutcome::Updated(entry) = engine.reconcile(Some(SECRET), update).await.unwrap()
    else {
        panic!("expected update");
    };

    assert_eq!(entry.amount, Money::new(10_000));
    assert_eq!(entry.kind, TransactionKind::Expense);
    assert_eq!(entry.merchant, "Pak Kumis 2");
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(-10_000));
}

#[tokio::test]
async fn replayed_version_is_ignored() {
    let engine = engine().await;
    let grouping_id = seed_expense(&engine, 10_000, "Cash").await;

    let update = MirrorUpdate {
        grouping_id,
        amount: Some(Money::new(12_000)),
        version: Some("v2".to_string()),
        ..MirrorUpdate::default()
    };
    engine.reconcile(Some(SECRET), update.clone()).await.unwrap();
    let outcome = engine.reconcile(Some(SECRET), update).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Skipped(SkipReason::Duplicate));
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(-12_000));
}

#[tokio::test]
async fn repeated_delivery_without_version_converges() {
    let engine = engine().await;
    let grouping_id = seed_expense(&engine, 10_000, "Cash").await;

    let update = MirrorUpdate {
        grouping_id,
        amount: Some(Money::new(12_000)),
        ..MirrorUpdate::default()
    };
    engine.reconcile(Some(SECRET), update.clone()).await.unwrap();
    engine.reconcile(Some(SECRET), update).await.unwrap();

    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(-12_000));
}

#[tokio::test]
async fn per_user_secret_is_accepted_for_own_rows() {
    let engine = engine().await;
    let grouping_id = seed_expense(&engine, 10_000, "Cash").await;
    let user = engine.link_mirror(USER, "doc-1", "refresh-token").await.unwrap();
    let user_secret = user.mirror_webhook_secret.unwrap();

    let update = MirrorUpdate {
        grouping_id,
        amount: Some(Money::new(8_000)),
        ..MirrorUpdate::default()
    };
    let outcome = engine
        .reconcile(Some(user_secret.as_str()), update)
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Updated(_)));
    assert_eq!(engine.balance(USER, "Cash").await.unwrap(), Money::new(-8_000));
}

#[tokio::test]
async fn negative_amount_is_rejected() {
    let engine = engine().await;
    let grouping_id = seed_expense(&engine, 10_000, "Cash").await;
    let update = MirrorUpdate {
        grouping_id,
        amount: Some(Money::new(-1)),
        ..MirrorUpdate::default()
    };
    let err = engine.reconcile(Some(SECRET), update).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));
}

#[tokio::test]
async fn method_typed_in_another_case_stays_on_the_catalog_entry() {
    let engine = engine().await;
    let grouping_id = seed_expense(&engine, 50_000, "BCA").await;

    let update = MirrorUpdate {
        grouping_id,
        amount: Some(Money::new(50_000)),
        method: Some("bca".to_string()),
        ..MirrorUpdate::default()
    };
    let ReconcileOutcome::Updated(entry) = engine.reconcile(Some(SECRET), update).await.unwrap()
    else {
        panic!("expected update");
    };

    assert_eq!(entry.method, "BCA");
    assert_eq!(engine.balance(USER, "BCA").await.unwrap(), Money::new(-50_000));
    assert_eq!(engine.balance(USER, "bca").await.unwrap(), Money::ZERO);
    let sheet = engine.balances(USER).await.unwrap();
    assert!(sheet.balances.iter().all(|row| row.method != "bca"));
}

#[tokio::test]
async fn inserted_rows_use_catalog_spelling_and_keep_unknown_names() {
    let engine = engine().await;
    let known = MirrorUpdate {
        grouping_id: "sheet-1".to_string(),
        external_id: Some(USER),
        amount: Some(Money::new(7_000)),
        method: Some(" gopay ".to_string()),
        ..MirrorUpdate::default()
    };
    let unknown = MirrorUpdate {
        grouping_id: "sheet-2".to_string(),
        external_id: Some(USER),
        amount: Some(Money::new(3_000)),
        method: Some("Jenius".to_string()),
        ..MirrorUpdate::default()
    };
    engine.reconcile(Some(SECRET), known).await.unwrap();
    engine.reconcile(Some(SECRET), unknown).await.unwrap();

    assert_eq!(engine.balance(USER, "GoPay").await.unwrap(), Money::new(-7_000));
    assert_eq!(engine.balance(USER, "Jenius").await.unwrap(), Money::new(-3_000));
}
