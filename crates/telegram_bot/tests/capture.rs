use std::{sync::Arc, time::Duration};

use chrono_tz::Asia::Jakarta;
use sea_orm::Database;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use engine::{Engine, EngineError, Money, TransactionKind};
use migration::MigratorTrait;
use telegram_bot::capture::{
    Button, CaptureKind, Claim, Conversation, Draft, Effect, Event, FinalizeDeps, Step, finalize,
    schedule_auto_finalize,
};
use telegram_bot::extractor::Candidate;
use telegram_bot::mirror::{DisabledMirror, MirrorSink, SheetsMirror};
use teloxide::types::ChatId;

const USER: i64 = 1001;

async fn engine() -> Arc<Engine> {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    Arc::new(Engine::builder().database(db).build().await.unwrap())
}

fn deps(engine: &Arc<Engine>, mirror: Arc<dyn MirrorSink>) -> FinalizeDeps {
    FinalizeDeps {
        engine: Arc::clone(engine),
        mirror,
        timezone: Jakarta,
    }
}

fn candidate(description: &str, amount: i64, merchant: Option<&str>, method: &str) -> Candidate {
    Candidate {
        description: Some(description.to_string()),
        amount: Some(Money::new(amount)),
        merchant: merchant.map(str::to_string),
        method: Some(method.to_string()),
        ..Candidate::default()
    }
}

async fn confirmed(engine: &Engine, kind: CaptureKind, candidates: Vec<Candidate>) -> Draft {
    let catalog = engine.payment_methods(USER).await.unwrap();
    let (mut draft, effects) = Draft::begin(kind, candidates, &catalog, false).unwrap();
    assert_eq!(effects, vec![Effect::ShowConfirm]);
    assert_eq!(
        draft.handle(Event::Button(Button::Yes), &catalog),
        vec![Effect::Finalize]
    );
    draft
}

#[tokio::test]
async fn expense_batch_is_journaled_then_deducted() {
    let engine = engine().await;
    engine
        .set_balance(USER, "Cash", Money::new(100_000))
        .await
        .unwrap();

    let draft = confirmed(
        &engine,
        CaptureKind::Expense,
        vec![
            candidate("nasi goreng", 15_000, Some("Warteg"), "cash"),
            candidate("es teh", 5_000, Some("Warteg"), "Cash"),
        ],
    )
    .await;

    let receipt = finalize(&deps(&engine, Arc::new(DisabledMirror)), USER, &draft)
        .await
        .unwrap();

    assert_eq!(receipt.entries.len(), 2);
    assert_eq!(receipt.entries[0].description, "Nasi Goreng");
    assert_eq!(receipt.entries[0].grouping_id, receipt.entries[1].grouping_id);
    assert!(receipt.entries.iter().all(|t| t.kind == TransactionKind::Expense));
    assert_eq!(receipt.balance_method, "Cash");
    assert_eq!(receipt.balance, Some(Money::new(80_000)));
    assert!(!receipt.ledger_failed);
    assert!(!receipt.mirror_failed);
    assert_eq!(
        engine.balance(USER, "Cash").await.unwrap(),
        Money::new(80_000)
    );
}

#[tokio::test]
async fn income_is_added_with_a_fixed_merchant() {
    let engine = engine().await;
    let draft = confirmed(
        &engine,
        CaptureKind::Income,
        vec![candidate("gaji", 5_000_000, None, "BCA")],
    )
    .await;

    let receipt = finalize(&deps(&engine, Arc::new(DisabledMirror)), USER, &draft)
        .await
        .unwrap();

    assert_eq!(receipt.entries[0].merchant, "Income");
    assert_eq!(receipt.entries[0].kind, TransactionKind::Income);
    assert_eq!(
        engine.balance(USER, "BCA").await.unwrap(),
        Money::new(5_000_000)
    );
}

#[tokio::test]
async fn overdraft_is_recorded_and_goes_negative() {
    let engine = engine().await;
    let draft = confirmed(
        &engine,
        CaptureKind::Expense,
        vec![candidate("bensin", 30_000, Some("Pertamina"), "GoPay")],
    )
    .await;

    let receipt = finalize(&deps(&engine, Arc::new(DisabledMirror)), USER, &draft)
        .await
        .unwrap();
    assert_eq!(receipt.balance, Some(Money::new(-30_000)));
}

#[tokio::test]
async fn mirror_failure_keeps_the_entries() {
    let engine = engine().await;
    engine.link_mirror(USER, "doc-1", "refresh-1").await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "a" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let mirror = SheetsMirror::with_endpoints(
        "client",
        "secret",
        &format!("{}/token", server.uri()),
        &server.uri(),
    );

    let draft = confirmed(
        &engine,
        CaptureKind::Expense,
        vec![candidate("roti", 10_000, Some("Holland"), "Cash")],
    )
    .await;
    assert_eq!(draft.step, Step::Confirm);

    let receipt = finalize(&deps(&engine, Arc::new(mirror)), USER, &draft)
        .await
        .unwrap();
    assert!(receipt.mirror_failed);
    assert!(!receipt.ledger_failed);
    assert_eq!(engine.unsynced_transactions(USER, 10).await.unwrap().len(), 1);
    assert_eq!(
        engine.balance(USER, "Cash").await.unwrap(),
        Money::new(-10_000)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timer_and_confirm_racing_write_the_batch_once() {
    for _ in 0..20 {
        let engine = engine().await;
        engine
            .set_balance(USER, "Cash", Money::new(100_000))
            .await
            .unwrap();
        let draft = confirmed(
            &engine,
            CaptureKind::Expense,
            vec![
                candidate("nasi goreng", 15_000, Some("Warteg"), "Cash"),
                candidate("es teh", 5_000, Some("Warteg"), "Cash"),
            ],
        )
        .await;
        let deps = deps(&engine, Arc::new(DisabledMirror));

        let conversation = Conversation::new(ChatId(USER), USER, draft);
        let generation = conversation.arm().await.unwrap();
        let timer_deps = deps.clone();
        let timer = schedule_auto_finalize(
            &conversation,
            generation,
            Duration::ZERO,
            move |conversation, draft| async move {
                finalize(&timer_deps, conversation.external_id, &draft)
                    .await
                    .unwrap();
                conversation.finish().await;
            },
        );
        let user = {
            let conversation = Arc::clone(&conversation);
            tokio::spawn(async move {
                if let Some(draft) = conversation.claim(Claim::User).await {
                    finalize(&deps, conversation.external_id, &draft)
                        .await
                        .unwrap();
                    conversation.finish().await;
                }
            })
        };
        timer.await.unwrap();
        user.await.unwrap();

        let journal = engine.recent_transactions(USER, 10).await.unwrap();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[0].grouping_id, journal[1].grouping_id);
        assert_eq!(
            engine.balance(USER, "Cash").await.unwrap(),
            Money::new(80_000)
        );
    }
}

#[tokio::test]
async fn oversized_batch_writes_nothing() {
    let engine = engine().await;
    let huge = i64::MAX / 2 + 1;
    let draft = confirmed(
        &engine,
        CaptureKind::Income,
        vec![
            candidate("bonus", huge, None, "BCA"),
            candidate("bonus", huge, None, "BCA"),
        ],
    )
    .await;

    let err = finalize(&deps(&engine, Arc::new(DisabledMirror)), USER, &draft)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));
    assert!(engine.recent_transactions(USER, 10).await.unwrap().is_empty());
    assert_eq!(engine.balance(USER, "BCA").await.unwrap(), Money::ZERO);
}
