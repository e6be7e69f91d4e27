use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, prelude::*};

use crate::{EngineError, ResultEngine, locks::KeyedLocks, users};

mod accounts;
mod catalog;
mod debts;
mod journal;
mod ledger;
mod reconcile;
mod report;

pub use journal::PendingMirror;
pub use ledger::{TransferReceipt, TransferRequest};
pub use reconcile::{MirrorUpdate, ReconcileOutcome, SkipReason};
pub use report::{ExpenseReport, ReportLine};

pub use debts::DebtPayment;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// Ledger lock key: `(external user id, method name)`.
type LedgerKey = (i64, String);

#[derive(Debug)]
pub struct Engine {
    database: DatabaseConnection,
    ledger_locks: KeyedLocks<LedgerKey>,
    sync_locks: KeyedLocks<String>,
    push_locks: KeyedLocks<i64>,
    webhook_secret: Option<String>,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Look up a user row by external id without creating it.
    async fn user_model<C: ConnectionTrait>(
        &self,
        db: &C,
        external_id: i64,
    ) -> ResultEngine<Option<users::Model>> {
        Ok(users::Entity::find()
            .filter(users::Column::ExternalId.eq(external_id))
            .one(db)
            .await?)
    }

    async fn require_user<C: ConnectionTrait>(
        &self,
        db: &C,
        external_id: i64,
    ) -> ResultEngine<users::Model> {
        self.user_model(db, external_id)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(format!("user {external_id}")))
    }
}

fn normalize_required_text(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidInput(format!(
            "{label} must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn require_positive(amount: crate::Money, label: &str) -> ResultEngine<()> {
    if !amount.is_positive() {
        return Err(EngineError::InvalidAmount(format!("{label} must be > 0")));
    }
    Ok(())
}

fn require_non_negative(amount: crate::Money, label: &str) -> ResultEngine<()> {
    if amount.is_negative() {
        return Err(EngineError::InvalidAmount(format!("{label} must be >= 0")));
    }
    Ok(())
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    webhook_secret: Option<String>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Shared secret accepted on every mirror webhook delivery.
    pub fn webhook_secret(mut self, secret: Option<&str>) -> EngineBuilder {
        self.webhook_secret = normalize_optional_text(secret);
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        Ok(Engine {
            database: self.database,
            ledger_locks: KeyedLocks::default(),
            sync_locks: KeyedLocks::default(),
            push_locks: KeyedLocks::default(),
            webhook_secret: self.webhook_secret,
        })
    }
}
