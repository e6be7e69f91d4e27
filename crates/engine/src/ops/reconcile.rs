//! Inbound mirror reconciliation.
//!
//! The mirror reports the *current* state of a row. An existing entry is
//! updated by reverting its old ledger effect and applying the new one; an
//! unknown entry is inserted when the payload names its owner.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, TransactionTrait,
    prelude::*,
};

use crate::{
    EngineError, Money, ResultEngine, Transaction, TransactionKind,
    catalog::{CASH, resolve_method},
    transactions, users,
};

use super::{Engine, ledger::shift_balance, normalize_optional_text, with_tx};

const INSERT_DESCRIPTION: &str = "Manual Entry";
const INSERT_MERCHANT: &str = "-";

/// One row as reported by the mirror. Every field but the grouping id may be
/// missing; missing fields keep the stored value on update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MirrorUpdate {
    pub grouping_id: String,
    /// Owner, needed only to insert rows the journal does not know yet.
    pub external_id: Option<i64>,
    pub mirror_row_id: Option<String>,
    pub description: Option<String>,
    pub amount: Option<Money>,
    pub merchant: Option<String>,
    pub method: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    /// `None` when the mirror sent an unknown type.
    pub kind: Option<TransactionKind>,
    /// Optional etag; a delivery carrying the stored version is a replay.
    pub version: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Unknown grouping id and no owner in the payload.
    Unattributed,
    /// Same version already applied.
    Duplicate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Updated(Transaction),
    Inserted(Transaction),
    Skipped(SkipReason),
}

impl Engine {
    /// Apply one mirror webhook delivery.
    ///
    /// The secret is checked before anything is written; a mismatch yields
    /// `Unauthorized`. Deliveries for the same grouping id are serialized.
    pub async fn reconcile(
        &self,
        secret: Option<&str>,
        update: MirrorUpdate,
    ) -> ResultEngine<ReconcileOutcome> {
        let grouping_id = update.grouping_id.trim().to_string();
        self.authorize_delivery(secret, &grouping_id, &update).await?;

        if grouping_id.is_empty() {
            return Err(EngineError::InvalidInput(
                "missing grouping id".to_string(),
            ));
        }
        if update.amount.is_some_and(Money::is_negative) {
            return Err(EngineError::InvalidAmount(
                "mirror amount must be >= 0".to_string(),
            ));
        }

        let _sync_guard = self.sync_locks.lock(grouping_id.clone()).await;
        match find_target(&self.database, &grouping_id, &update).await? {
            Some(existing) => self.reconcile_update(existing, update).await,
            None => match update.external_id {
                Some(external_id) => self.reconcile_insert(external_id, &grouping_id, update).await,
                None => {
                    tracing::warn!(grouping_id = %grouping_id, "mirror row without owner ignored");
                    Ok(ReconcileOutcome::Skipped(SkipReason::Unattributed))
                }
            },
        }
    }

    async fn authorize_delivery(
        &self,
        secret: Option<&str>,
        grouping_id: &str,
        update: &MirrorUpdate,
    ) -> ResultEngine<()> {
        if self.check_secret(secret, None).is_ok() {
            return Ok(());
        }

        let mut owner = None;
        if !grouping_id.is_empty()
            && let Some(existing) = find_target(&self.database, grouping_id, update).await?
        {
            owner = users::Entity::find_by_id(existing.user_id)
                .one(&self.database)
                .await?;
        }
        if owner.is_none()
            && let Some(external_id) = update.external_id
        {
            owner = self.user_model(&self.database, external_id).await?;
        }

        let verdict = self.check_secret(secret, owner.as_ref());
        if verdict.is_err() {
            tracing::warn!(grouping_id = %grouping_id, "mirror webhook rejected: bad secret");
        }
        verdict
    }

    async fn reconcile_update(
        &self,
        existing: transactions::Model,
        update: MirrorUpdate,
    ) -> ResultEngine<ReconcileOutcome> {
        if update.version.is_some() && update.version == existing.mirror_version {
            tracing::info!(grouping_id = %existing.grouping_id, "mirror replay ignored");
            return Ok(ReconcileOutcome::Skipped(SkipReason::Duplicate));
        }

        let owner = users::Entity::find_by_id(existing.user_id)
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(format!("user {}", existing.user_id)))?;
        let external_id = owner.external_id;

        let old_kind = TransactionKind::try_from(existing.kind.as_str())?;
        let old_amount = Money::new(existing.amount);
        let old_method = existing.method.clone();

        let new_kind = update.kind.unwrap_or(old_kind);
        let new_amount = update.amount.unwrap_or(old_amount);
        let new_method = match normalize_optional_text(update.method.as_deref()) {
            Some(raw) => self.canonical_method(external_id, raw).await?,
            None => old_method.clone(),
        };

        let _guards = self
            .ledger_locks
            .lock_all(vec![
                (external_id, old_method.clone()),
                (external_id, new_method.clone()),
            ])
            .await;
        with_tx!(self, |db_tx| {
            if let Some(delta) = old_kind.ledger_delta(old_amount) {
                shift_balance(&db_tx, owner.id, &old_method, -delta).await?;
            }
            if let Some(delta) = new_kind.ledger_delta(new_amount) {
                shift_balance(&db_tx, owner.id, &new_method, delta).await?;
            }

            let mut active: transactions::ActiveModel = existing.clone().into();
            if let Some(description) = normalize_optional_text(update.description.as_deref()) {
                active.description = ActiveValue::Set(description);
            }
            if let Some(merchant) = normalize_optional_text(update.merchant.as_deref()) {
                active.merchant = ActiveValue::Set(merchant);
            }
            if let Some(row_id) = normalize_optional_text(update.mirror_row_id.as_deref()) {
                active.mirror_row_id = ActiveValue::Set(Some(row_id));
            }
            if let Some(occurred_at) = update.occurred_at {
                active.occurred_at = ActiveValue::Set(occurred_at);
            }
            if update.version.is_some() {
                active.mirror_version = ActiveValue::Set(update.version.clone());
            }
            active.amount = ActiveValue::Set(new_amount.units());
            active.method = ActiveValue::Set(new_method.clone());
            active.kind = ActiveValue::Set(new_kind.as_str().to_string());
            active.synced = ActiveValue::Set(true);
            active.last_sync_at = ActiveValue::Set(Some(Utc::now()));
            let model = active.update(&db_tx).await?;

            tracing::info!(
                external_id,
                grouping_id = %model.grouping_id,
                old_kind = old_kind.as_str(),
                new_kind = new_kind.as_str(),
                "mirror update applied"
            );
            Ok(ReconcileOutcome::Updated(Transaction::try_from(model)?))
        })
    }

    async fn reconcile_insert(
        &self,
        external_id: i64,
        grouping_id: &str,
        update: MirrorUpdate,
    ) -> ResultEngine<ReconcileOutcome> {
        let kind = update.kind.unwrap_or(TransactionKind::Expense);
        let amount = update.amount.unwrap_or_default();
        let method = match normalize_optional_text(update.method.as_deref()) {
            Some(raw) => self.canonical_method(external_id, raw).await?,
            None => CASH.to_string(),
        };
        let now = Utc::now();

        let _guard = self.ledger_locks.lock((external_id, method.clone())).await;
        with_tx!(self, |db_tx| {
            let user = self.ensure_user(&db_tx, external_id).await?;
            let model = transactions::ActiveModel {
                id: ActiveValue::NotSet,
                user_id: ActiveValue::Set(user.id),
                grouping_id: ActiveValue::Set(grouping_id.to_string()),
                description: ActiveValue::Set(
                    normalize_optional_text(update.description.as_deref())
                        .unwrap_or_else(|| INSERT_DESCRIPTION.to_string()),
                ),
                amount: ActiveValue::Set(amount.units()),
                merchant: ActiveValue::Set(
                    normalize_optional_text(update.merchant.as_deref())
                        .unwrap_or_else(|| INSERT_MERCHANT.to_string()),
                ),
                method: ActiveValue::Set(method.clone()),
                occurred_at: ActiveValue::Set(update.occurred_at.unwrap_or(now)),
                kind: ActiveValue::Set(kind.as_str().to_string()),
                synced: ActiveValue::Set(true),
                mirror_row_id: ActiveValue::Set(normalize_optional_text(
                    update.mirror_row_id.as_deref(),
                )),
                mirror_version: ActiveValue::Set(update.version.clone()),
                last_sync_at: ActiveValue::Set(Some(now)),
                created_at: ActiveValue::Set(now),
            }
            .insert(&db_tx)
            .await?;

            if let Some(delta) = kind.ledger_delta(amount) {
                shift_balance(&db_tx, user.id, &method, delta).await?;
            }
            tracing::info!(external_id, grouping_id = %grouping_id, kind = kind.as_str(), "mirror insert applied");
            Ok(ReconcileOutcome::Inserted(Transaction::try_from(model)?))
        })
    }

    /// Catalog spelling of a method typed into the mirror. Names the catalog
    /// does not know are kept as typed.
    async fn canonical_method(&self, external_id: i64, raw: String) -> ResultEngine<String> {
        let catalog = self.payment_methods(external_id).await?;
        Ok(match resolve_method(&catalog, &raw) {
            Some(method) => method.name.clone(),
            None => raw,
        })
    }
}

/// Row a payload refers to: by mirror row id first, then by grouping id. A
/// grouping id shared by several batch rows is disambiguated by description,
/// falling back to the earliest row.
async fn find_target<C: ConnectionTrait>(
    db: &C,
    grouping_id: &str,
    update: &MirrorUpdate,
) -> ResultEngine<Option<transactions::Model>> {
    if let Some(row_id) = normalize_optional_text(update.mirror_row_id.as_deref())
        && let Some(model) = transactions::Entity::find()
            .filter(transactions::Column::MirrorRowId.eq(row_id))
            .one(db)
            .await?
    {
        return Ok(Some(model));
    }

    let mut rows = transactions::Entity::find()
        .filter(transactions::Column::GroupingId.eq(grouping_id))
        .order_by_asc(transactions::Column::Id)
        .all(db)
        .await?;
    if rows.len() > 1
        && let Some(description) = normalize_optional_text(update.description.as_deref())
        && let Some(idx) = rows.iter().position(|row| row.description == description)
    {
        return Ok(Some(rows.swap_remove(idx)));
    }
    Ok(if rows.is_empty() {
        None
    } else {
        Some(rows.swap_remove(0))
    })
}
