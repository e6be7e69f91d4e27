use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    prelude::*, sea_query::Expr,
};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::{
    EngineError, MirrorLink, NewTransaction, ResultEngine, Transaction, TransactionKind, User,
    transactions,
};

use super::{Engine, normalize_required_text, require_positive, with_tx};

/// Journal entries of one user still waiting for a successful mirror push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMirror {
    pub user: User,
    pub link: MirrorLink,
    pub entries: Vec<Transaction>,
}

impl Engine {
    /// Write a batch of entries sharing one fresh grouping id.
    ///
    /// The user row is created on first use. No ledger effect is applied
    /// here: see [`Engine::apply_to_ledger`].
    pub async fn record_transactions(
        &self,
        external_id: i64,
        entries: &[NewTransaction],
    ) -> ResultEngine<Vec<Transaction>> {
        if entries.is_empty() {
            return Err(EngineError::InvalidInput(
                "a batch needs at least one entry".to_string(),
            ));
        }
        let mut cleaned = Vec::with_capacity(entries.len());
        for entry in entries {
            require_positive(entry.amount, "amount")?;
            cleaned.push(NewTransaction {
                description: normalize_required_text(&entry.description, "description")?,
                merchant: normalize_required_text(&entry.merchant, "merchant")?,
                method: normalize_required_text(&entry.method, "payment method")?,
                ..entry.clone()
            });
        }

        let grouping_id = Uuid::new_v4().to_string();
        with_tx!(self, |db_tx| {
            let user = self.ensure_user(&db_tx, external_id).await?;
            let written = insert_entries(&db_tx, user.id, &grouping_id, &cleaned).await?;
            tracing::info!(
                external_id,
                grouping_id = %grouping_id,
                entries = written.len(),
                "journal batch recorded"
            );
            Ok(written)
        })
    }

    /// Record one expense entry as its own batch.
    pub async fn record_expense(
        &self,
        external_id: i64,
        entry: NewTransaction,
    ) -> ResultEngine<Transaction> {
        self.record_single(external_id, NewTransaction {
            kind: TransactionKind::Expense,
            ..entry
        })
        .await
    }

    /// Record one income entry as its own batch.
    pub async fn record_income(
        &self,
        external_id: i64,
        entry: NewTransaction,
    ) -> ResultEngine<Transaction> {
        self.record_single(external_id, NewTransaction {
            kind: TransactionKind::Income,
            ..entry
        })
        .await
    }

    async fn record_single(
        &self,
        external_id: i64,
        entry: NewTransaction,
    ) -> ResultEngine<Transaction> {
        self.record_transactions(external_id, std::slice::from_ref(&entry))
            .await?
            .pop()
            .ok_or_else(|| EngineError::KeyNotFound("journal entry".to_string()))
    }

    /// Entries of one batch, in insertion order.
    pub async fn transactions_in_group(&self, grouping_id: &str) -> ResultEngine<Vec<Transaction>> {
        transactions::Entity::find()
            .filter(transactions::Column::GroupingId.eq(grouping_id))
            .order_by_asc(transactions::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Transaction::try_from)
            .collect()
    }

    /// Most recent entries of a user, newest first.
    pub async fn recent_transactions(
        &self,
        external_id: i64,
        limit: u64,
    ) -> ResultEngine<Vec<Transaction>> {
        let Some(user) = self.user_model(&self.database, external_id).await? else {
            return Ok(Vec::new());
        };
        transactions::Entity::find()
            .filter(transactions::Column::UserId.eq(user.id))
            .order_by_desc(transactions::Column::OccurredAt)
            .order_by_desc(transactions::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Transaction::try_from)
            .collect()
    }

    /// Oldest entries of a user not yet pushed to the mirror.
    pub async fn unsynced_transactions(
        &self,
        external_id: i64,
        limit: u64,
    ) -> ResultEngine<Vec<Transaction>> {
        let Some(user) = self.user_model(&self.database, external_id).await? else {
            return Ok(Vec::new());
        };
        transactions::Entity::find()
            .filter(transactions::Column::UserId.eq(user.id))
            .filter(transactions::Column::Synced.eq(false))
            .order_by_asc(transactions::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Transaction::try_from)
            .collect()
    }

    /// Work list for the mirror sweep: linked users with unsynced entries.
    pub async fn pending_mirror_pushes(&self, limit_per_user: u64) -> ResultEngine<Vec<PendingMirror>> {
        let mut pending = Vec::new();
        for user in self.linked_users().await? {
            let Some(link) = user.mirror_link() else {
                continue;
            };
            let entries = self
                .unsynced_transactions(user.external_id, limit_per_user)
                .await?;
            if entries.is_empty() {
                continue;
            }
            pending.push(PendingMirror {
                user,
                link,
                entries,
            });
        }
        Ok(pending)
    }

    /// Serialize mirror pushes of one user. Unsynced entries must be re-read
    /// while the guard is held, otherwise two pushers can append the same rows.
    pub async fn lock_mirror_pushes(&self, external_id: i64) -> OwnedMutexGuard<()> {
        self.push_locks.lock(external_id).await
    }

    /// The entries among `ids` that are still unsynced, in insertion order.
    pub async fn still_unsynced(&self, ids: &[i64]) -> ResultEngine<Vec<Transaction>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        transactions::Entity::find()
            .filter(transactions::Column::Id.is_in(ids.iter().copied()))
            .filter(transactions::Column::Synced.eq(false))
            .order_by_asc(transactions::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Transaction::try_from)
            .collect()
    }

    /// Flag entries as pushed to the mirror.
    pub async fn mark_synced(&self, ids: &[i64]) -> ResultEngine<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = transactions::Entity::update_many()
            .col_expr(transactions::Column::Synced, Expr::value(true))
            .col_expr(transactions::Column::LastSyncAt, Expr::value(Utc::now()))
            .filter(transactions::Column::Id.is_in(ids.iter().copied()))
            .exec(&self.database)
            .await?;
        Ok(result.rows_affected)
    }
}

pub(crate) async fn insert_entries<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    grouping_id: &str,
    entries: &[NewTransaction],
) -> ResultEngine<Vec<Transaction>> {
    let now = Utc::now();
    let mut written = Vec::with_capacity(entries.len());
    for entry in entries {
        let model = transactions::ActiveModel::new_entry(user_id, grouping_id, entry, now)
            .insert(db)
            .await?;
        written.push(Transaction::try_from(model)?);
    }
    Ok(written)
}
