use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
    sea_query::OnConflict,
};
use uuid::Uuid;

use crate::{
    BalanceChange, BalanceSheet, EngineError, MethodBalance, Money, NewTransaction,
    ResultEngine, Transaction, TransactionKind, balances, catalog::method_key,
};

use super::{
    Engine, journal::insert_entries, normalize_required_text, require_non_negative,
    require_positive, with_tx,
};

/// Move `amount` from `source` to `destination`, paying `fee` on top.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: String,
    pub destination: String,
    pub amount: Money,
    pub fee: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferReceipt {
    pub source: BalanceChange,
    pub destination: BalanceChange,
    /// Audit entry recorded against the source method.
    pub transaction: Transaction,
}

impl Engine {
    /// Current balance; a missing row (or unknown user) reads as 0.
    pub async fn balance(&self, external_id: i64, method: &str) -> ResultEngine<Money> {
        let Some(user) = self.user_model(&self.database, external_id).await? else {
            return Ok(Money::ZERO);
        };
        read_balance(&self.database, user.id, method.trim()).await
    }

    /// Unconditionally overwrite a balance.
    pub async fn set_balance(
        &self,
        external_id: i64,
        method: &str,
        amount: Money,
    ) -> ResultEngine<BalanceChange> {
        let method = normalize_required_text(method, "payment method")?;
        let _guard = self.ledger_locks.lock((external_id, method.clone())).await;
        with_tx!(self, |db_tx| {
            let user = self.ensure_user(&db_tx, external_id).await?;
            let previous = read_balance(&db_tx, user.id, &method).await?;
            write_balance(&db_tx, user.id, &method, amount).await?;
            Ok(BalanceChange {
                method,
                previous,
                current: amount,
            })
        })
    }

    /// Increase a balance by `amount` (>= 0).
    pub async fn add_balance(
        &self,
        external_id: i64,
        method: &str,
        amount: Money,
    ) -> ResultEngine<BalanceChange> {
        require_non_negative(amount, "amount")?;
        self.apply_delta(external_id, method, amount).await
    }

    /// Decrease a balance by `amount` (>= 0). Balances may go negative.
    pub async fn deduct_balance(
        &self,
        external_id: i64,
        method: &str,
        amount: Money,
    ) -> ResultEngine<BalanceChange> {
        require_non_negative(amount, "amount")?;
        self.apply_delta(external_id, method, -amount).await
    }

    async fn apply_delta(
        &self,
        external_id: i64,
        method: &str,
        delta: Money,
    ) -> ResultEngine<BalanceChange> {
        let method = normalize_required_text(method, "payment method")?;
        let _guard = self.ledger_locks.lock((external_id, method.clone())).await;
        with_tx!(self, |db_tx| {
            let user = self.ensure_user(&db_tx, external_id).await?;
            shift_balance(&db_tx, user.id, &method, delta).await
        })
    }

    /// Apply the ledger effect of a journal batch: entries are summed per
    /// method and each total is applied once (expenses deduct, income adds).
    pub async fn apply_to_ledger(
        &self,
        external_id: i64,
        entries: &[Transaction],
    ) -> ResultEngine<Vec<BalanceChange>> {
        let mut totals: BTreeMap<String, Money> = BTreeMap::new();
        for entry in entries {
            if let Some(delta) = entry.kind.ledger_delta(entry.amount) {
                let total = totals.entry(entry.method.clone()).or_default();
                *total = total.checked_add(delta).ok_or_else(|| {
                    EngineError::InvalidAmount(format!("batch total overflow on {}", entry.method))
                })?;
            }
        }
        if totals.is_empty() {
            return Ok(Vec::new());
        }

        let keys = totals
            .keys()
            .map(|method| (external_id, method.clone()))
            .collect();
        let _guards = self.ledger_locks.lock_all(keys).await;
        with_tx!(self, |db_tx| {
            let user = self.ensure_user(&db_tx, external_id).await?;
            let mut changes = Vec::with_capacity(totals.len());
            for (method, delta) in &totals {
                changes.push(shift_balance(&db_tx, user.id, method, *delta).await?);
            }
            Ok(changes)
        })
    }

    /// Deduct `amount + fee` from the source, add `amount` to the destination
    /// and record one `transfer` entry against the source.
    pub async fn transfer(
        &self,
        external_id: i64,
        request: TransferRequest,
    ) -> ResultEngine<TransferReceipt> {
        let source = normalize_required_text(&request.source, "source method")?;
        let destination = normalize_required_text(&request.destination, "destination method")?;
        if method_key(&source) == method_key(&destination) {
            return Err(EngineError::InvalidInput(
                "source and destination must differ".to_string(),
            ));
        }
        require_positive(request.amount, "transfer amount")?;
        require_non_negative(request.fee, "transfer fee")?;
        let outflow = request
            .amount
            .checked_add(request.fee)
            .ok_or_else(|| EngineError::InvalidAmount("transfer amount too large".to_string()))?;

        let _guards = self
            .ledger_locks
            .lock_all(vec![
                (external_id, source.clone()),
                (external_id, destination.clone()),
            ])
            .await;
        with_tx!(self, |db_tx| {
            let user = self.ensure_user(&db_tx, external_id).await?;
            let source_change = shift_balance(&db_tx, user.id, &source, -outflow).await?;
            let destination_change =
                shift_balance(&db_tx, user.id, &destination, request.amount).await?;

            let entry = NewTransaction {
                description: format!("Transfer to {destination}"),
                amount: outflow,
                merchant: "Transfer".to_string(),
                method: source.clone(),
                occurred_at: request.occurred_at,
                kind: TransactionKind::Transfer,
            };
            let grouping_id = Uuid::new_v4().to_string();
            let mut written = insert_entries(&db_tx, user.id, &grouping_id, &[entry]).await?;
            let transaction = written
                .pop()
                .ok_or_else(|| EngineError::KeyNotFound("transfer entry".to_string()))?;

            tracing::info!(
                external_id,
                source = %source,
                destination = %destination,
                amount = request.amount.units(),
                fee = request.fee.units(),
                "transfer recorded"
            );
            Ok(TransferReceipt {
                source: source_change,
                destination: destination_change,
                transaction,
            })
        })
    }

    /// Drop every balance row of the user (all balances read as 0 again).
    pub async fn reset_balances(&self, external_id: i64) -> ResultEngine<u64> {
        let Some(user) = self.user_model(&self.database, external_id).await? else {
            return Ok(0);
        };
        let methods: Vec<String> = balances::Entity::find()
            .filter(balances::Column::UserId.eq(user.id))
            .all(&self.database)
            .await?
            .into_iter()
            .map(|row| row.method)
            .collect();

        let keys = methods
            .into_iter()
            .map(|method| (external_id, method))
            .collect();
        let _guards = self.ledger_locks.lock_all(keys).await;
        let deleted = balances::Entity::delete_many()
            .filter(balances::Column::UserId.eq(user.id))
            .exec(&self.database)
            .await?
            .rows_affected;
        tracing::info!(external_id, deleted, "balances reset");
        Ok(deleted)
    }

    /// Every catalog method with its balance, plus leftover rows for methods
    /// no longer in the catalog, and the grand total.
    pub async fn balances(&self, external_id: i64) -> ResultEngine<BalanceSheet> {
        let catalog = self.payment_methods(external_id).await?;
        let mut rows: Vec<MethodBalance> = match self.user_model(&self.database, external_id).await? {
            Some(user) => balances::Entity::find()
                .filter(balances::Column::UserId.eq(user.id))
                .order_by_asc(balances::Column::Method)
                .all(&self.database)
                .await?
                .into_iter()
                .map(MethodBalance::from)
                .collect(),
            None => Vec::new(),
        };

        let mut sheet = Vec::with_capacity(catalog.len() + rows.len());
        for method in &catalog {
            let position = rows.iter().position(|row| row.method == method.name);
            let entry = match position {
                Some(idx) => rows.remove(idx),
                None => MethodBalance {
                    method: method.name.clone(),
                    amount: Money::ZERO,
                    updated_at: None,
                },
            };
            sheet.push(entry);
        }
        sheet.extend(rows);

        let total = Money::saturating_sum(sheet.iter().map(|b| b.amount));
        Ok(BalanceSheet {
            balances: sheet,
            total,
        })
    }
}

pub(crate) async fn read_balance<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    method: &str,
) -> ResultEngine<Money> {
    let row = balances::Entity::find()
        .filter(balances::Column::UserId.eq(user_id))
        .filter(balances::Column::Method.eq(method))
        .one(db)
        .await?;
    Ok(row.map(|r| Money::new(r.amount)).unwrap_or_default())
}

async fn write_balance<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    method: &str,
    amount: Money,
) -> ResultEngine<()> {
    let row = balances::ActiveModel {
        id: ActiveValue::NotSet,
        user_id: ActiveValue::Set(user_id),
        method: ActiveValue::Set(method.to_string()),
        amount: ActiveValue::Set(amount.units()),
        updated_at: ActiveValue::Set(Utc::now()),
    };
    balances::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([balances::Column::UserId, balances::Column::Method])
                .update_columns([balances::Column::Amount, balances::Column::UpdatedAt])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Read-modify-upsert. The caller must hold the `(user, method)` lock.
pub(crate) async fn shift_balance<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    method: &str,
    delta: Money,
) -> ResultEngine<BalanceChange> {
    let previous = read_balance(db, user_id, method).await?;
    let current = previous
        .checked_add(delta)
        .ok_or_else(|| EngineError::InvalidAmount(format!("balance overflow on {method}")))?;
    write_balance(db, user_id, method, current).await?;
    Ok(BalanceChange {
        method: method.to_string(),
        previous,
        current,
    })
}
