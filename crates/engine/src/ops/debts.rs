use chrono::Utc;
use sea_orm::{
    ActiveValue, QueryFilter, QueryOrder, TransactionTrait, prelude::*, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    BalanceChange, DEBT_PAYMENT_PREFIX, Debt, DebtStatus, EngineError, NewDebt, NewTransaction,
    ResultEngine, Transaction, TransactionKind, debts,
};

use super::{
    Engine,
    journal::insert_entries,
    ledger::{read_balance, shift_balance},
    normalize_required_text, require_positive, with_tx,
};

/// Everything a successful debt payment changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebtPayment {
    pub debt: Debt,
    pub transaction: Transaction,
    pub balance: BalanceChange,
}

impl Engine {
    /// Record an IOU together with its `debt` journal entry.
    ///
    /// A debt is a liability record: the ledger is not touched.
    pub async fn create_debt(
        &self,
        external_id: i64,
        debt: NewDebt,
    ) -> ResultEngine<(Debt, Transaction)> {
        let creditor = normalize_required_text(&debt.creditor, "creditor")?;
        let description = normalize_required_text(&debt.description, "description")?;
        let merchant = normalize_required_text(&debt.merchant, "merchant")?;
        require_positive(debt.amount, "debt amount")?;

        let grouping_id = Uuid::new_v4().to_string();
        with_tx!(self, |db_tx| {
            let user = self.ensure_user(&db_tx, external_id).await?;
            let entry = NewTransaction {
                description: description.clone(),
                amount: debt.amount,
                merchant: merchant.clone(),
                method: format!("Debt - {creditor}"),
                occurred_at: debt.occurred_at,
                kind: TransactionKind::Debt,
            };
            let mut written = insert_entries(&db_tx, user.id, &grouping_id, &[entry]).await?;
            let transaction = written
                .pop()
                .ok_or_else(|| EngineError::KeyNotFound("debt entry".to_string()))?;

            let model = debts::ActiveModel {
                id: ActiveValue::NotSet,
                user_id: ActiveValue::Set(user.id),
                creditor: ActiveValue::Set(creditor.clone()),
                description: ActiveValue::Set(description),
                amount: ActiveValue::Set(debt.amount.units()),
                merchant: ActiveValue::Set(merchant),
                status: ActiveValue::Set(DebtStatus::Unpaid.as_str().to_string()),
                grouping_id: ActiveValue::Set(grouping_id.clone()),
                paid_at: ActiveValue::Set(None),
                paid_with: ActiveValue::Set(None),
                created_at: ActiveValue::Set(Utc::now()),
            }
            .insert(&db_tx)
            .await?;
            tracing::info!(external_id, debt_id = model.id, creditor = %creditor, "debt recorded");
            Ok((Debt::try_from(model)?, transaction))
        })
    }

    /// Debts of the user, oldest first, optionally filtered by status.
    pub async fn debts(
        &self,
        external_id: i64,
        status: Option<DebtStatus>,
    ) -> ResultEngine<Vec<Debt>> {
        let Some(user) = self.user_model(&self.database, external_id).await? else {
            return Ok(Vec::new());
        };
        let mut query = debts::Entity::find().filter(debts::Column::UserId.eq(user.id));
        if let Some(status) = status {
            query = query.filter(debts::Column::Status.eq(status.as_str()));
        }
        query
            .order_by_asc(debts::Column::CreatedAt)
            .order_by_asc(debts::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Debt::try_from)
            .collect()
    }

    /// A single debt owned by the user.
    pub async fn debt(&self, external_id: i64, debt_id: i64) -> ResultEngine<Debt> {
        let user = self.require_user(&self.database, external_id).await?;
        let model = debts::Entity::find_by_id(debt_id)
            .filter(debts::Column::UserId.eq(user.id))
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(format!("debt {debt_id}")))?;
        Debt::try_from(model)
    }

    /// Settle a debt from `method`.
    ///
    /// Fails with `KeyNotFound` when the debt is not the user's, `AlreadyPaid`
    /// when it is settled and `InsufficientFunds` when the balance is short.
    /// Marking the debt paid, writing the payment entry and deducting the
    /// balance happen in one database transaction under the ledger lock.
    pub async fn pay_debt(
        &self,
        external_id: i64,
        debt_id: i64,
        method: &str,
    ) -> ResultEngine<DebtPayment> {
        let method = normalize_required_text(method, "payment method")?;
        let _guard = self.ledger_locks.lock((external_id, method.clone())).await;
        with_tx!(self, |db_tx| {
            let user = self.require_user(&db_tx, external_id).await?;
            let model = debts::Entity::find_by_id(debt_id)
                .filter(debts::Column::UserId.eq(user.id))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound(format!("debt {debt_id}")))?;
            let debt = Debt::try_from(model)?;
            if debt.status == DebtStatus::Paid {
                return Err(EngineError::AlreadyPaid(format!("debt {debt_id}")));
            }

            let available = read_balance(&db_tx, user.id, &method).await?;
            if available < debt.amount {
                return Err(EngineError::InsufficientFunds(format!(
                    "{method} has {available}, debt needs {}",
                    debt.amount
                )));
            }

            let now = Utc::now();
            let updated = debts::Entity::update_many()
                .col_expr(debts::Column::Status, Expr::value(DebtStatus::Paid.as_str()))
                .col_expr(debts::Column::PaidAt, Expr::value(now))
                .col_expr(debts::Column::PaidWith, Expr::value(method.clone()))
                .filter(debts::Column::Id.eq(debt_id))
                .filter(debts::Column::Status.eq(DebtStatus::Unpaid.as_str()))
                .exec(&db_tx)
                .await?;
            if updated.rows_affected == 0 {
                return Err(EngineError::AlreadyPaid(format!("debt {debt_id}")));
            }

            let entry = NewTransaction {
                description: format!(
                    "{DEBT_PAYMENT_PREFIX}{}: {}",
                    debt.creditor, debt.description
                ),
                amount: debt.amount,
                merchant: debt.merchant.clone(),
                method: method.clone(),
                occurred_at: now,
                kind: TransactionKind::Expense,
            };
            let grouping_id = Uuid::new_v4().to_string();
            let mut written = insert_entries(&db_tx, user.id, &grouping_id, &[entry]).await?;
            let transaction = written
                .pop()
                .ok_or_else(|| EngineError::KeyNotFound("payment entry".to_string()))?;
            let balance = shift_balance(&db_tx, user.id, &method, -debt.amount).await?;

            tracing::info!(external_id, debt_id, method = %method, "debt paid");
            Ok(DebtPayment {
                debt: Debt {
                    status: DebtStatus::Paid,
                    paid_at: Some(now),
                    paid_with: Some(method.clone()),
                    ..debt
                },
                transaction,
                balance,
            })
        })
    }
}
