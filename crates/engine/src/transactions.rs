//! Transaction journal primitives.
//!
//! A `Transaction` is one recorded money movement. Line items entered
//! together share a `grouping_id`; a row may be tagged with the id of its
//! mirror row, which is unique across the journal.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::{EngineError, Money, ResultEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Expense,
    Income,
    Transfer,
    Debt,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
            Self::Transfer => "transfer",
            Self::Debt => "debt",
        }
    }

    /// Signed effect of a journal entry of this kind on its method balance.
    ///
    /// Transfers and debts are journal-only: their ledger effect is applied by
    /// the operation that records them.
    pub fn ledger_delta(self, amount: Money) -> Option<Money> {
        match self {
            Self::Expense => Some(-amount),
            Self::Income => Some(amount),
            Self::Transfer | Self::Debt => None,
        }
    }
}

impl TryFrom<&str> for TransactionKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "expense" => Ok(Self::Expense),
            "income" => Ok(Self::Income),
            "transfer" => Ok(Self::Transfer),
            "debt" => Ok(Self::Debt),
            other => Err(EngineError::InvalidInput(format!(
                "invalid transaction kind: {other}"
            ))),
        }
    }
}

/// Input for a journal write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTransaction {
    pub description: String,
    pub amount: Money,
    pub merchant: String,
    pub method: String,
    pub occurred_at: DateTime<Utc>,
    pub kind: TransactionKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub grouping_id: String,
    pub description: String,
    pub amount: Money,
    pub merchant: String,
    pub method: String,
    pub occurred_at: DateTime<Utc>,
    pub kind: TransactionKind,
    pub synced: bool,
    pub mirror_row_id: Option<String>,
    pub mirror_version: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub grouping_id: String,
    pub description: String,
    pub amount: i64,
    pub merchant: String,
    pub method: String,
    pub occurred_at: DateTimeUtc,
    pub kind: String,
    pub synced: bool,
    #[sea_orm(unique)]
    pub mirror_row_id: Option<String>,
    pub mirror_version: Option<String>,
    pub last_sync_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    /// Fresh, not yet synced row for `user_id` inside batch `grouping_id`.
    pub(crate) fn new_entry(
        user_id: i64,
        grouping_id: &str,
        entry: &NewTransaction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            grouping_id: ActiveValue::Set(grouping_id.to_string()),
            description: ActiveValue::Set(entry.description.clone()),
            amount: ActiveValue::Set(entry.amount.units()),
            merchant: ActiveValue::Set(entry.merchant.clone()),
            method: ActiveValue::Set(entry.method.clone()),
            occurred_at: ActiveValue::Set(entry.occurred_at),
            kind: ActiveValue::Set(entry.kind.as_str().to_string()),
            synced: ActiveValue::Set(false),
            mirror_row_id: ActiveValue::Set(None),
            mirror_version: ActiveValue::Set(None),
            last_sync_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
        }
    }
}

impl TryFrom<Model> for Transaction {
    type Error = EngineError;

    fn try_from(model: Model) -> ResultEngine<Self> {
        Ok(Self {
            id: model.id,
            grouping_id: model.grouping_id,
            description: model.description,
            amount: Money::new(model.amount),
            merchant: model.merchant,
            method: model.method,
            occurred_at: model.occurred_at,
            kind: TransactionKind::try_from(model.kind.as_str())?,
            synced: model.synced,
            mirror_row_id: model.mirror_row_id,
            mirror_version: model.mirror_version,
            last_sync_at: model.last_sync_at,
            created_at: model.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_storage_string() {
        for kind in [
            TransactionKind::Expense,
            TransactionKind::Income,
            TransactionKind::Transfer,
            TransactionKind::Debt,
        ] {
            assert_eq!(TransactionKind::try_from(kind.as_str()).unwrap(), kind);
        }
        assert!(TransactionKind::try_from("refund").is_err());
    }

    #[test]
    fn only_expense_and_income_touch_the_ledger() {
        let amount = Money::new(20_000);
        assert_eq!(
            TransactionKind::Expense.ledger_delta(amount),
            Some(Money::new(-20_000))
        );
        assert_eq!(TransactionKind::Income.ledger_delta(amount), Some(amount));
        assert_eq!(TransactionKind::Transfer.ledger_delta(amount), None);
        assert_eq!(TransactionKind::Debt.ledger_delta(amount), None);
    }
}
