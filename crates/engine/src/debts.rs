//! Debt register entity.
//!
//! A debt moves one way only: `unpaid` -> `paid`.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{EngineError, Money, ResultEngine};

/// Description prefix of the expense a debt payment writes. Reports skip
/// these entries since the debt itself is listed.
pub const DEBT_PAYMENT_PREFIX: &str = "Debt payment - ";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtStatus {
    Unpaid,
    Paid,
}

impl DebtStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
        }
    }
}

impl TryFrom<&str> for DebtStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            other => Err(EngineError::InvalidInput(format!(
                "invalid debt status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDebt {
    pub creditor: String,
    pub description: String,
    pub amount: Money,
    pub merchant: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Debt {
    pub id: i64,
    pub creditor: String,
    pub description: String,
    pub amount: Money,
    pub merchant: String,
    pub status: DebtStatus,
    /// Grouping id of the journal entry that recorded the debt.
    pub grouping_id: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_with: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "debts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub creditor: String,
    pub description: String,
    pub amount: i64,
    pub merchant: String,
    pub status: String,
    pub grouping_id: String,
    pub paid_at: Option<DateTimeUtc>,
    pub paid_with: Option<String>,
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

impl TryFrom<Model> for Debt {
    type Error = EngineError;

    fn try_from(model: Model) -> ResultEngine<Self> {
        Ok(Self {
            id: model.id,
            creditor: model.creditor,
            description: model.description,
            amount: Money::new(model.amount),
            merchant: model.merchant,
            status: DebtStatus::try_from(model.status.as_str())?,
            grouping_id: model.grouping_id,
            paid_at: model.paid_at,
            paid_with: model.paid_with,
            created_at: model.created_at,
        })
    }
}
