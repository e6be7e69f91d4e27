//! Per-(user, method) balances.
//!
//! At most one row exists per pair (unique index); a missing row reads as 0.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;

use crate::Money;

/// Result of a single ledger mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceChange {
    pub method: String,
    pub previous: Money,
    pub current: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MethodBalance {
    pub method: String,
    pub amount: Money,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Every catalog method with its balance, plus the grand total.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceSheet {
    pub balances: Vec<MethodBalance>,
    pub total: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "payment_balances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub method: String,
    pub amount: i64,
    pub updated_at: DateTimeUtc,
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

impl From<Model> for MethodBalance {
    fn from(model: Model) -> Self {
        Self {
            method: model.method,
            amount: Money::new(model.amount),
            updated_at: Some(model.updated_at),
        }
    }
}
