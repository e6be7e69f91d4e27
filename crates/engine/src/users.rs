//! Users table.
//!
//! A user is identified by the stable id of the chat platform (`external_id`);
//! the integer primary key is only used for foreign keys.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// Document + credential needed to push rows to the user's mirror.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorLink {
    pub document_id: String,
    pub credential: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub external_id: i64,
    pub mirror_document_id: Option<String>,
    pub mirror_credential: Option<String>,
    pub mirror_webhook_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Returns the mirror link only when both document and credential are set.
    pub fn mirror_link(&self) -> Option<MirrorLink> {
        match (&self.mirror_document_id, &self.mirror_credential) {
            (Some(document_id), Some(credential)) => Some(MirrorLink {
                document_id: document_id.clone(),
                credential: credential.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub external_id: i64,
    pub mirror_document_id: Option<String>,
    pub mirror_credential: Option<String>,
    pub mirror_webhook_secret: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::transactions::Entity")]
    Transactions,
    #[sea_orm(has_many = "super::debts::Entity")]
    Debts,
    #[sea_orm(has_many = "super::balances::Entity")]
    Balances,
    #[sea_orm(has_many = "super::payment_methods::Entity")]
    PaymentMethods,
}

impl Related<super::transactions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl Related<super::debts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Debts.def()
    }
}

impl Related<super::balances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Balances.def()
    }
}

impl Related<super::payment_methods::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentMethods.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for User {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            external_id: model.external_id,
            mirror_document_id: model.mirror_document_id,
            mirror_credential: model.mirror_credential,
            mirror_webhook_secret: model.mirror_webhook_secret,
            created_at: model.created_at,
        }
    }
}
