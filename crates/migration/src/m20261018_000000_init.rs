//! Initial schema.
//!
//! - `users`: identity anchor plus optional mirror link
//! - `payment_methods`: user defined payment methods
//! - `payment_balances`: one balance per (user, method)
//! - `transactions`: the journal, with mirror sync metadata
//! - `debts`: IOUs and their settlement

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum Users {
    Table,
    Id,
    ExternalId,
    MirrorDocumentId,
    MirrorCredential,
    MirrorWebhookSecret,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum PaymentMethods {
    Table,
    Id,
    UserId,
    Name,
    NameNorm,
    Category,
    CreatedAt,
}

#[derive(Iden)]
enum PaymentBalances {
    Table,
    Id,
    UserId,
    Method,
    Amount,
    UpdatedAt,
}

#[derive(Iden)]
enum Transactions {
    Table,
    Id,
    UserId,
    GroupingId,
    Description,
    Amount,
    Merchant,
    Method,
    OccurredAt,
    Kind,
    Synced,
    MirrorRowId,
    MirrorVersion,
    LastSyncAt,
    CreatedAt,
}

#[derive(Iden)]
enum Debts {
    Table,
    Id,
    UserId,
    Creditor,
    Description,
    Amount,
    Merchant,
    Status,
    GroupingId,
    PaidAt,
    PaidWith,
    CreatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Users::ExternalId)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Users::MirrorDocumentId).string())
                    .col(ColumnDef::new(Users::MirrorCredential).string())
                    .col(ColumnDef::new(Users::MirrorWebhookSecret).string())
                    .col(ColumnDef::new(Users::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Users::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PaymentMethods::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentMethods::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PaymentMethods::UserId).big_integer().not_null())
                    .col(ColumnDef::new(PaymentMethods::Name).string().not_null())
                    .col(ColumnDef::new(PaymentMethods::NameNorm).string().not_null())
                    .col(
                        ColumnDef::new(PaymentMethods::Category)
                            .string()
                            .not_null()
                            .default("Other"),
                    )
                    .col(ColumnDef::new(PaymentMethods::CreatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-payment_methods-user_id")
                            .from(PaymentMethods::Table, PaymentMethods::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-payment_methods-user_id-name_norm-unique")
                    .table(PaymentMethods::Table)
                    .col(PaymentMethods::UserId)
                    .col(PaymentMethods::NameNorm)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PaymentBalances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentBalances::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PaymentBalances::UserId).big_integer().not_null())
                    .col(ColumnDef::new(PaymentBalances::Method).string().not_null())
                    .col(
                        ColumnDef::new(PaymentBalances::Amount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(PaymentBalances::UpdatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-payment_balances-user_id")
                            .from(PaymentBalances::Table, PaymentBalances::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Upserts conflict on this index.
        manager
            .create_index(
                Index::create()
                    .name("idx-payment_balances-user_id-method-unique")
                    .table(PaymentBalances::Table)
                    .col(PaymentBalances::UserId)
                    .col(PaymentBalances::Method)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Transactions::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Transactions::GroupingId).string().not_null())
                    .col(ColumnDef::new(Transactions::Description).string().not_null())
                    .col(ColumnDef::new(Transactions::Amount).big_integer().not_null())
                    .col(ColumnDef::new(Transactions::Merchant).string().not_null())
                    .col(ColumnDef::new(Transactions::Method).string().not_null())
                    .col(ColumnDef::new(Transactions::OccurredAt).timestamp().not_null())
                    .col(
                        ColumnDef::new(Transactions::Kind)
                            .string()
                            .not_null()
                            .default("expense"),
                    )
                    .col(
                        ColumnDef::new(Transactions::Synced)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Transactions::MirrorRowId).string())
                    .col(ColumnDef::new(Transactions::MirrorVersion).string())
                    .col(ColumnDef::new(Transactions::LastSyncAt).timestamp())
                    .col(ColumnDef::new(Transactions::CreatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transactions-user_id")
                            .from(Transactions::Table, Transactions::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-grouping_id")
                    .table(Transactions::Table)
                    .col(Transactions::GroupingId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-user_id-occurred_at")
                    .table(Transactions::Table)
                    .col(Transactions::UserId)
                    .col(Transactions::OccurredAt)
                    .to_owned(),
            )
            .await?;

        // NULLs are distinct, so only tagged rows are constrained.
        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-mirror_row_id-unique")
                    .table(Transactions::Table)
                    .col(Transactions::MirrorRowId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Debts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Debts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Debts::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Debts::Creditor).string().not_null())
                    .col(ColumnDef::new(Debts::Description).string().not_null())
                    .col(ColumnDef::new(Debts::Amount).big_integer().not_null())
                    .col(ColumnDef::new(Debts::Merchant).string().not_null())
                    .col(
                        ColumnDef::new(Debts::Status)
                            .string()
                            .not_null()
                            .default("unpaid"),
                    )
                    .col(ColumnDef::new(Debts::GroupingId).string().not_null())
                    .col(ColumnDef::new(Debts::PaidAt).timestamp())
                    .col(ColumnDef::new(Debts::PaidWith).string())
                    .col(ColumnDef::new(Debts::CreatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-debts-user_id")
                            .from(Debts::Table, Debts::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-debts-user_id-status")
                    .table(Debts::Table)
                    .col(Debts::UserId)
                    .col(Debts::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Debts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PaymentBalances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PaymentMethods::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}
