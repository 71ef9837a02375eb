use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Written by the gateway webhook; no card data is ever stored
        manager
            .create_table(
                Table::create()
                    .table(Payment::Table)
                    .if_not_exists()
                    .col(string_len(Payment::Reference, 128).primary_key())
                    .col(string_len(Payment::UserId, 128).not_null())
                    .col(big_integer(Payment::Amount).not_null())
                    .col(string_len(Payment::Status, 16).not_null())
                    .col(
                        timestamp_with_time_zone(Payment::ReceivedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Payment::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Payment {
    Table,
    Reference,
    UserId,
    Amount,
    Status,
    ReceivedAt,
}
