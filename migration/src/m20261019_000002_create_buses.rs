use sea_orm_migration::{prelude::*, schema::*};

use super::m20261019_000001_create_users::User;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Bus::Table)
                    .if_not_exists()
                    .col(uuid(Bus::Id).primary_key())
                    .col(string_len(Bus::BusNumber, 32).not_null().unique_key())
                    .col(string_len(Bus::RouteNumber, 32).not_null())
                    .col(string_len(Bus::OperatorId, 128).not_null())
                    .col(string_len(Bus::Origin, 120).not_null())
                    .col(string_len(Bus::Destination, 120).not_null())
                    .col(json_binary(Bus::Stops).not_null())
                    .col(integer(Bus::SeatCapacity).not_null())
                    .col(string_len(Bus::DepartureTime, 5).not_null())
                    .col(string_len(Bus::ArrivalTime, 5).not_null())
                    .col(string_len(Bus::OperatingDays, 16).not_null().default("daily"))
                    .col(double(Bus::RatePerKm).not_null())
                    .col(boolean(Bus::IsActive).not_null().default(true))
                    .col(
                        timestamp_with_time_zone(Bus::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Bus::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bus_operator")
                            .from(Bus::Table, Bus::OperatorId)
                            .to(User::Table, User::Uid)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bus_operator_active")
                    .table(Bus::Table)
                    .col(Bus::OperatorId)
                    .col(Bus::IsActive)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bus_origin_destination")
                    .table(Bus::Table)
                    .col(Bus::Origin)
                    .col(Bus::Destination)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Bus::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Bus {
    Table,
    Id,
    BusNumber,
    RouteNumber,
    OperatorId,
    Origin,
    Destination,
    Stops,
    SeatCapacity,
    DepartureTime,
    ArrivalTime,
    OperatingDays,
    RatePerKm,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
