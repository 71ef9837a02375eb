use sea_orm_migration::{prelude::*, schema::*};

use super::m20261019_000002_create_buses::Bus;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Trip::Table)
                    .if_not_exists()
                    .col(uuid(Trip::Id).primary_key())
                    .col(uuid(Trip::BusId).not_null())
                    .col(date(Trip::ServiceDate).not_null())
                    .col(string_len(Trip::Status, 16).not_null().default("scheduled"))
                    .col(
                        timestamp_with_time_zone(Trip::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trip_bus")
                            .from(Trip::Table, Trip::BusId)
                            .to(Bus::Table, Bus::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One live trip per bus and date; a cancelled date can be rescheduled
        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE UNIQUE INDEX IF NOT EXISTS "idx_trip_bus_date"
                   ON "trip" ("bus_id", "service_date")
                   WHERE "status" <> 'cancelled'"#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Trip::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Trip {
    Table,
    Id,
    BusId,
    ServiceDate,
    Status,
    CreatedAt,
}
