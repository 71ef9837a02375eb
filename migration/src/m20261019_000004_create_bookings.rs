use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

use super::m20261019_000003_create_trips::Trip;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(BookingStatus::Enum)
                    .values([BookingStatus::Confirmed, BookingStatus::Cancelled])
                    .to_owned(),
            )
            .await?;

        // user_id is a plain back reference: bookings outlive deactivated accounts
        manager
            .create_table(
                Table::create()
                    .table(Booking::Table)
                    .if_not_exists()
                    .col(uuid(Booking::Id).primary_key())
                    .col(uuid(Booking::TripId).not_null())
                    .col(string_len(Booking::SeatNumber, 8).not_null())
                    .col(string_len(Booking::UserId, 128).not_null())
                    .col(big_integer(Booking::FareAmount).not_null())
                    .col(big_integer(Booking::ServiceFee).not_null())
                    .col(big_integer(Booking::TotalAmount).not_null())
                    .col(string_len(Booking::PaymentReference, 128).not_null().unique_key())
                    .col(
                        ColumnDef::new(Booking::Status)
                            .custom(BookingStatus::Enum)
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(Booking::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(Booking::CancelledAt))
                    .col(string_len_null(Booking::CancelledBy, 128))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_trip")
                            .from(Booking::Table, Booking::TripId)
                            .to(Trip::Table, Trip::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_booking_user_created")
                    .table(Booking::Table)
                    .col(Booking::UserId)
                    .col(Booking::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // At most one confirmed booking per seat of a trip
        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE UNIQUE INDEX IF NOT EXISTS "idx_booking_confirmed_seat"
                   ON "booking" ("trip_id", "seat_number")
                   WHERE "status" = 'confirmed'"#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Booking::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(BookingStatus::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Booking {
    Table,
    Id,
    TripId,
    SeatNumber,
    UserId,
    FareAmount,
    ServiceFee,
    TotalAmount,
    PaymentReference,
    Status,
    CreatedAt,
    CancelledAt,
    CancelledBy,
}

#[derive(DeriveIden)]
pub enum BookingStatus {
    #[sea_orm(iden = "booking_status")]
    Enum,
    #[sea_orm(iden = "confirmed")]
    Confirmed,
    #[sea_orm(iden = "cancelled")]
    Cancelled,
}
