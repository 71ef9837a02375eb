use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus};
use crate::error::{conflict_on_unique, AppError, AppResult};

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub trip_id: Uuid,
    pub seat_number: String,
    pub user_id: String,
    pub fare_amount: i64,
    pub service_fee: i64,
    pub total_amount: i64,
    pub payment_reference: String,
    pub created_at: DateTime<Utc>,
}

/// Durable record of bookings
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: NewBooking) -> AppResult<booking::Model>;

    async fn find(&self, id: Uuid) -> AppResult<Option<booking::Model>>;

    /// Flips a confirmed booking to cancelled. Fails with `AlreadyCancelled`
    /// if it is not confirmed any more.
    async fn mark_cancelled(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> AppResult<booking::Model>;

    /// Most recent first
    async fn list_for_user(&self, uid: &str) -> AppResult<Vec<booking::Model>>;

    /// Most recent first
    async fn list_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<booking::Model>>;

    /// (seat, booking id) of every confirmed booking on the trip
    async fn confirmed_seats(&self, trip_id: Uuid) -> AppResult<Vec<(String, Uuid)>>;

    /// Number of confirmed bookings per trip, for the given trips only
    async fn confirmed_counts(&self, trip_ids: &[Uuid]) -> AppResult<HashMap<Uuid, usize>>;

    async fn payment_reference_used(&self, reference: &str) -> AppResult<bool>;
}

pub struct SeaOrmBookingStore {
    db: DatabaseConnection,
}

impl SeaOrmBookingStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BookingStore for SeaOrmBookingStore {
    async fn insert(&self, new: NewBooking) -> AppResult<booking::Model> {
        let model = booking::ActiveModel {
            id: Set(Uuid::new_v4()),
            trip_id: Set(new.trip_id),
            seat_number: Set(new.seat_number),
            user_id: Set(new.user_id),
            fare_amount: Set(new.fare_amount),
            service_fee: Set(new.service_fee),
            total_amount: Set(new.total_amount),
            payment_reference: Set(new.payment_reference),
            status: Set(BookingStatus::Confirmed),
            created_at: Set(new.created_at.into()),
            cancelled_at: Set(None),
            cancelled_by: Set(None),
        };

        model
            .insert(&self.db)
            .await
            .map_err(|e| conflict_on_unique(e, "Seat or payment reference already booked"))
    }

    async fn find(&self, id: Uuid) -> AppResult<Option<booking::Model>> {
        Ok(booking::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> AppResult<booking::Model> {
        let changes = booking::ActiveModel {
            status: Set(BookingStatus::Cancelled),
            cancelled_at: Set(Some(at.into())),
            cancelled_by: Set(Some(by.to_string())),
            ..Default::default()
        };

        // Conditional on the current status so two cancels cannot both succeed
        let result = booking::Entity::update_many()
            .set(changes)
            .filter(booking::Column::Id.eq(id))
            .filter(booking::Column::Status.eq(BookingStatus::Confirmed))
            .exec(&self.db)
            .await?;

        let current = self
            .find(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::AlreadyCancelled);
        }
        Ok(current)
    }

    async fn list_for_user(&self, uid: &str) -> AppResult<Vec<booking::Model>> {
        Ok(booking::Entity::find()
            .filter(booking::Column::UserId.eq(uid))
            .order_by_desc(booking::Column::CreatedAt)
            .order_by_desc(booking::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn list_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<booking::Model>> {
        Ok(booking::Entity::find()
            .filter(booking::Column::TripId.eq(trip_id))
            .order_by_desc(booking::Column::CreatedAt)
            .order_by_desc(booking::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn confirmed_seats(&self, trip_id: Uuid) -> AppResult<Vec<(String, Uuid)>> {
        let bookings = booking::Entity::find()
            .filter(booking::Column::TripId.eq(trip_id))
            .filter(booking::Column::Status.eq(BookingStatus::Confirmed))
            .all(&self.db)
            .await?;

        Ok(bookings.into_iter().map(|b| (b.seat_number, b.id)).collect())
    }

    async fn confirmed_counts(&self, trip_ids: &[Uuid]) -> AppResult<HashMap<Uuid, usize>> {
        if trip_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let booked: Vec<Uuid> = booking::Entity::find()
            .select_only()
            .column(booking::Column::TripId)
            .filter(booking::Column::TripId.is_in(trip_ids.iter().copied()))
            .filter(booking::Column::Status.eq(BookingStatus::Confirmed))
            .into_tuple()
            .all(&self.db)
            .await?;

        let mut counts = HashMap::new();
        for trip_id in booked {
            *counts.entry(trip_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn payment_reference_used(&self, reference: &str) -> AppResult<bool> {
        let existing = booking::Entity::find()
            .filter(booking::Column::PaymentReference.eq(reference))
            .one(&self.db)
            .await?;
        Ok(existing.is_some())
    }
}

/// Store backed by a Vec, for tests and local tooling
#[derive(Default)]
pub struct InMemoryBookingStore {
    rows: Mutex<Vec<booking::Model>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, Vec<booking::Model>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert(&self, new: NewBooking) -> AppResult<booking::Model> {
        let mut rows = self.rows();

        let clash = rows.iter().any(|b| {
            b.payment_reference == new.payment_reference
                || (b.trip_id == new.trip_id
                    && b.seat_number == new.seat_number
                    && b.status == BookingStatus::Confirmed)
        });
        if clash {
            return Err(AppError::Conflict(
                "Seat or payment reference already booked".to_string(),
            ));
        }

        let model = booking::Model {
            id: Uuid::new_v4(),
            trip_id: new.trip_id,
            seat_number: new.seat_number,
            user_id: new.user_id,
            fare_amount: new.fare_amount,
            service_fee: new.service_fee,
            total_amount: new.total_amount,
            payment_reference: new.payment_reference,
            status: BookingStatus::Confirmed,
            created_at: new.created_at.into(),
            cancelled_at: None,
            cancelled_by: None,
        };
        rows.push(model.clone());
        Ok(model)
    }

    async fn find(&self, id: Uuid) -> AppResult<Option<booking::Model>> {
        Ok(self.rows().iter().find(|b| b.id == id).cloned())
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> AppResult<booking::Model> {
        let mut rows = self.rows();
        let row = rows
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

        if row.status != BookingStatus::Confirmed {
            return Err(AppError::AlreadyCancelled);
        }
        row.status = BookingStatus::Cancelled;
        row.cancelled_at = Some(at.into());
        row.cancelled_by = Some(by.to_string());
        Ok(row.clone())
    }

    async fn list_for_user(&self, uid: &str) -> AppResult<Vec<booking::Model>> {
        let mut mine: Vec<_> = self
            .rows()
            .iter()
            .rev()
            .filter(|b| b.user_id == uid)
            .cloned()
            .collect();
        // Stable, so equal timestamps keep newest-inserted first
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(mine)
    }

    async fn list_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<booking::Model>> {
        let mut rows: Vec<_> = self
            .rows()
            .iter()
            .rev()
            .filter(|b| b.trip_id == trip_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn confirmed_seats(&self, trip_id: Uuid) -> AppResult<Vec<(String, Uuid)>> {
        Ok(self
            .rows()
            .iter()
            .filter(|b| b.trip_id == trip_id && b.status == BookingStatus::Confirmed)
            .map(|b| (b.seat_number.clone(), b.id))
            .collect())
    }

    async fn confirmed_counts(&self, trip_ids: &[Uuid]) -> AppResult<HashMap<Uuid, usize>> {
        let mut counts = HashMap::new();
        for b in self.rows().iter() {
            if b.status == BookingStatus::Confirmed && trip_ids.contains(&b.trip_id) {
                *counts.entry(b.trip_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn payment_reference_used(&self, reference: &str) -> AppResult<bool> {
        Ok(self.rows().iter().any(|b| b.payment_reference == reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_booking(trip_id: Uuid, seat: &str, uid: &str, reference: &str) -> NewBooking {
        NewBooking {
            trip_id,
            seat_number: seat.to_string(),
            user_id: uid.to_string(),
            fare_amount: 450,
            service_fee: 50,
            total_amount: 500,
            payment_reference: reference.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_rejects_double_booking() {
        let store = InMemoryBookingStore::new();
        let trip = Uuid::new_v4();

        store.insert(new_booking(trip, "A1", "uidA", "pay-1")).await.unwrap();
        let err = store
            .insert(new_booking(trip, "A1", "uidB", "pay-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = store
            .insert(new_booking(trip, "A2", "uidB", "pay-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_cancel_twice_is_already_cancelled() {
        let store = InMemoryBookingStore::new();
        let booking = store
            .insert(new_booking(Uuid::new_v4(), "A1", "uidA", "pay-1"))
            .await
            .unwrap();

        let cancelled = store.mark_cancelled(booking.id, "uidA", Utc::now()).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by.as_deref(), Some("uidA"));

        assert!(matches!(
            store.mark_cancelled(booking.id, "uidA", Utc::now()).await,
            Err(AppError::AlreadyCancelled)
        ));
        assert!(matches!(
            store.mark_cancelled(Uuid::new_v4(), "uidA", Utc::now()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_user_bookings_most_recent_first() {
        let store = InMemoryBookingStore::new();
        let trip = Uuid::new_v4();
        let now = Utc::now();

        let mut older = new_booking(trip, "A1", "uidA", "pay-1");
        older.created_at = now - Duration::hours(2);
        let mut newer = new_booking(trip, "A2", "uidA", "pay-2");
        newer.created_at = now;
        let other = new_booking(trip, "A3", "uidB", "pay-3");

        store.insert(newer).await.unwrap();
        store.insert(older).await.unwrap();
        store.insert(other).await.unwrap();

        let mine = store.list_for_user("uidA").await.unwrap();
        let seats: Vec<_> = mine.iter().map(|b| b.seat_number.as_str()).collect();
        assert_eq!(seats, vec!["A2", "A1"]);
    }

    #[tokio::test]
    async fn test_trip_bookings_most_recent_first() {
        let store = InMemoryBookingStore::new();
        let trip = Uuid::new_v4();
        let start = Utc::now();

        for (minutes, seat, reference) in [(0, "C1", "pay-1"), (1, "A1", "pay-2"), (2, "B1", "pay-3")] {
            let mut booking = new_booking(trip, seat, "uidA", reference);
            booking.created_at = start + Duration::minutes(minutes);
            store.insert(booking).await.unwrap();
        }
        store
            .insert(new_booking(Uuid::new_v4(), "A1", "uidB", "pay-4"))
            .await
            .unwrap();

        let bookings = store.list_for_trip(trip).await.unwrap();
        let seats: Vec<_> = bookings.iter().map(|b| b.seat_number.as_str()).collect();
        assert_eq!(seats, vec!["B1", "A1", "C1"]);
    }

    #[tokio::test]
    async fn test_confirmed_counts_skip_cancelled_and_other_trips() {
        let store = InMemoryBookingStore::new();
        let trip = Uuid::new_v4();
        let other = Uuid::new_v4();

        store.insert(new_booking(trip, "A1", "uidA", "pay-1")).await.unwrap();
        let cancelled = store.insert(new_booking(trip, "A2", "uidA", "pay-2")).await.unwrap();
        store.mark_cancelled(cancelled.id, "uidA", Utc::now()).await.unwrap();
        store.insert(new_booking(other, "A1", "uidB", "pay-3")).await.unwrap();

        let counts = store.confirmed_counts(&[trip]).await.unwrap();
        assert_eq!(counts.get(&trip), Some(&1));
        assert!(!counts.contains_key(&other));
    }
}
