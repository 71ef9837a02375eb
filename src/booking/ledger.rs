use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::auth::Identity;
use crate::booking::fare::SeatPrice;
use crate::booking::inventory::{SeatInventory, SeatLock, SharedTripSeats};
use crate::booking::store::{BookingStore, NewBooking};
use crate::entities::booking::{self, BookingStatus};
use crate::error::{AppError, AppResult};
use crate::services::payments::{PaymentCheck, PaymentVerifier};
use crate::utils::clock::Clock;

/// Which trip, how many seats it has and when it leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripSeating {
    pub trip_id: Uuid,
    pub capacity: u32,
    pub departs_at: DateTime<Utc>,
}

impl TripSeating {
    pub fn has_departed(&self, now: DateTime<Utc>) -> bool {
        self.departs_at <= now
    }
}

/// A trip the ledger holds state for, until it departs
#[derive(Debug, Clone, Copy)]
struct TrackedTrip {
    departs_at: DateTime<Utc>,
    closed: bool,
}

/// Turns seat locks into bookings and back.
///
/// A confirmation holds the trip's seat mutex from the lock check until the
/// seat is marked booked, so a lock can never be consumed twice and a booking
/// row never exists without its seat being held.
pub struct BookingLedger {
    inventory: SeatInventory,
    store: Arc<dyn BookingStore>,
    payments: Arc<dyn PaymentVerifier>,
    lock_ttl: Duration,
    upstream_timeout: StdDuration,
    /// Serializes hydrating a trip against cancellations on trips not yet open
    opening: AsyncMutex<()>,
    tracked: Mutex<HashMap<Uuid, TrackedTrip>>,
}

impl BookingLedger {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn BookingStore>,
        payments: Arc<dyn PaymentVerifier>,
        lock_ttl: Duration,
        upstream_timeout: StdDuration,
    ) -> Self {
        Self {
            inventory: SeatInventory::new(clock),
            store,
            payments,
            lock_ttl,
            upstream_timeout,
            opening: AsyncMutex::new(()),
            tracked: Mutex::new(HashMap::new()),
        }
    }

    pub fn inventory(&self) -> &SeatInventory {
        &self.inventory
    }

    fn tracked(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, TrackedTrip>> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self, trip_id: Uuid) -> bool {
        self.tracked().get(&trip_id).is_some_and(|t| t.closed)
    }

    /// Drops every trace of a trip. Only safe once it has departed, since
    /// `open` refuses departed trips before looking anything up.
    fn retire(&self, trip_id: Uuid) {
        self.tracked().remove(&trip_id);
        self.inventory.close_trip(trip_id);
    }

    /// Forgets all trips whose departure has passed
    fn retire_departed(&self, now: DateTime<Utc>) {
        let departed: Vec<Uuid> = self
            .tracked()
            .iter()
            .filter(|(_, t)| t.departs_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for trip_id in &departed {
            self.retire(*trip_id);
        }
        if !departed.is_empty() {
            tracing::debug!(count = departed.len(), "Retired departed trips");
        }
    }

    /// Seat state for a trip, rebuilt from confirmed bookings on first use
    async fn open(&self, trip: TripSeating) -> AppResult<SharedTripSeats> {
        let now = self.inventory.now();
        if trip.has_departed(now) {
            self.retire(trip.trip_id);
            return Err(AppError::BadRequest("Trip has already departed".to_string()));
        }
        if self.is_closed(trip.trip_id) {
            return Err(AppError::BadRequest("Trip is not open for booking".to_string()));
        }
        if let Some(seats) = self.inventory.get(trip.trip_id) {
            return Ok(seats);
        }

        let _opening = self.opening.lock().await;
        // A cancellation may have run while we waited
        if self.is_closed(trip.trip_id) {
            return Err(AppError::BadRequest("Trip is not open for booking".to_string()));
        }
        if let Some(seats) = self.inventory.get(trip.trip_id) {
            return Ok(seats);
        }
        self.retire_departed(now);

        let booked = self.store.confirmed_seats(trip.trip_id).await?;
        self.tracked().insert(
            trip.trip_id,
            TrackedTrip {
                departs_at: trip.departs_at,
                closed: false,
            },
        );
        Ok(self.inventory.open_trip(trip.trip_id, trip.capacity, booked))
    }

    pub async fn lock_seat(
        &self,
        trip: TripSeating,
        seat: &str,
        uid: &str,
        price: SeatPrice,
    ) -> AppResult<SeatLock> {
        self.open(trip).await?;
        self.inventory
            .lock(trip.trip_id, seat, uid, self.lock_ttl, price)
            .await
    }

    pub async fn release_seat(&self, trip: TripSeating, seat: &str, uid: &str) -> AppResult<()> {
        self.open(trip).await?;
        self.inventory.release(trip.trip_id, seat, uid).await
    }

    pub async fn available_seats(&self, trip: TripSeating) -> AppResult<Vec<String>> {
        self.open(trip).await?;
        self.inventory.list_available(trip.trip_id).await
    }

    /// Free seat counts for many trips without hydrating them. Trips already
    /// open count their live locks; the rest count confirmed bookings only.
    pub async fn available_counts(&self, trips: &[TripSeating]) -> AppResult<HashMap<Uuid, usize>> {
        let now = self.inventory.now();
        let mut counts = HashMap::with_capacity(trips.len());
        let mut cold = Vec::new();

        for trip in trips {
            if trip.has_departed(now) {
                self.retire(trip.trip_id);
                counts.insert(trip.trip_id, 0);
                continue;
            }
            if self.is_closed(trip.trip_id) {
                counts.insert(trip.trip_id, 0);
                continue;
            }
            match self.inventory.get(trip.trip_id) {
                Some(seats) => {
                    let available = seats.lock().await.available(now).len();
                    counts.insert(trip.trip_id, available);
                }
                None => cold.push(*trip),
            }
        }

        if !cold.is_empty() {
            let ids: Vec<Uuid> = cold.iter().map(|t| t.trip_id).collect();
            let booked = self.store.confirmed_counts(&ids).await?;
            for trip in cold {
                let taken = booked.get(&trip.trip_id).copied().unwrap_or(0);
                counts.insert(trip.trip_id, (trip.capacity as usize).saturating_sub(taken));
            }
        }

        Ok(counts)
    }

    async fn verify_payment(&self, reference: &str, lock: &SeatLock) -> AppResult<()> {
        if self.store.payment_reference_used(reference).await? {
            return Err(AppError::PaymentNotVerified(
                "payment reference already used".to_string(),
            ));
        }

        let check = tokio::time::timeout(self.upstream_timeout, self.payments.check(reference))
            .await
            .map_err(|_| AppError::Unavailable("payment verification timed out".to_string()))??;

        match check {
            PaymentCheck::Verified { uid, amount } if uid == lock.uid && amount == lock.amount_due() => {
                Ok(())
            }
            PaymentCheck::Verified { uid, amount } => {
                tracing::warn!(
                    reference,
                    paid_by = %uid,
                    amount,
                    expected = lock.amount_due(),
                    "Payment does not match seat lock"
                );
                Err(AppError::PaymentNotVerified(
                    "payment does not match the seat lock".to_string(),
                ))
            }
            PaymentCheck::Declined => Err(AppError::PaymentDeclined),
            PaymentCheck::Unknown => Err(AppError::PaymentNotVerified(
                "no payment recorded for this reference".to_string(),
            )),
        }
    }

    /// Consumes `uid`'s lock on the seat and records a confirmed booking.
    ///
    /// On any failure the lock stays as it was and nothing is written.
    pub async fn confirm(
        &self,
        trip: TripSeating,
        seat: &str,
        uid: &str,
        payment_reference: &str,
    ) -> AppResult<booking::Model> {
        let reference = payment_reference.trim();
        if reference.is_empty() {
            return Err(AppError::PaymentNotVerified(
                "payment reference is required".to_string(),
            ));
        }

        let seats = self.open(trip).await?;
        let mut seats = seats.lock().await;

        let now = self.inventory.now();
        let lock = seats.claimable_lock(seat, uid, now)?;
        self.verify_payment(reference, &lock).await?;

        let booking = self
            .store
            .insert(NewBooking {
                trip_id: trip.trip_id,
                seat_number: lock.seat_number.clone(),
                user_id: uid.to_string(),
                fare_amount: lock.price.fare,
                service_fee: lock.price.service_fee,
                total_amount: lock.amount_due(),
                payment_reference: reference.to_string(),
                created_at: now,
            })
            .await?;
        seats.mark_booked(&booking.seat_number, booking.id);

        tracing::info!(
            booking_id = %booking.id,
            trip_id = %trip.trip_id,
            seat = %booking.seat_number,
            uid,
            total = booking.total_amount,
            "Booking confirmed"
        );
        Ok(booking)
    }

    /// Cancels a booking on behalf of its owner or an admin and frees the seat
    pub async fn cancel(&self, booking_id: Uuid, by: &Identity) -> AppResult<booking::Model> {
        let existing = self
            .store
            .find(booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

        if existing.user_id != by.uid && !by.is_admin() {
            return Err(AppError::NotOwner);
        }
        if existing.status == BookingStatus::Cancelled {
            return Err(AppError::AlreadyCancelled);
        }

        let opening = self.opening.lock().await;
        let cancelled = match self.inventory.get(existing.trip_id) {
            Some(seats) => {
                drop(opening);
                let mut seats = seats.lock().await;
                let cancelled = self
                    .store
                    .mark_cancelled(booking_id, &by.uid, self.inventory.now())
                    .await?;
                seats.free_booking(&cancelled.seat_number, cancelled.id);
                cancelled
            }
            // Not hydrated yet: the next open reads the cancelled row
            None => {
                self.store
                    .mark_cancelled(booking_id, &by.uid, self.inventory.now())
                    .await?
            }
        };

        tracing::info!(
            %booking_id,
            trip_id = %cancelled.trip_id,
            seat = %cancelled.seat_number,
            by = %by.uid,
            "Booking cancelled"
        );
        Ok(cancelled)
    }

    /// Cancels every confirmed booking of a trip and stops selling its seats.
    /// Returns how many bookings were cancelled.
    pub async fn cancel_trip(&self, trip: TripSeating, by_uid: &str) -> AppResult<usize> {
        let trip_id = trip.trip_id;
        let _opening = self.opening.lock().await;
        self.retire_departed(self.inventory.now());
        self.tracked().insert(
            trip_id,
            TrackedTrip {
                departs_at: trip.departs_at,
                closed: true,
            },
        );

        let seats = self.inventory.get(trip_id);
        let mut guard = match &seats {
            Some(seats) => Some(seats.lock().await),
            None => None,
        };

        let now = self.inventory.now();
        let mut cancelled = 0;
        for booking in self.store.list_for_trip(trip_id).await? {
            if booking.status != BookingStatus::Confirmed {
                continue;
            }
            match self.store.mark_cancelled(booking.id, by_uid, now).await {
                Ok(_) => cancelled += 1,
                Err(AppError::AlreadyCancelled) => {}
                Err(e) => return Err(e),
            }
        }

        if let Some(guard) = guard.as_mut() {
            guard.close();
        }
        self.inventory.close_trip(trip_id);

        tracing::info!(%trip_id, cancelled, by = by_uid, "Trip cancelled");
        Ok(cancelled)
    }

    pub async fn find(&self, booking_id: Uuid) -> AppResult<Option<booking::Model>> {
        self.store.find(booking_id).await
    }

    pub async fn list_for_user(&self, uid: &str) -> AppResult<Vec<booking::Model>> {
        self.store.list_for_user(uid).await
    }

    pub async fn list_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<booking::Model>> {
        self.store.list_for_trip(trip_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::store::InMemoryBookingStore;
    use crate::entities::payment::PaymentStatus;
    use crate::entities::user::UserRole;
    use crate::services::payments::{InMemoryPayments, PaymentEvent};
    use crate::utils::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::Utc;

    const PRICE: SeatPrice = SeatPrice {
        fare: 450,
        service_fee: 50,
    };

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryBookingStore>,
        payments: Arc<InMemoryPayments>,
        ledger: BookingLedger,
        trip: TripSeating,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryBookingStore::new());
        let payments = Arc::new(InMemoryPayments::new());
        let ledger = BookingLedger::new(
            clock.clone(),
            store.clone(),
            payments.clone(),
            Duration::minutes(5),
            StdDuration::from_secs(1),
        );
        let trip = TripSeating {
            trip_id: Uuid::new_v4(),
            capacity: 40,
            departs_at: clock.now() + Duration::days(1),
        };
        Harness {
            clock,
            store,
            payments,
            ledger,
            trip,
        }
    }

    fn paid(payments: &InMemoryPayments, reference: &str, uid: &str, amount: i64) {
        payments.record(PaymentEvent {
            reference: reference.to_string(),
            uid: uid.to_string(),
            amount,
            status: PaymentStatus::Succeeded,
        });
    }

    #[tokio::test]
    async fn test_confirm_consumes_lock_into_booking() {
        let h = harness();
        h.ledger.lock_seat(h.trip, "A3", "uidA", PRICE).await.unwrap();
        paid(&h.payments, "pay-1", "uidA", 500);

        let booking = h.ledger.confirm(h.trip, "a3", "uidA", "pay-1").await.unwrap();

        assert_eq!(booking.seat_number, "A3");
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.fare_amount, 450);
        assert_eq!(booking.total_amount, 500);
        assert!(!h
            .ledger
            .available_seats(h.trip)
            .await
            .unwrap()
            .contains(&"A3".to_string()));
        assert_eq!(h.ledger.list_for_user("uidA").await.unwrap().len(), 1);

        // The lock is gone, so a second confirm cannot book again
        paid(&h.payments, "pay-2", "uidA", 500);
        assert!(matches!(
            h.ledger.confirm(h.trip, "A3", "uidA", "pay-2").await,
            Err(AppError::SeatUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_confirm_after_expiry_is_lock_expired() {
        let h = harness();
        h.ledger.lock_seat(h.trip, "B2", "uidA", PRICE).await.unwrap();
        paid(&h.payments, "pay-1", "uidA", 500);

        h.clock.advance(Duration::minutes(6));

        assert!(matches!(
            h.ledger.confirm(h.trip, "B2", "uidA", "pay-1").await,
            Err(AppError::LockExpired)
        ));
        assert!(h
            .ledger
            .available_seats(h.trip)
            .await
            .unwrap()
            .contains(&"B2".to_string()));
        assert!(h.ledger.list_for_trip(h.trip.trip_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_someone_elses_lock() {
        let h = harness();
        h.ledger.lock_seat(h.trip, "C1", "uidA", PRICE).await.unwrap();
        paid(&h.payments, "pay-b", "uidB", 500);

        assert!(matches!(
            h.ledger.confirm(h.trip, "C1", "uidB", "pay-b").await,
            Err(AppError::LockNotOwned)
        ));
    }

    #[tokio::test]
    async fn test_payment_failures_keep_the_lock() {
        let h = harness();
        h.ledger.lock_seat(h.trip, "D4", "uidA", PRICE).await.unwrap();

        assert!(matches!(
            h.ledger.confirm(h.trip, "D4", "uidA", "pay-missing").await,
            Err(AppError::PaymentNotVerified(_))
        ));

        paid(&h.payments, "pay-short", "uidA", 450);
        assert!(matches!(
            h.ledger.confirm(h.trip, "D4", "uidA", "pay-short").await,
            Err(AppError::PaymentNotVerified(_))
        ));

        h.payments.record(PaymentEvent {
            reference: "pay-declined".to_string(),
            uid: "uidA".to_string(),
            amount: 500,
            status: PaymentStatus::Declined,
        });
        assert!(matches!(
            h.ledger.confirm(h.trip, "D4", "uidA", "pay-declined").await,
            Err(AppError::PaymentDeclined)
        ));

        // Still held by uidA, and a good payment now goes through
        assert!(matches!(
            h.ledger.lock_seat(h.trip, "D4", "uidB", PRICE).await,
            Err(AppError::SeatUnavailable(_))
        ));
        paid(&h.payments, "pay-ok", "uidA", 500);
        h.ledger.confirm(h.trip, "D4", "uidA", "pay-ok").await.unwrap();
    }

    #[tokio::test]
    async fn test_payment_reference_cannot_be_reused() {
        let h = harness();
        paid(&h.payments, "pay-1", "uidA", 500);

        h.ledger.lock_seat(h.trip, "A1", "uidA", PRICE).await.unwrap();
        h.ledger.confirm(h.trip, "A1", "uidA", "pay-1").await.unwrap();

        h.ledger.lock_seat(h.trip, "A2", "uidA", PRICE).await.unwrap();
        assert!(matches!(
            h.ledger.confirm(h.trip, "A2", "uidA", "pay-1").await,
            Err(AppError::PaymentNotVerified(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_twice_does_not_double_free() {
        let h = harness();
        let owner = Identity::test("uidA", UserRole::Passenger);
        h.ledger.lock_seat(h.trip, "A3", "uidA", PRICE).await.unwrap();
        paid(&h.payments, "pay-1", "uidA", 500);
        let booking = h.ledger.confirm(h.trip, "A3", "uidA", "pay-1").await.unwrap();

        let cancelled = h.ledger.cancel(booking.id, &owner).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);

        // Resold to someone else
        h.ledger.lock_seat(h.trip, "A3", "uidB", PRICE).await.unwrap();

        assert!(matches!(
            h.ledger.cancel(booking.id, &owner).await,
            Err(AppError::AlreadyCancelled)
        ));
        assert!(!h
            .ledger
            .available_seats(h.trip)
            .await
            .unwrap()
            .contains(&"A3".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_requires_owner_or_admin() {
        let h = harness();
        h.ledger.lock_seat(h.trip, "A3", "uidA", PRICE).await.unwrap();
        paid(&h.payments, "pay-1", "uidA", 500);
        let booking = h.ledger.confirm(h.trip, "A3", "uidA", "pay-1").await.unwrap();

        let stranger = Identity::test("uidB", UserRole::Passenger);
        assert!(matches!(
            h.ledger.cancel(booking.id, &stranger).await,
            Err(AppError::NotOwner)
        ));
        assert!(matches!(
            h.ledger.cancel(Uuid::new_v4(), &stranger).await,
            Err(AppError::NotFound(_))
        ));

        let admin = Identity::test("root", UserRole::Admin);
        let cancelled = h.ledger.cancel(booking.id, &admin).await.unwrap();
        assert_eq!(cancelled.cancelled_by.as_deref(), Some("root"));
    }

    #[tokio::test]
    async fn test_confirmed_bookings_survive_restart() {
        let h = harness();
        h.ledger.lock_seat(h.trip, "E1", "uidA", PRICE).await.unwrap();
        paid(&h.payments, "pay-1", "uidA", 500);
        h.ledger.confirm(h.trip, "E1", "uidA", "pay-1").await.unwrap();

        let restarted = BookingLedger::new(
            h.clock.clone(),
            h.store.clone(),
            h.payments.clone(),
            Duration::minutes(5),
            StdDuration::from_secs(1),
        );
        let available = restarted.available_seats(h.trip).await.unwrap();
        assert_eq!(available.len(), 39);
        assert!(!available.contains(&"E1".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_trip_cancels_bookings_and_stops_sales() {
        let h = harness();
        for (seat, uid, reference) in [("A1", "uidA", "pay-1"), ("A2", "uidB", "pay-2")] {
            h.ledger.lock_seat(h.trip, seat, uid, PRICE).await.unwrap();
            paid(&h.payments, reference, uid, 500);
            h.ledger.confirm(h.trip, seat, uid, reference).await.unwrap();
        }

        let cancelled = h.ledger.cancel_trip(h.trip, "op1").await.unwrap();
        assert_eq!(cancelled, 2);

        let bookings = h.ledger.list_for_trip(h.trip.trip_id).await.unwrap();
        assert!(bookings.iter().all(|b| b.status == BookingStatus::Cancelled));
        assert!(h.ledger.lock_seat(h.trip, "A3", "uidC", PRICE).await.is_err());
    }

    struct StalledPayments;

    #[async_trait]
    impl PaymentVerifier for StalledPayments {
        async fn check(&self, _reference: &str) -> AppResult<PaymentCheck> {
            tokio::time::sleep(StdDuration::from_secs(60)).await;
            Ok(PaymentCheck::Unknown)
        }
    }

    #[tokio::test]
    async fn test_payment_timeout_is_unavailable_and_keeps_lock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let trip = TripSeating {
            trip_id: Uuid::new_v4(),
            capacity: 4,
            departs_at: clock.now() + Duration::days(1),
        };
        let ledger = BookingLedger::new(
            clock,
            Arc::new(InMemoryBookingStore::new()),
            Arc::new(StalledPayments),
            Duration::minutes(5),
            StdDuration::from_millis(50),
        );

        ledger.lock_seat(trip, "A1", "uidA", PRICE).await.unwrap();
        assert!(matches!(
            ledger.confirm(trip, "A1", "uidA", "pay-1").await,
            Err(AppError::Unavailable(_))
        ));
        assert_eq!(ledger.available_seats(trip).await.unwrap().len(), 3);
    }

    /// Holds `confirmed_seats` for one trip until released, leaving every
    /// other call to the in-memory store
    struct GatedStore {
        inner: InMemoryBookingStore,
        gated_trip: Uuid,
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl BookingStore for GatedStore {
        async fn insert(&self, booking: NewBooking) -> AppResult<booking::Model> {
            self.inner.insert(booking).await
        }

        async fn find(&self, id: Uuid) -> AppResult<Option<booking::Model>> {
            self.inner.find(id).await
        }

        async fn mark_cancelled(
            &self,
            id: Uuid,
            by: &str,
            at: DateTime<Utc>,
        ) -> AppResult<booking::Model> {
            self.inner.mark_cancelled(id, by, at).await
        }

        async fn list_for_user(&self, uid: &str) -> AppResult<Vec<booking::Model>> {
            self.inner.list_for_user(uid).await
        }

        async fn list_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<booking::Model>> {
            self.inner.list_for_trip(trip_id).await
        }

        async fn confirmed_seats(&self, trip_id: Uuid) -> AppResult<Vec<(String, Uuid)>> {
            if trip_id == self.gated_trip {
                self.gate.notified().await;
            }
            self.inner.confirmed_seats(trip_id).await
        }

        async fn confirmed_counts(&self, trip_ids: &[Uuid]) -> AppResult<HashMap<Uuid, usize>> {
            self.inner.confirmed_counts(trip_ids).await
        }

        async fn payment_reference_used(&self, reference: &str) -> AppResult<bool> {
            self.inner.payment_reference_used(reference).await
        }
    }

    #[tokio::test]
    async fn test_lock_queued_behind_trip_cancel_is_refused() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let departs_at = clock.now() + Duration::days(1);
        let slow = TripSeating {
            trip_id: Uuid::new_v4(),
            capacity: 4,
            departs_at,
        };
        let target = TripSeating {
            trip_id: Uuid::new_v4(),
            capacity: 4,
            departs_at,
        };
        let store = Arc::new(GatedStore {
            inner: InMemoryBookingStore::new(),
            gated_trip: slow.trip_id,
            gate: tokio::sync::Notify::new(),
        });
        let ledger = Arc::new(BookingLedger::new(
            clock,
            store.clone(),
            Arc::new(InMemoryPayments::new()),
            Duration::minutes(5),
            StdDuration::from_secs(1),
        ));

        // Hydrating the slow trip holds the opening mutex
        let hydrate = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.available_seats(slow).await }
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let cancel = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.cancel_trip(target, "op1").await }
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let lock = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.lock_seat(target, "A1", "uidA", PRICE).await }
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        store.gate.notify_one();
        hydrate.await.unwrap().unwrap();
        assert_eq!(cancel.await.unwrap().unwrap(), 0);
        assert!(matches!(lock.await.unwrap(), Err(AppError::BadRequest(_))));
        assert!(ledger.inventory().get(target.trip_id).is_none());
    }

    #[tokio::test]
    async fn test_departed_trip_is_retired() {
        let h = harness();
        h.ledger.lock_seat(h.trip, "A1", "uidA", PRICE).await.unwrap();
        assert!(h.ledger.inventory().get(h.trip.trip_id).is_some());

        h.clock.advance(Duration::days(1));

        assert!(matches!(
            h.ledger.lock_seat(h.trip, "A2", "uidB", PRICE).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(h.ledger.inventory().get(h.trip.trip_id).is_none());
        assert!(h.ledger.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_opening_a_trip_sweeps_departed_ones() {
        let h = harness();
        h.ledger.lock_seat(h.trip, "A1", "uidA", PRICE).await.unwrap();
        h.ledger.cancel_trip(h.trip, "op1").await.unwrap();
        assert!(h.ledger.is_closed(h.trip.trip_id));

        h.clock.advance(Duration::days(1));
        let later = TripSeating {
            trip_id: Uuid::new_v4(),
            capacity: 4,
            departs_at: h.clock.now() + Duration::days(1),
        };
        h.ledger.available_seats(later).await.unwrap();

        let tracked = h.ledger.tracked();
        assert_eq!(tracked.len(), 1);
        assert!(tracked.contains_key(&later.trip_id));
    }

    #[tokio::test]
    async fn test_available_counts_do_not_hydrate() {
        let h = harness();
        h.ledger.lock_seat(h.trip, "A1", "uidA", PRICE).await.unwrap();
        paid(&h.payments, "pay-1", "uidA", 500);
        h.ledger.confirm(h.trip, "A1", "uidA", "pay-1").await.unwrap();
        h.ledger.lock_seat(h.trip, "A2", "uidB", PRICE).await.unwrap();

        // Same bookings seen by a fresh process that has not opened the trip
        let restarted = BookingLedger::new(
            h.clock.clone(),
            h.store.clone(),
            h.payments.clone(),
            Duration::minutes(5),
            StdDuration::from_secs(1),
        );
        let departed = TripSeating {
            trip_id: Uuid::new_v4(),
            capacity: 4,
            departs_at: h.clock.now() - Duration::minutes(1),
        };

        let live = h.ledger.available_counts(&[h.trip]).await.unwrap();
        assert_eq!(live[&h.trip.trip_id], 38);

        let cold = restarted.available_counts(&[h.trip, departed]).await.unwrap();
        assert_eq!(cold[&h.trip.trip_id], 39);
        assert_eq!(cold[&departed.trip_id], 0);
        assert!(restarted.inventory().get(h.trip.trip_id).is_none());
    }
}
