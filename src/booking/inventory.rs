use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::booking::fare::SeatPrice;
use crate::booking::seat_map::SeatMap;
use crate::error::{AppError, AppResult};
use crate::utils::clock::Clock;

/// Short-lived hold on one seat of one trip, pending payment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeatLock {
    pub trip_id: Uuid,
    pub seat_number: String,
    pub uid: String,
    pub price: SeatPrice,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SeatLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn amount_due(&self) -> i64 {
        self.price.total()
    }
}

#[derive(Debug, Clone)]
enum SeatState {
    Locked(SeatLock),
    Booked(Uuid),
}

/// Seat states of a single trip. Seats without an entry are free.
#[derive(Debug)]
pub struct TripSeats {
    trip_id: Uuid,
    map: SeatMap,
    seats: HashMap<String, SeatState>,
    closed: bool,
}

impl TripSeats {
    fn new(trip_id: Uuid, map: SeatMap) -> Self {
        Self {
            trip_id,
            map,
            seats: HashMap::new(),
            closed: false,
        }
    }

    /// No further locks or bookings once the trip is cancelled or completed
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.seats.clear();
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed {
            return Err(AppError::BadRequest("Trip is not open for booking".to_string()));
        }
        Ok(())
    }

    /// Current state of `seat`, dropping a lock whose expiry has passed
    fn current(&mut self, seat: &str, now: DateTime<Utc>) -> Option<&SeatState> {
        let expired = matches!(
            self.seats.get(seat),
            Some(SeatState::Locked(lock)) if lock.is_expired(now)
        );
        if expired {
            self.seats.remove(seat);
            tracing::debug!(trip_id = %self.trip_id, seat, "Seat lock expired");
        }
        self.seats.get(seat)
    }

    pub(crate) fn try_lock(
        &mut self,
        seat: &str,
        uid: &str,
        ttl: Duration,
        price: SeatPrice,
        now: DateTime<Utc>,
    ) -> AppResult<SeatLock> {
        self.ensure_open()?;
        let seat = self.map.normalize(seat)?;

        match self.current(&seat, now) {
            Some(SeatState::Booked(_)) => return Err(AppError::SeatUnavailable(seat)),
            Some(SeatState::Locked(lock)) if lock.uid != uid => {
                return Err(AppError::SeatUnavailable(seat));
            }
            // Free, or already ours: (re)take it with a fresh expiry
            _ => {}
        }

        let lock = SeatLock {
            trip_id: self.trip_id,
            seat_number: seat.clone(),
            uid: uid.to_string(),
            price,
            locked_at: now,
            expires_at: now + ttl,
        };
        self.seats.insert(seat, SeatState::Locked(lock.clone()));
        Ok(lock)
    }

    pub(crate) fn release(&mut self, seat: &str, uid: &str, now: DateTime<Utc>) -> AppResult<()> {
        let seat = self.map.normalize(seat)?;

        match self.current(&seat, now) {
            Some(SeatState::Locked(lock)) if lock.uid == uid => {
                self.seats.remove(&seat);
                Ok(())
            }
            Some(SeatState::Locked(_)) => Err(AppError::LockNotOwned),
            Some(SeatState::Booked(_)) => Err(AppError::SeatUnavailable(seat)),
            None => Ok(()),
        }
    }

    /// The active lock `uid` holds on `seat`, ready to be turned into a booking
    pub(crate) fn claimable_lock(
        &mut self,
        seat: &str,
        uid: &str,
        now: DateTime<Utc>,
    ) -> AppResult<SeatLock> {
        self.ensure_open()?;
        let seat = self.map.normalize(seat)?;

        match self.current(&seat, now) {
            Some(SeatState::Locked(lock)) if lock.uid == uid => Ok(lock.clone()),
            Some(SeatState::Locked(_)) => Err(AppError::LockNotOwned),
            Some(SeatState::Booked(_)) => Err(AppError::SeatUnavailable(seat)),
            None => Err(AppError::LockExpired),
        }
    }

    pub(crate) fn mark_booked(&mut self, seat: &str, booking_id: Uuid) {
        self.seats.insert(seat.to_string(), SeatState::Booked(booking_id));
    }

    /// Frees `seat` if it is held by `booking_id`; returns whether it was
    pub(crate) fn free_booking(&mut self, seat: &str, booking_id: Uuid) -> bool {
        match self.seats.get(seat) {
            Some(SeatState::Booked(id)) if *id == booking_id => {
                self.seats.remove(seat);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn available(&self, now: DateTime<Utc>) -> Vec<String> {
        if self.closed {
            return Vec::new();
        }
        self.map
            .seats()
            .into_iter()
            .filter(|seat| match self.seats.get(seat) {
                None => true,
                Some(SeatState::Locked(lock)) => lock.is_expired(now),
                Some(SeatState::Booked(_)) => false,
            })
            .collect()
    }
}

pub(crate) type SharedTripSeats = Arc<AsyncMutex<TripSeats>>;

/// Per-trip seat occupancy.
///
/// Each trip has its own async mutex, so lock attempts on one trip are
/// serialized while different trips never contend.
pub struct SeatInventory {
    clock: Arc<dyn Clock>,
    trips: Mutex<HashMap<Uuid, SharedTripSeats>>,
}

impl SeatInventory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            trips: Mutex::new(HashMap::new()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Starts tracking a trip with its already-booked seats. A trip that is
    /// already tracked is left untouched.
    pub fn open_trip<I>(&self, trip_id: Uuid, capacity: u32, booked: I) -> SharedTripSeats
    where
        I: IntoIterator<Item = (String, Uuid)>,
    {
        let mut trips = self.trips.lock().unwrap_or_else(|e| e.into_inner());
        trips
            .entry(trip_id)
            .or_insert_with(|| {
                let mut seats = TripSeats::new(trip_id, SeatMap::new(capacity));
                for (seat, booking_id) in booked {
                    seats.mark_booked(&seat, booking_id);
                }
                tracing::debug!(%trip_id, capacity, "Opened seat inventory");
                Arc::new(AsyncMutex::new(seats))
            })
            .clone()
    }

    /// Stops tracking a trip (cancelled or departed)
    pub fn close_trip(&self, trip_id: Uuid) {
        self.trips
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&trip_id);
    }

    pub(crate) fn get(&self, trip_id: Uuid) -> Option<SharedTripSeats> {
        self.trips
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&trip_id)
            .cloned()
    }

    fn seats(&self, trip_id: Uuid) -> AppResult<SharedTripSeats> {
        self.get(trip_id)
            .ok_or_else(|| AppError::NotFound("Trip not found".to_string()))
    }

    pub async fn lock(
        &self,
        trip_id: Uuid,
        seat: &str,
        uid: &str,
        ttl: Duration,
        price: SeatPrice,
    ) -> AppResult<SeatLock> {
        if ttl <= Duration::zero() {
            return Err(AppError::BadRequest("Lock TTL must be positive".to_string()));
        }

        let seats = self.seats(trip_id)?;
        let mut seats = seats.lock().await;
        let result = seats.try_lock(seat, uid, ttl, price, self.now());

        match &result {
            Ok(lock) => tracing::info!(
                %trip_id,
                seat = %lock.seat_number,
                uid,
                expires_at = %lock.expires_at,
                "Seat locked"
            ),
            Err(AppError::SeatUnavailable(_)) => {
                tracing::debug!(%trip_id, seat, uid, "Seat lock lost to another passenger")
            }
            Err(_) => {}
        }

        result
    }

    pub async fn release(&self, trip_id: Uuid, seat: &str, uid: &str) -> AppResult<()> {
        let seats = self.seats(trip_id)?;
        let mut seats = seats.lock().await;
        seats.release(seat, uid, self.now())?;
        tracing::debug!(%trip_id, seat, uid, "Seat lock released");
        Ok(())
    }

    pub async fn list_available(&self, trip_id: Uuid) -> AppResult<Vec<String>> {
        let seats = self.seats(trip_id)?;
        let seats = seats.lock().await;
        Ok(seats.available(self.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;

    const PRICE: SeatPrice = SeatPrice {
        fare: 450,
        service_fee: 50,
    };

    fn inventory() -> (Arc<ManualClock>, SeatInventory) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let inventory = SeatInventory::new(clock.clone());
        (clock, inventory)
    }

    #[tokio::test]
    async fn test_lock_removes_seat_from_available() {
        let (_, inventory) = inventory();
        let trip = Uuid::new_v4();
        inventory.open_trip(trip, 40, []);

        let lock = inventory
            .lock(trip, "a3", "uidA", Duration::minutes(5), PRICE)
            .await
            .unwrap();

        assert_eq!(lock.seat_number, "A3");
        assert_eq!(lock.amount_due(), 500);
        let available = inventory.list_available(trip).await.unwrap();
        assert_eq!(available.len(), 39);
        assert!(!available.contains(&"A3".to_string()));
    }

    #[tokio::test]
    async fn test_second_passenger_gets_seat_unavailable() {
        let (_, inventory) = inventory();
        let trip = Uuid::new_v4();
        inventory.open_trip(trip, 40, []);

        inventory
            .lock(trip, "A3", "uidA", Duration::minutes(5), PRICE)
            .await
            .unwrap();
        let err = inventory
            .lock(trip, "A3", "uidB", Duration::minutes(5), PRICE)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::SeatUnavailable(seat) if seat == "A3"));
    }

    #[tokio::test]
    async fn test_concurrent_lock_attempts_have_one_winner() {
        let (_, inventory) = inventory();
        let inventory = Arc::new(inventory);
        let trip = Uuid::new_v4();
        inventory.open_trip(trip, 40, []);

        let mut handles = Vec::new();
        for i in 0..64 {
            let inventory = inventory.clone();
            handles.push(tokio::spawn(async move {
                inventory
                    .lock(trip, "A3", &format!("uid{i}"), Duration::minutes(5), PRICE)
                    .await
            }));
        }

        let mut winners = 0;
        let mut losers = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(AppError::SeatUnavailable(_)) => losers += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(losers, 63);
        let available = inventory.list_available(trip).await.unwrap();
        assert!(!available.contains(&"A3".to_string()));
    }

    #[tokio::test]
    async fn test_expired_lock_is_released_implicitly() {
        let (clock, inventory) = inventory();
        let trip = Uuid::new_v4();
        inventory.open_trip(trip, 40, []);

        inventory
            .lock(trip, "B2", "uidA", Duration::minutes(5), PRICE)
            .await
            .unwrap();
        clock.advance(Duration::minutes(6));

        assert!(inventory
            .list_available(trip)
            .await
            .unwrap()
            .contains(&"B2".to_string()));
        let lock = inventory
            .lock(trip, "B2", "uidB", Duration::minutes(5), PRICE)
            .await
            .unwrap();
        assert_eq!(lock.uid, "uidB");
    }

    #[tokio::test]
    async fn test_lock_release_lock_round_trip() {
        let (_, inventory) = inventory();
        let trip = Uuid::new_v4();
        inventory.open_trip(trip, 40, []);

        inventory
            .lock(trip, "C1", "uidA", Duration::minutes(5), PRICE)
            .await
            .unwrap();
        inventory.release(trip, "C1", "uidA").await.unwrap();

        inventory
            .lock(trip, "C1", "uidA", Duration::minutes(5), PRICE)
            .await
            .unwrap();
        inventory.release(trip, "c1", "uidA").await.unwrap();
        inventory
            .lock(trip, "C1", "uidB", Duration::minutes(5), PRICE)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_of_someone_elses_lock_is_rejected() {
        let (_, inventory) = inventory();
        let trip = Uuid::new_v4();
        inventory.open_trip(trip, 40, []);

        inventory
            .lock(trip, "D3", "uidA", Duration::minutes(5), PRICE)
            .await
            .unwrap();

        assert!(matches!(
            inventory.release(trip, "D3", "uidB").await,
            Err(AppError::LockNotOwned)
        ));
        // Releasing a free seat is a no-op
        inventory.release(trip, "D4", "uidB").await.unwrap();
    }

    #[tokio::test]
    async fn test_same_passenger_relock_renews_expiry() {
        let (clock, inventory) = inventory();
        let trip = Uuid::new_v4();
        inventory.open_trip(trip, 40, []);

        let first = inventory
            .lock(trip, "E2", "uidA", Duration::minutes(5), PRICE)
            .await
            .unwrap();
        clock.advance(Duration::minutes(3));
        let renewed = inventory
            .lock(trip, "E2", "uidA", Duration::minutes(5), PRICE)
            .await
            .unwrap();

        assert!(renewed.expires_at > first.expires_at);
    }

    #[tokio::test]
    async fn test_seat_outside_map_is_invalid() {
        let (_, inventory) = inventory();
        let trip = Uuid::new_v4();
        inventory.open_trip(trip, 10, []);

        let err = inventory
            .lock(trip, "C3", "uidA", Duration::minutes(5), PRICE)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidSeat(_)));
    }

    #[tokio::test]
    async fn test_booked_seats_from_open_are_unavailable() {
        let (_, inventory) = inventory();
        let trip = Uuid::new_v4();
        inventory.open_trip(trip, 8, [("A1".to_string(), Uuid::new_v4())]);

        let available = inventory.list_available(trip).await.unwrap();
        assert_eq!(available.len(), 7);
        assert!(matches!(
            inventory
                .lock(trip, "A1", "uidA", Duration::minutes(5), PRICE)
                .await,
            Err(AppError::SeatUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_trip_is_not_found() {
        let (_, inventory) = inventory();
        assert!(matches!(
            inventory.list_available(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }
}
