//! Seat inventory, fares and the booking ledger.
//!
//! Seat state lives in memory per trip and is rebuilt from confirmed
//! bookings the first time a trip is touched. Every mutation of one trip's
//! seats happens under that trip's async mutex, which is also held while a
//! confirmation writes its booking row.

pub mod fare;
pub mod inventory;
pub mod ledger;
pub mod seat_map;
pub mod store;

pub use fare::{FareCalculator, FareQuote, SeatPrice};
pub use inventory::{SeatInventory, SeatLock};
pub use ledger::{BookingLedger, TripSeating};
pub use seat_map::SeatMap;
pub use store::{BookingStore, InMemoryBookingStore, NewBooking, SeaOrmBookingStore};
