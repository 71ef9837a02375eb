pub mod booking;
pub mod bus;
pub mod payment;
pub mod trip;
pub mod user;
