//! Collaborators outside the process: identity, road distances, payments.

pub mod directions;
pub mod identity;
pub mod payments;
