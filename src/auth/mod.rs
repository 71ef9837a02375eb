//! Authentication and role/ownership authorization.
//!
//! Every permission lives in the rule table in [`policy`]; handlers only say
//! which action they perform on which resource.

pub mod gate;
pub mod identity;
pub mod policy;

pub use gate::AuthorizationGate;
pub use identity::Identity;
pub use policy::{authorize, Action, Resource, ResourceKind};
