use crate::auth::identity::Identity;
use crate::entities::user::UserRole;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Search,
    Create,
    Update,
    Deactivate,
    Delete,
    Lock,
    Release,
    Confirm,
    Cancel,
    ListBookings,
    ListAll,
    ChangeRole,
    GrantAdmin,
    RequestOperator,
    RevokeSessions,
    VerifyEmail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Profile,
    Users,
    Account,
    Bus,
    Trip,
    Seat,
    Booking,
}

/// The thing being acted on, with the uid that owns it when that matters
#[derive(Debug, Clone, Copy)]
pub struct Resource<'a> {
    pub kind: ResourceKind,
    pub owner: Option<&'a str>,
}

impl<'a> Resource<'a> {
    pub fn profile(uid: &'a str) -> Self {
        Self { kind: ResourceKind::Profile, owner: Some(uid) }
    }

    pub fn users() -> Self {
        Self { kind: ResourceKind::Users, owner: None }
    }

    pub fn account(uid: &'a str) -> Self {
        Self { kind: ResourceKind::Account, owner: Some(uid) }
    }

    /// A bus, owned by its operator
    pub fn bus(operator_id: &'a str) -> Self {
        Self { kind: ResourceKind::Bus, owner: Some(operator_id) }
    }

    /// Search covers every bus and has no owner
    pub fn buses() -> Self {
        Self { kind: ResourceKind::Bus, owner: None }
    }

    /// A trip, owned by the operator of its bus
    pub fn trip(operator_id: &'a str) -> Self {
        Self { kind: ResourceKind::Trip, owner: Some(operator_id) }
    }

    pub fn seat() -> Self {
        Self { kind: ResourceKind::Seat, owner: None }
    }

    pub fn booking(uid: &'a str) -> Self {
        Self { kind: ResourceKind::Booking, owner: Some(uid) }
    }
}

/// Who a rule lets through, admins aside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    Anyone,
    Authenticated,
    Owner,
    OwningOperator,
    AdminOnly,
    /// Not even admins. Reserved for manual provisioning.
    Nobody,
}

struct Rule {
    kind: ResourceKind,
    action: Action,
    grant: Grant,
}

const fn rule(kind: ResourceKind, action: Action, grant: Grant) -> Rule {
    Rule { kind, action, grant }
}

use Action::*;
use Grant::*;
use ResourceKind::{Account, Booking, Bus, Profile, Seat, Trip, Users};

#[rustfmt::skip]
const POLICY: &[Rule] = &[
    rule(Profile, Create,          Owner),
    rule(Profile, Read,            Owner),
    rule(Profile, Update,          Owner),
    rule(Profile, Delete,          Owner),
    rule(Profile, RequestOperator, Owner),
    rule(Profile, ListBookings,    Owner),
    rule(Profile, Deactivate,      AdminOnly),
    rule(Profile, ChangeRole,      AdminOnly),
    rule(Profile, GrantAdmin,      Nobody),

    rule(Users,   ListAll,         AdminOnly),

    rule(Account, Read,            Owner),
    rule(Account, RevokeSessions,  Owner),
    rule(Account, Delete,          Owner),
    rule(Account, VerifyEmail,     AdminOnly),

    rule(Bus,     Search,          Anyone),
    rule(Bus,     Read,            OwningOperator),
    rule(Bus,     Create,          OwningOperator),
    rule(Bus,     Update,          OwningOperator),
    rule(Bus,     Deactivate,      OwningOperator),

    rule(Trip,    Read,            Anyone),
    rule(Trip,    Search,          Anyone),
    rule(Trip,    Create,          OwningOperator),
    rule(Trip,    Cancel,          OwningOperator),
    rule(Trip,    ListBookings,    OwningOperator),

    rule(Seat,    Read,            Anyone),
    rule(Seat,    Lock,            Authenticated),
    rule(Seat,    Release,         Authenticated),

    rule(Booking, Read,            Owner),
    // Ownership of the booking itself is checked by the ledger
    rule(Booking, Confirm,         Authenticated),
    rule(Booking, Cancel,          Authenticated),
];

fn deny(identity: &Identity, action: Action, resource: &Resource<'_>) -> AppError {
    AppError::Forbidden(format!(
        "{} ({:?}) may not {:?} {:?} owned by {:?}",
        identity.uid, identity.role, action, resource.kind, resource.owner
    ))
}

/// Decides whether `identity` may perform `action` on `resource`.
///
/// Deactivated identities may only read their own profile. Identities without
/// a profile may create or read one and do what is open to anyone.
pub fn authorize(identity: &Identity, action: Action, resource: &Resource<'_>) -> AppResult<()> {
    let Some(grant) = POLICY
        .iter()
        .find(|r| r.kind == resource.kind && r.action == action)
        .map(|r| r.grant)
    else {
        return Err(deny(identity, action, resource));
    };

    let owns = resource.owner == Some(identity.uid.as_str());

    if grant == Nobody {
        return Err(deny(identity, action, resource));
    }

    if !identity.active {
        return if resource.kind == Profile && action == Read && owns {
            Ok(())
        } else {
            Err(deny(identity, action, resource))
        };
    }

    if identity.role == UserRole::Admin {
        return Ok(());
    }

    if !identity.registered {
        let allowed = grant == Anyone
            || (resource.kind == Profile && matches!(action, Create | Read) && owns);
        return if allowed { Ok(()) } else { Err(deny(identity, action, resource)) };
    }

    let allowed = match grant {
        Anyone | Authenticated => true,
        Owner => owns,
        OwningOperator => identity.role == UserRole::Operator && owns,
        AdminOnly | Nobody => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(deny(identity, action, resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_cannot_update_another_operators_bus() {
        let op1 = Identity::test("op1", UserRole::Operator);
        let err = authorize(&op1, Update, &Resource::bus("op2")).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        authorize(&op1, Update, &Resource::bus("op1")).unwrap();
    }

    #[test]
    fn test_passenger_cannot_register_bus() {
        let p = Identity::test("p1", UserRole::Passenger);
        assert!(authorize(&p, Create, &Resource::bus("p1")).is_err());
        authorize(&p, Search, &Resource::buses()).unwrap();
    }

    #[test]
    fn test_deactivated_identity_can_only_read_own_profile() {
        let mut u5 = Identity::test("u5", UserRole::Passenger);
        u5.active = false;

        authorize(&u5, Read, &Resource::profile("u5")).unwrap();
        assert!(authorize(&u5, Update, &Resource::profile("u5")).is_err());
        assert!(authorize(&u5, Lock, &Resource::seat()).is_err());
        assert!(authorize(&u5, Read, &Resource::trip("op1")).is_err());
        assert!(authorize(&u5, Read, &Resource::profile("u6")).is_err());
    }

    #[test]
    fn test_admin_can_do_anything_except_grant_admin() {
        let admin = Identity::test("root", UserRole::Admin);

        authorize(&admin, Update, &Resource::bus("op2")).unwrap();
        authorize(&admin, ChangeRole, &Resource::profile("u1")).unwrap();
        authorize(&admin, ListAll, &Resource::users()).unwrap();
        assert!(authorize(&admin, GrantAdmin, &Resource::profile("root")).is_err());
        assert!(authorize(&admin, GrantAdmin, &Resource::profile("u1")).is_err());
    }

    #[test]
    fn test_passenger_manages_only_own_profile_and_bookings() {
        let p = Identity::test("p1", UserRole::Passenger);

        authorize(&p, Update, &Resource::profile("p1")).unwrap();
        authorize(&p, Read, &Resource::booking("p1")).unwrap();
        authorize(&p, RequestOperator, &Resource::profile("p1")).unwrap();
        assert!(authorize(&p, Update, &Resource::profile("p2")).is_err());
        assert!(authorize(&p, Read, &Resource::booking("p2")).is_err());
        assert!(authorize(&p, ChangeRole, &Resource::profile("p1")).is_err());
        assert!(authorize(&p, ListAll, &Resource::users()).is_err());
    }

    #[test]
    fn test_unregistered_identity_may_only_create_profile() {
        let mut fresh = Identity::test("new", UserRole::Passenger);
        fresh.registered = false;

        authorize(&fresh, Create, &Resource::profile("new")).unwrap();
        authorize(&fresh, Read, &Resource::trip("op1")).unwrap();
        assert!(authorize(&fresh, Lock, &Resource::seat()).is_err());
        assert!(authorize(&fresh, Create, &Resource::profile("other")).is_err());
    }

    #[test]
    fn test_unlisted_action_is_denied() {
        let admin = Identity::test("root", UserRole::Admin);
        assert!(authorize(&admin, Lock, &Resource::bus("op1")).is_err());
    }
}
