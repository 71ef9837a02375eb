use serde::Serialize;

use crate::entities::user::{self, UserRole};
use crate::services::identity::VerifiedToken;

/// Authenticated principal, as seen by authorization and the booking core
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub role: UserRole,
    pub active: bool,
    /// Whether a profile exists for this uid yet
    pub registered: bool,
}

impl Identity {
    /// Combines what the identity provider vouched for with the stored profile.
    /// A uid without a profile acts as an unregistered passenger.
    pub fn resolve(token: VerifiedToken, profile: Option<&user::Model>) -> Self {
        match profile {
            Some(profile) => Self {
                uid: token.uid,
                email: token.email.or_else(|| Some(profile.email.clone())),
                email_verified: token.email_verified,
                role: profile.role,
                active: profile.is_active,
                registered: true,
            },
            None => Self {
                uid: token.uid,
                email: token.email,
                email_verified: token.email_verified,
                role: UserRole::Passenger,
                active: true,
                registered: false,
            },
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin && self.active
    }

    #[cfg(test)]
    pub fn test(uid: &str, role: UserRole) -> Self {
        Self {
            uid: uid.to_string(),
            email: Some(format!("{uid}@example.com")),
            email_verified: true,
            role,
            active: true,
            registered: true,
        }
    }
}
