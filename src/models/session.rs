//! Per-client session state published by the identity context.

use super::user::AuthUser;

/// Current authentication state as seen by one client.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: Option<AuthUser>,
    /// True until the first auth-state emission arrives.
    pub loading: bool,
}

impl Session {
    /// State before the auth stream has reported anything.
    pub fn pending() -> Self {
        Self {
            user: None,
            loading: true,
        }
    }

    /// State after an emission.
    pub fn resolved(user: Option<AuthUser>) -> Self {
        Self {
            user,
            loading: false,
        }
    }
}
