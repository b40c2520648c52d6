//! Role-based gating of UI areas.
//!
//! Guards decide whether a subtree may be rendered for the current session.
//! They are a convenience for the UI only; the backend enforces the real
//! permissions and treats these roles as untrusted.

use crate::auth::models::UserRole;
use crate::services::session_state::SessionState;
use chrono::{DateTime, Utc};

/// Outcome of evaluating a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    /// Nobody is signed in; send the user to the login screen.
    LoginRequired,
    /// Signed in, but the role is not allowed here.
    Forbidden,
    /// The session is still bootstrapping; render a placeholder.
    Pending,
}

#[derive(Debug, Clone)]
pub enum RoleGuard {
    /// Any signed-in user.
    Authenticated,
    /// One of the listed roles exactly.
    AnyOf(Vec<UserRole>),
    /// The given role or a more privileged one.
    AtLeast(UserRole),
}

impl RoleGuard {
    pub fn any_of(roles: impl IntoIterator<Item = UserRole>) -> Self {
        Self::AnyOf(roles.into_iter().collect())
    }

    /// Evaluates the guard at `now`; a session whose access token has
    /// expired needs a new login.
    pub fn check(&self, session: &SessionState, now: DateTime<Utc>) -> Access {
        let user = match &session.user {
            Some(user) if session.is_authenticated_at(now) => user,
            _ if session.is_loading => return Access::Pending,
            _ => return Access::LoginRequired,
        };

        let allowed = match self {
            RoleGuard::Authenticated => true,
            RoleGuard::AnyOf(roles) => roles.contains(&user.role),
            RoleGuard::AtLeast(min) => user.role.at_least(*min),
        };

        if allowed {
            Access::Granted
        } else {
            Access::Forbidden
        }
    }

    pub fn permits(&self, session: &SessionState, now: DateTime<Utc>) -> bool {
        self.check(session, now) == Access::Granted
    }
}
