//! Session state and its pure transition function.
//!
//! Every change to the session goes through [`reduce`], which consumes a
//! [`SessionAction`] and returns the next [`SessionState`]. The function
//! never performs I/O, which keeps the state machine testable on its own.

use crate::auth::models::{TokenPair, User};
use crate::utils::jwt;
use chrono::{DateTime, Utc};

/// Coarse lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Bootstrap or a credential exchange is in flight with no identity held.
    Uninitialized,
    Authenticated,
    Unauthenticated,
}

/// Snapshot of the session.
///
/// There is no stored authentication flag: whether the session counts as
/// authenticated depends on the access token's expiry and therefore on the
/// time it is asked at. Use [`is_authenticated_at`](Self::is_authenticated_at).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_loading: bool,
}

impl Default for SessionState {
    /// The state at process start: empty and loading.
    fn default() -> Self {
        Self {
            user: None,
            access_token: None,
            refresh_token: None,
            is_loading: true,
        }
    }
}

impl SessionState {
    pub fn status(&self, now: DateTime<Utc>) -> SessionStatus {
        if self.is_authenticated_at(now) {
            SessionStatus::Authenticated
        } else if self.is_loading && self.user.is_none() {
            SessionStatus::Uninitialized
        } else {
            SessionStatus::Unauthenticated
        }
    }

    /// True iff a user is held and the held access token is unexpired at
    /// `now`.
    pub fn is_authenticated_at(&self, now: DateTime<Utc>) -> bool {
        self.user.is_some()
            && self
                .access_token
                .as_deref()
                .is_some_and(|token| jwt::is_token_valid(token, now))
    }

    /// True while an identity is held, even if its access token has lapsed
    /// and still awaits a refresh.
    pub fn is_signed_in(&self) -> bool {
        self.user.is_some() && self.access_token.is_some()
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access_token), Some(refresh_token)) => Some(TokenPair {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
            }),
            _ => None,
        }
    }
}

/// Transition events of the session state machine.
#[derive(Debug, Clone)]
pub enum SessionAction {
    /// A login, bootstrap or refresh round trip has started.
    Started,
    /// Credentials were accepted and the profile is known.
    Authenticated { user: User, tokens: TokenPair },
    /// A refresh produced a new pair for the same user.
    TokensRefreshed(TokenPair),
    /// The profile changed (reload or user edit).
    UserUpdated(User),
    /// A login attempt was rejected; any previous session is gone.
    Failed,
    /// Explicit or forced logout.
    LoggedOut,
}

pub fn reduce(state: &SessionState, action: SessionAction) -> SessionState {
    match action {
        SessionAction::Started => SessionState {
            is_loading: true,
            ..state.clone()
        },
        SessionAction::Authenticated { user, tokens } => SessionState {
            user: Some(user),
            access_token: Some(tokens.access_token),
            refresh_token: Some(tokens.refresh_token),
            is_loading: false,
        },
        SessionAction::TokensRefreshed(tokens) => SessionState {
            user: state.user.clone(),
            access_token: Some(tokens.access_token),
            refresh_token: Some(tokens.refresh_token),
            is_loading: false,
        },
        SessionAction::UserUpdated(user) => {
            if !state.is_signed_in() {
                return state.clone();
            }
            SessionState {
                user: Some(user),
                ..state.clone()
            }
        }
        SessionAction::Failed | SessionAction::LoggedOut => SessionState {
            user: None,
            access_token: None,
            refresh_token: None,
            is_loading: false,
        },
    }
}
