//! Session lifecycle: bootstrap, login, logout and token renewal.
//!
//! [`SessionManager`] owns the session state and is the only writer of the
//! token store apart from the HTTP layer's 401 handling. Each operation
//! performs its I/O, then applies a [`SessionAction`] through the pure
//! reducer. Observers follow the state through a `watch` channel.
//!
//! Logout and login bump a generation counter. An operation that started
//! under an older generation drops its result instead of applying it, so a
//! response arriving after logout can never resurrect the session.

use crate::api::client::Backend;
use crate::auth::models::{LoginRequest, TokenPair, User};
use crate::errors::{ClientError, ClientResult};
use crate::repositories::token_repository::{StoredTokens, TokenStore};
use crate::services::session_state::{SessionAction, SessionState, reduce};
use crate::utils::clock::Clock;
use crate::utils::jwt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use validator::Validate;

/// Notable session changes, for consumers that react to edges rather than
/// to state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LoggedIn(User),
    LoggedOut,
    /// The session was torn down without the user asking; the UI should
    /// send the user back to the login screen.
    Expired,
}

pub struct SessionManager {
    backend: Arc<dyn Backend>,
    tokens: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    refresh_leeway: chrono::Duration,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    generation: AtomicU64,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        refresh_leeway: chrono::Duration,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let (events, _) = broadcast::channel(16);

        Self {
            backend,
            tokens,
            clock,
            refresh_leeway,
            state,
            events,
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Authenticated iff a user is held and the access token is unexpired.
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated_at(self.clock.now())
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    /// Restores a session from persisted tokens.
    ///
    /// Never fails: every problem ends in the unauthenticated state with
    /// storage cleared, and `is_loading` is always false afterwards.
    pub async fn bootstrap(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        self.dispatch(SessionAction::Started);

        let stored = match self.tokens.load() {
            Ok(stored) => stored,
            Err(err) => {
                warn!("Could not read stored tokens: {}", err);
                StoredTokens::default()
            }
        };

        if stored.is_empty() {
            debug!("No stored tokens; starting signed out");
            self.dispatch(SessionAction::Failed);
            return;
        }

        match self.restore(generation, stored).await {
            Ok((user, tokens)) => {
                if !self.is_current(generation) {
                    debug!("Discarding restored session superseded during bootstrap");
                    return;
                }
                info!("Restored session for {}", user.username);
                self.dispatch(SessionAction::Authenticated {
                    user: user.clone(),
                    tokens,
                });
                self.emit(SessionEvent::LoggedIn(user));
            }
            Err(ClientError::Superseded) => {
                debug!("Bootstrap superseded by a newer session change");
            }
            Err(err) => {
                if !self.is_current(generation) {
                    return;
                }
                warn!("Session restore failed: {}", err);
                self.clear_tokens();
                self.dispatch(SessionAction::Failed);
            }
        }
    }

    async fn restore(
        &self,
        generation: u64,
        stored: StoredTokens,
    ) -> ClientResult<(User, TokenPair)> {
        let now = self.clock.now();

        let access_valid = stored
            .access_token
            .as_deref()
            .is_some_and(|token| jwt::is_token_valid(token, now));

        let tokens = match (access_valid, stored.access_token, stored.refresh_token) {
            (true, Some(access_token), Some(refresh_token)) => TokenPair {
                access_token,
                refresh_token,
            },
            (true, Some(access_token), None) => TokenPair {
                access_token,
                refresh_token: String::new(),
            },
            (_, _, Some(refresh_token)) if jwt::is_token_valid(&refresh_token, now) => {
                debug!("Access token missing or expired; exchanging refresh token");
                self.exchange(generation, &refresh_token).await?
            }
            _ => {
                return Err(ClientError::authentication(
                    "Stored credentials have expired",
                ));
            }
        };

        let user = self.backend.current_user().await?;
        Ok((user, tokens))
    }

    /// Exchanges `refresh_token` for a new pair and persists it, unless the
    /// session changed in the meantime.
    async fn exchange(&self, generation: u64, refresh_token: &str) -> ClientResult<TokenPair> {
        let tokens = self.backend.refresh_token(refresh_token).await?;
        if !self.is_current(generation) {
            return Err(ClientError::Superseded);
        }
        self.tokens.save(&tokens)?;
        Ok(tokens)
    }

    /// Signs in with username and password.
    ///
    /// On rejection the session is unauthenticated and the returned error
    /// carries the backend's message.
    pub async fn login(&self, request: LoginRequest) -> ClientResult<User> {
        if let Err(validation_errors) = request.validate() {
            let error_messages: Vec<String> = validation_errors
                .field_errors()
                .into_iter()
                .flat_map(|(field, errors)| {
                    errors.iter().map(move |error| {
                        format!(
                            "{}: {}",
                            field,
                            error.message.as_ref().unwrap_or(&"Invalid value".into())
                        )
                    })
                })
                .collect();
            return Err(ClientError::validation(error_messages.join(", ")));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.dispatch(SessionAction::Started);

        let response = match self.backend.login(&request).await {
            Ok(response) => response,
            Err(err) => {
                if !self.is_current(generation) {
                    return Err(ClientError::Superseded);
                }
                warn!("Login failed for {}: {}", request.username, err);
                self.dispatch(SessionAction::Failed);
                return Err(match err {
                    ClientError::Api { message, .. } | ClientError::Authentication { message } => {
                        ClientError::authentication(message)
                    }
                    other => other,
                });
            }
        };

        if !self.is_current(generation) {
            debug!("Discarding login response superseded by a newer session change");
            return Err(ClientError::Superseded);
        }

        let tokens = response.tokens();
        if let Err(err) = self.tokens.save(&tokens) {
            warn!("Could not persist tokens after login: {}", err);
            self.dispatch(SessionAction::Failed);
            return Err(err);
        }

        let user = response.user;
        info!("Logged in as {} ({})", user.username, user.role);
        self.dispatch(SessionAction::Authenticated {
            user: user.clone(),
            tokens,
        });
        self.emit(SessionEvent::LoggedIn(user.clone()));
        Ok(user)
    }

    /// Signs out. The server is told on a best-effort basis; the local
    /// session and stored tokens are cleared regardless.
    pub async fn logout(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Err(err) = self.backend.logout().await {
            warn!("Server logout failed, clearing local session anyway: {}", err);
        }

        self.clear_tokens();
        self.dispatch(SessionAction::LoggedOut);
        self.emit(SessionEvent::LoggedOut);
        info!("Logged out");
    }

    /// Drops the session after the backend rejected the access token.
    pub fn handle_unauthorized(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let was_signed_in = self.state.borrow().is_signed_in();

        self.clear_tokens();
        self.dispatch(SessionAction::LoggedOut);
        if was_signed_in {
            warn!("Session rejected by the server; redirecting to login");
            self.emit(SessionEvent::Expired);
        }
    }

    /// Exchanges the stored refresh token for a new pair.
    ///
    /// If no user is held yet, the profile is fetched so that a successful
    /// refresh always ends authenticated. Any failure clears the session.
    pub async fn refresh_auth(&self) -> ClientResult<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        let now = self.clock.now();

        let refresh_token = self
            .state
            .borrow()
            .refresh_token
            .clone()
            .filter(|token| !token.is_empty())
            .or_else(|| self.tokens.load().ok().and_then(|stored| stored.refresh_token))
            .filter(|token| jwt::is_token_valid(token, now));

        let Some(refresh_token) = refresh_token else {
            self.expire("No valid refresh token available");
            return Err(ClientError::authentication("Session has expired"));
        };

        let result = async {
            let tokens = self.exchange(generation, &refresh_token).await?;
            let user = match self.current_user() {
                Some(_) => None,
                None => Some(self.backend.current_user().await?),
            };
            Ok::<_, ClientError>((tokens, user))
        }
        .await;

        if !self.is_current(generation) {
            return Err(ClientError::Superseded);
        }

        match result {
            Ok((tokens, None)) => {
                debug!("Access token refreshed");
                self.dispatch(SessionAction::TokensRefreshed(tokens));
                Ok(())
            }
            Ok((tokens, Some(user))) => {
                info!("Session re-established for {} via refresh", user.username);
                self.dispatch(SessionAction::Authenticated {
                    user: user.clone(),
                    tokens,
                });
                self.emit(SessionEvent::LoggedIn(user));
                Ok(())
            }
            Err(err) => {
                self.expire(&format!("Token refresh failed: {}", err));
                Err(err)
            }
        }
    }

    /// Refreshes the tokens if the access token expires within the
    /// configured leeway. Returns whether a refresh took place.
    pub async fn ensure_fresh_token(&self) -> ClientResult<bool> {
        let access_token = {
            let state = self.state.borrow();
            if !state.is_signed_in() {
                return Ok(false);
            }
            state.access_token.clone()
        };

        let needs_refresh = match access_token.as_deref().map(jwt::decode_claims) {
            Some(Ok(claims)) => claims.expires_within(self.clock.now(), self.refresh_leeway),
            _ => true,
        };

        if needs_refresh {
            self.refresh_auth().await?;
        }
        Ok(needs_refresh)
    }

    /// Re-fetches the profile of the signed-in user.
    pub async fn reload_user(&self) -> ClientResult<User> {
        let generation = self.generation.load(Ordering::SeqCst);
        let user = self
            .backend
            .current_user()
            .await
            .inspect_err(|err| self.on_request_error(generation, err))?;
        self.apply_user(generation, user)
    }

    /// Saves profile changes made by the user.
    pub async fn update_user(&self, user: &User) -> ClientResult<User> {
        if !self.is_authenticated() {
            return Err(ClientError::authentication("Not signed in"));
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let updated = self
            .backend
            .update_current_user(user)
            .await
            .inspect_err(|err| self.on_request_error(generation, err))?;
        self.apply_user(generation, updated)
    }

    fn apply_user(&self, generation: u64, user: User) -> ClientResult<User> {
        if !self.is_current(generation) {
            return Err(ClientError::Superseded);
        }
        self.dispatch(SessionAction::UserUpdated(user.clone()));
        Ok(user)
    }

    /// A 401 only ends the session it was issued under.
    fn on_request_error(&self, generation: u64, err: &ClientError) {
        if matches!(err, ClientError::Unauthorized) && self.is_current(generation) {
            self.handle_unauthorized();
        }
    }

    fn expire(&self, reason: &str) {
        warn!("{}; clearing session", reason);
        let was_signed_in = self.state.borrow().is_signed_in();
        self.clear_tokens();
        self.dispatch(SessionAction::LoggedOut);
        if was_signed_in {
            self.emit(SessionEvent::Expired);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn clear_tokens(&self) {
        if let Err(err) = self.tokens.clear() {
            warn!("Failed to clear stored tokens: {}", err);
        }
    }

    fn dispatch(&self, action: SessionAction) {
        debug!("Session action: {:?}", action);
        self.state.send_modify(|state| *state = reduce(state, action));
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}
