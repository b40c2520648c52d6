//! In-memory collaborators for unit tests.

use crate::api::client::Backend;
use crate::api::models::{Notification, NotificationType};
use crate::auth::models::{LoginRequest, LoginResponse, TokenPair, User, UserRole};
use crate::errors::{ClientError, ClientResult};
use crate::services::scheduler::{Scheduler, Tick, TimerId};
use crate::utils::clock::Clock;
use crate::utils::jwt::Claims;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

static TOKEN_SERIAL: AtomicI64 = AtomicI64::new(1);

/// Mints a signed JWT expiring at `exp`. Every call yields a distinct token.
pub fn mint_token(sub: &str, exp: DateTime<Utc>) -> String {
    let claims = Claims {
        sub: Some(sub.to_string()),
        role: None,
        exp: Some(exp.timestamp()),
        iat: Some(TOKEN_SERIAL.fetch_add(1, Ordering::Relaxed)),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

pub fn sample_user() -> User {
    User {
        id: 7,
        username: "jdoe".to_string(),
        display_name: "Jane Doe".to_string(),
        email: "jdoe@example.com".to_string(),
        role: UserRole::Admin,
        department_id: Some(3),
        department_name: Some("Finance".to_string()),
        company_id: None,
        company_name: None,
    }
}

pub fn sample_notification(id: i64) -> Notification {
    Notification {
        id,
        title: format!("Notification {}", id),
        message: "Purchase order awaiting approval".to_string(),
        notification_type: NotificationType::Info,
        is_read: false,
        action_url: Some(format!("/purchasing/orders/{}", id)),
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        read_at: None,
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Scheduler whose timers fire only when [`fire`](Self::fire) is called.
#[derive(Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    timers: Mutex<HashMap<TimerId, (std::time::Duration, Tick)>>,
}

impl ManualScheduler {
    pub fn active_timers(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    pub fn period_of_active(&self) -> Option<std::time::Duration> {
        self.timers
            .lock()
            .unwrap()
            .values()
            .next()
            .map(|(period, _)| *period)
    }

    /// Runs one tick of every active timer.
    pub async fn fire(&self) {
        let ticks: Vec<Tick> = self
            .timers
            .lock()
            .unwrap()
            .values()
            .map(|(_, tick)| tick.clone())
            .collect();
        for tick in ticks {
            tick().await;
        }
    }
}

impl Scheduler for ManualScheduler {
    fn start(&self, period: std::time::Duration, tick: Tick) -> ClientResult<TimerId> {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.timers.lock().unwrap().insert(id, (period, tick));
        Ok(id)
    }

    fn stop(&self, id: TimerId) {
        self.timers.lock().unwrap().remove(&id);
    }
}

/// Backend double. Accepts `jdoe`/`secret`; everything else is rejected
/// with the message a real server sends.
pub struct MockBackend {
    clock: Arc<dyn Clock>,
    unread: Mutex<Vec<Notification>>,
    next_notification_id: AtomicI64,
    login_gate: Mutex<Option<Arc<Notify>>>,
    profile_gate: Mutex<Option<Arc<Notify>>>,
    fail_profile: AtomicBool,
    unauthorized_profile: AtomicBool,
    fail_refresh: AtomicBool,
    fail_logout: AtomicBool,
    fail_count: AtomicBool,
    fail_mutations: AtomicBool,
    login_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    count_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            unread: Mutex::new(Vec::new()),
            next_notification_id: AtomicI64::new(1000),
            login_gate: Mutex::new(None),
            profile_gate: Mutex::new(None),
            fail_profile: AtomicBool::new(false),
            unauthorized_profile: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
            fail_logout: AtomicBool::new(false),
            fail_count: AtomicBool::new(false),
            fail_mutations: AtomicBool::new(false),
            login_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_unread(&self, unread: Vec<Notification>) {
        *self.unread.lock().unwrap() = unread;
    }

    /// Makes the next logins wait until the returned handle is notified.
    pub fn hold_login(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Makes the next profile fetches wait until the handle is notified.
    pub fn hold_profile(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.profile_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_profile(&self, fail: bool) {
        self.fail_profile.store(fail, Ordering::SeqCst);
    }

    pub fn reject_profile_as_unauthorized(&self, reject: bool) {
        self.unauthorized_profile.store(reject, Ordering::SeqCst);
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    pub fn fail_logout(&self, fail: bool) {
        self.fail_logout.store(fail, Ordering::SeqCst);
    }

    pub fn fail_count(&self, fail: bool) {
        self.fail_count.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    fn issue_tokens(&self) -> TokenPair {
        let now = self.clock.now();
        TokenPair {
            access_token: mint_token("jdoe", now + Duration::minutes(15)),
            refresh_token: mint_token("jdoe", now + Duration::days(7)),
        }
    }

    fn check_mutation(&self) -> ClientResult<()> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(ClientError::network("Connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.login_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if request.username != "jdoe" || request.password != "secret" {
            return Err(ClientError::api(
                StatusCode::UNAUTHORIZED,
                "Invalid username or password",
            ));
        }

        let tokens = self.issue_tokens();
        Ok(LoginResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user: sample_user(),
        })
    }

    async fn logout(&self) -> ClientResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(ClientError::network("Could not connect to the ERP server"));
        }
        Ok(())
    }

    async fn refresh_token(&self, _refresh_token: &str) -> ClientResult<TokenPair> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ClientError::api(
                StatusCode::UNAUTHORIZED,
                "Refresh token is invalid or expired",
            ));
        }
        Ok(self.issue_tokens())
    }

    async fn current_user(&self) -> ClientResult<User> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.profile_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.unauthorized_profile.load(Ordering::SeqCst) {
            return Err(ClientError::Unauthorized);
        }
        if self.fail_profile.load(Ordering::SeqCst) {
            return Err(ClientError::api(
                StatusCode::INTERNAL_SERVER_ERROR,
                "User lookup failed",
            ));
        }
        Ok(sample_user())
    }

    async fn update_current_user(&self, user: &User) -> ClientResult<User> {
        self.check_mutation()?;
        Ok(user.clone())
    }

    async fn unread_count(&self) -> ClientResult<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_count.load(Ordering::SeqCst) {
            return Err(ClientError::network("Request timed out"));
        }
        Ok(self.unread.lock().unwrap().len() as u64)
    }

    async fn unread_notifications(&self) -> ClientResult<Vec<Notification>> {
        Ok(self.unread.lock().unwrap().clone())
    }

    async fn mark_as_read(&self, id: i64) -> ClientResult<()> {
        self.check_mutation()?;
        self.unread.lock().unwrap().retain(|n| n.id != id);
        Ok(())
    }

    async fn mark_all_as_read(&self) -> ClientResult<()> {
        self.check_mutation()?;
        self.unread.lock().unwrap().clear();
        Ok(())
    }

    async fn delete_notification(&self, id: i64) -> ClientResult<()> {
        self.check_mutation()?;
        self.unread.lock().unwrap().retain(|n| n.id != id);
        Ok(())
    }

    async fn create_test_notification(&self) -> ClientResult<Notification> {
        self.check_mutation()?;
        let id = self.next_notification_id.fetch_add(1, Ordering::SeqCst);
        let mut notification = sample_notification(id);
        notification.title = "Test notification".to_string();
        notification.created_at = self.clock.now();
        self.unread.lock().unwrap().push(notification.clone());
        Ok(notification)
    }
}
