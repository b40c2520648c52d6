//! Notification poller and read-state mutations.
//!
//! Keeps an approximate unread count fresh in the background and caches the
//! unread items fetched on demand. The count always comes from the server:
//! every mutation is followed by a resync rather than local arithmetic.

use crate::api::client::Backend;
use crate::api::models::Notification;
use crate::errors::{ClientError, ClientResult};
use crate::services::scheduler::{Scheduler, Tick, TimerId};
use crate::services::session_state::SessionState;
use crate::utils::clock::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Whether the UI is currently shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationState {
    pub unread_count: u64,
    /// Unread items from the last explicit fetch.
    pub unread: Vec<Notification>,
}

pub struct NotificationPoller {
    backend: Arc<dyn Backend>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    period: Duration,
    state: watch::Sender<NotificationState>,
    timer: Mutex<Option<TimerId>>,
    /// Bumped on reset so refreshes issued before a logout are dropped.
    epoch: AtomicU64,
    /// Session followed by [`run`](Self::run); ticks consult it so polling
    /// ends when the access token lapses without any session change.
    session: Mutex<Option<watch::Receiver<SessionState>>>,
}

impl NotificationPoller {
    pub fn new(
        backend: Arc<dyn Backend>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        let (state, _) = watch::channel(NotificationState::default());
        Self {
            backend,
            scheduler,
            clock,
            period,
            state,
            timer: Mutex::new(None),
            epoch: AtomicU64::new(0),
            session: Mutex::new(None),
        }
    }

    pub fn unread_count(&self) -> u64 {
        self.state.borrow().unread_count
    }

    pub fn cached_unread(&self) -> Vec<Notification> {
        self.state.borrow().unread.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationState> {
        self.state.subscribe()
    }

    pub fn is_polling(&self) -> bool {
        self.timer.lock().map(|timer| timer.is_some()).unwrap_or(false)
    }

    /// Fetches the unread count. Failures are logged and the last known
    /// count is kept. Returns the count held afterwards.
    pub async fn refresh_notifications(&self) -> u64 {
        let epoch = self.epoch.load(Ordering::SeqCst);

        match self.backend.unread_count().await {
            Ok(count) => {
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    debug!("Dropping unread count fetched before reset");
                } else {
                    self.state.send_if_modified(|state| {
                        let changed = state.unread_count != count;
                        state.unread_count = count;
                        changed
                    });
                }
            }
            Err(err) => warn!("Failed to refresh unread notifications: {}", err),
        }

        self.unread_count()
    }

    /// Fetches the unread items and replaces the local cache.
    pub async fn fetch_unread(&self) -> ClientResult<Vec<Notification>> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let unread = self.backend.unread_notifications().await?;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(ClientError::Superseded);
        }
        self.state.send_modify(|state| state.unread = unread.clone());
        Ok(unread)
    }

    pub async fn mark_as_read(&self, id: i64) -> ClientResult<()> {
        let now = self.clock.now();
        self.state.send_modify(|state| {
            if let Some(notification) = state.unread.iter_mut().find(|n| n.id == id) {
                notification.mark_read(now);
            }
            state.unread.retain(|n| !n.is_read);
        });

        let result = self.backend.mark_as_read(id).await;
        self.refresh_notifications().await;
        result
    }

    pub async fn mark_all_as_read(&self) -> ClientResult<()> {
        self.state.send_modify(|state| state.unread.clear());

        let result = self.backend.mark_all_as_read().await;
        self.refresh_notifications().await;
        result
    }

    pub async fn delete_notification(&self, id: i64) -> ClientResult<()> {
        self.state
            .send_modify(|state| state.unread.retain(|n| n.id != id));

        let result = self.backend.delete_notification(id).await;
        self.refresh_notifications().await;
        result
    }

    /// Asks the backend to emit a test notification for the current user.
    pub async fn create_test_notification(&self) -> ClientResult<Notification> {
        let result = self.backend.create_test_notification().await;
        self.refresh_notifications().await;
        result
    }

    /// Starts the repeating refresh and fires one refresh immediately.
    /// Does nothing if polling is already active.
    pub async fn start_polling(self: &Arc<Self>) -> ClientResult<()> {
        {
            let mut timer = self
                .timer
                .lock()
                .map_err(|_| ClientError::internal("Poller timer lock poisoned"))?;
            if timer.is_some() {
                return Ok(());
            }
            let id = self.scheduler.start(self.period, self.tick())?;
            *timer = Some(id);
        }

        info!("Notification polling started (every {:?})", self.period);
        self.refresh_notifications().await;
        Ok(())
    }

    pub fn stop_polling(&self) {
        let id = match self.timer.lock() {
            Ok(mut timer) => timer.take(),
            Err(_) => None,
        };
        if let Some(id) = id {
            self.scheduler.stop(id);
            info!("Notification polling stopped");
        }
    }

    /// Stops polling and forgets everything known about the previous user.
    pub fn reset(&self) {
        self.stop_polling();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(NotificationState::default());
    }

    /// Aligns polling with the session and visibility: poll only while
    /// authenticated and visible, and reset when signed out.
    pub async fn sync(self: &Arc<Self>, authenticated: bool, visibility: Visibility) -> ClientResult<()> {
        match (authenticated, visibility) {
            (false, _) => {
                if self.is_polling() || self.unread_count() != 0 {
                    debug!("Session ended; resetting notifications");
                }
                self.reset();
                Ok(())
            }
            (true, Visibility::Hidden) => {
                self.stop_polling();
                Ok(())
            }
            (true, Visibility::Visible) => self.start_polling().await,
        }
    }

    /// Drives [`sync`](Self::sync) from the session and visibility channels
    /// until both senders are dropped.
    pub async fn run(
        self: Arc<Self>,
        mut session: watch::Receiver<SessionState>,
        mut visibility: watch::Receiver<Visibility>,
    ) {
        let mut session_open = true;
        let mut visibility_open = true;
        if let Ok(mut followed) = self.session.lock() {
            *followed = Some(session.clone());
        }

        loop {
            let authenticated = session
                .borrow_and_update()
                .is_authenticated_at(self.clock.now());
            let visible = *visibility.borrow_and_update();
            if let Err(err) = self.sync(authenticated, visible).await {
                warn!("Failed to update notification polling: {}", err);
            }

            tokio::select! {
                changed = session.changed(), if session_open => {
                    session_open = changed.is_ok();
                }
                changed = visibility.changed(), if visibility_open => {
                    visibility_open = changed.is_ok();
                }
                else => break,
            }
        }

        self.stop_polling();
    }

    /// Whether the followed session is no longer authenticated at the
    /// current time. False when no session is followed.
    fn session_lapsed(&self) -> bool {
        let now = self.clock.now();
        match self.session.lock() {
            Ok(followed) => followed
                .as_ref()
                .is_some_and(|session| !session.borrow().is_authenticated_at(now)),
            Err(_) => false,
        }
    }

    async fn on_tick(&self) {
        if self.session_lapsed() {
            info!("Access token expired; stopping notification polling");
            self.reset();
            return;
        }
        self.refresh_notifications().await;
    }

    fn tick(self: &Arc<Self>) -> Tick {
        let poller: Weak<Self> = Arc::downgrade(self);
        Arc::new(move || {
            let poller = poller.clone();
            Box::pin(async move {
                if let Some(poller) = poller.upgrade() {
                    poller.on_tick().await;
                }
            })
        })
    }
}
