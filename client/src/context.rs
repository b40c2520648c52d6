//! Explicitly constructed client context.
//!
//! [`ClientContext`] wires the backend, token store, session manager and
//! notification poller together and owns the background tasks that couple
//! them. It is created with [`ClientContext::init`] (or
//! [`ClientContext::from_parts`]) and must be shut down with
//! [`ClientContext::teardown`].

use crate::api::client::{Backend, HttpBackend};
use crate::config::Config;
use crate::errors::ClientResult;
use crate::repositories::token_repository::{FileTokenStore, TokenStore};
use crate::services::notification_service::{NotificationPoller, Visibility};
use crate::services::scheduler::{Scheduler, TokioScheduler};
use crate::services::session_service::SessionManager;
use crate::utils::clock::{Clock, SystemClock};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct ClientContext {
    pub session: Arc<SessionManager>,
    pub notifications: Arc<NotificationPoller>,
    visibility: watch::Sender<Visibility>,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientContext {
    /// Builds the production stack from `config` and restores any persisted
    /// session.
    pub async fn init(config: &Config) -> ClientResult<Self> {
        let tokens: Arc<dyn TokenStore> =
            Arc::new(FileTokenStore::new(config.token_store_path.clone()));
        let http = Arc::new(HttpBackend::new(config, tokens.clone())?);
        let unauthorized = http.subscribe_unauthorized();

        let context = Self::from_parts(
            config,
            http,
            tokens,
            Arc::new(SystemClock),
            Arc::new(TokioScheduler::new()),
            Some(unauthorized),
        );

        info!("Restoring session from {}", config.token_store_path.display());
        context.session.bootstrap().await;
        Ok(context)
    }

    /// Wires the given collaborators and spawns the coordination tasks.
    /// Must be called inside a tokio runtime. Does not bootstrap.
    pub fn from_parts(
        config: &Config,
        backend: Arc<dyn Backend>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        unauthorized: Option<broadcast::Receiver<()>>,
    ) -> Self {
        let session = Arc::new(SessionManager::new(
            backend.clone(),
            tokens,
            clock.clone(),
            config.token_refresh_leeway(),
        ));
        let notifications = Arc::new(NotificationPoller::new(
            backend,
            scheduler,
            clock,
            config.poll_interval(),
        ));
        let (visibility, visibility_rx) = watch::channel(Visibility::Visible);

        let mut tasks = vec![tokio::spawn(
            notifications.clone().run(session.subscribe(), visibility_rx),
        )];

        if let Some(mut unauthorized) = unauthorized {
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    match unauthorized.recv().await {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            session.handle_unauthorized()
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        Self {
            session,
            notifications,
            visibility,
            tasks,
        }
    }

    /// Reports whether the UI is shown; polling pauses while hidden.
    pub fn set_visibility(&self, visibility: Visibility) {
        debug!("Visibility changed to {:?}", visibility);
        self.visibility.send_replace(visibility);
    }

    /// Stops background work. The persisted session is kept.
    pub async fn teardown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        self.notifications.stop_polling();
        info!("Client context torn down");
    }
}
