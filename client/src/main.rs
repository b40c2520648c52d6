//! Command-line entry point for the ERP client.
//!
//! Restores the persisted session (signing in with `ERP_USERNAME` and
//! `ERP_PASSWORD` when there is none), then keeps the unread notification
//! count fresh and logs every change until interrupted.

use anyhow::{Context, Result};
use erp_client::auth::models::LoginRequest;
use erp_client::config::Config;
use erp_client::context::ClientContext;
use erp_client::services::session_service::SessionEvent;
use std::env;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::init;

#[tokio::main]
async fn main() -> Result<()> {
    init();

    let config = Config::from_env()?;
    let context = ClientContext::init(&config)
        .await
        .context("Failed to initialise the ERP client")?;

    if !context.session.is_authenticated() {
        let username =
            env::var("ERP_USERNAME").context("No stored session and ERP_USERNAME not set")?;
        let password =
            env::var("ERP_PASSWORD").context("No stored session and ERP_PASSWORD not set")?;

        if let Err(err) = context
            .session
            .login(LoginRequest::new(username, password))
            .await
        {
            context.teardown().await;
            anyhow::bail!("Login failed: {}", err.user_message());
        }
    }

    if let Some(user) = context.session.current_user() {
        info!("Signed in as {} <{}> ({})", user.display_name, user.email, user.role);
    }

    let mut notifications = context.notifications.subscribe();
    let mut session_events = context.session.subscribe_events();
    let renew_period = config
        .token_refresh_leeway()
        .to_std()?
        .max(Duration::from_secs(2))
        / 2;
    let mut renew = tokio::time::interval(renew_period);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            changed = notifications.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = notifications.borrow_and_update().unread_count;
                info!("Unread notifications: {}", count);
            }
            event = session_events.recv() => {
                if let Ok(SessionEvent::Expired | SessionEvent::LoggedOut) = event {
                    warn!("Session ended; sign in again to resume");
                    break;
                }
            }
            _ = renew.tick() => {
                if let Err(err) = context.session.ensure_fresh_token().await {
                    warn!("Session could not be renewed: {}", err.user_message());
                    break;
                }
                if !context.session.is_authenticated() {
                    warn!("Session is no longer authenticated; sign in again to resume");
                    break;
                }
            }
        }
    }

    context.teardown().await;
    Ok(())
}
