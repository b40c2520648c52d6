//! Central module for client configuration settings.
//!
//! This module loads the backend location, HTTP timeout, polling cadence,
//! token renewal window and the path of the durable token file from the
//! environment (optionally seeded by a `.env` file).

use anyhow::{Context, Result};
use expanduser::expanduser;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Token file location used when `ERP_TOKEN_STORE_PATH` is not set.
pub const DEFAULT_TOKEN_STORE_PATH: &str = "~/.erp-client/tokens.json";

/// [`DEFAULT_TOKEN_STORE_PATH`] with `~` expanded. Falls back to a path
/// relative to the working directory when no home directory is known.
pub fn default_token_store_path() -> PathBuf {
    expanduser(DEFAULT_TOKEN_STORE_PATH)
        .unwrap_or_else(|_| PathBuf::from(".erp-client/tokens.json"))
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub http_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    pub token_refresh_leeway_seconds: u64,
    pub token_store_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base_url: "http://localhost:8080".to_string(),
            http_timeout_seconds: 10,
            poll_interval_seconds: 30,
            token_refresh_leeway_seconds: 60,
            token_store_path: default_token_store_path(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_base_url = env::var("ERP_API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        let http_timeout_seconds = env::var("ERP_HTTP_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()
            .context("ERP_HTTP_TIMEOUT_SECONDS must be a valid number")?;

        let poll_interval_seconds = env::var("ERP_POLL_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("ERP_POLL_INTERVAL_SECONDS must be a valid number")?;

        if poll_interval_seconds == 0 {
            anyhow::bail!("ERP_POLL_INTERVAL_SECONDS must be greater than zero");
        }

        let token_refresh_leeway_seconds = env::var("ERP_TOKEN_REFRESH_LEEWAY_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("ERP_TOKEN_REFRESH_LEEWAY_SECONDS must be a valid number")?;

        let token_store_path = match env::var("ERP_TOKEN_STORE_PATH") {
            Ok(raw_path) => expanduser(&raw_path).with_context(|| {
                format!("ERP_TOKEN_STORE_PATH is not a valid path: {}", raw_path)
            })?,
            Err(_) => default_token_store_path(),
        };

        Ok(Config {
            api_base_url,
            http_timeout_seconds,
            poll_interval_seconds,
            token_refresh_leeway_seconds,
            token_store_path,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn token_refresh_leeway(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_refresh_leeway_seconds as i64)
    }
}
