//! Client-wide error types.
//!
//! Every fallible operation in the crate returns a [`ClientError`]. The
//! variants follow the error taxonomy of the session core: authentication
//! failures, transient network/background failures, and contract
//! violations that indicate a bug in the caller.

use reqwest::StatusCode;
use thiserror::Error;

/// Generic client error used across the session and notification services.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Bad credentials or a rejected/expired credential exchange.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The backend answered 401; stored tokens have already been cleared.
    #[error("Unauthorized: session is no longer valid")]
    Unauthorized,

    /// The backend answered with a non-success envelope or status.
    #[error("API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Invalid token: {message}")]
    InvalidToken { message: String },

    #[error("Token storage error: {source}")]
    Storage {
        #[from]
        source: anyhow::Error,
    },

    /// A logout or newer login happened while this request was in flight;
    /// its result was discarded.
    #[error("Request superseded by a newer session change")]
    Superseded,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn api(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Message suitable for showing to the user.
    ///
    /// For backend-originated failures this is the server's own message,
    /// without the variant prefix added by `Display`.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message }
            | Self::Authentication { message }
            | Self::Api { message, .. }
            | Self::Network { message }
            | Self::InvalidToken { message }
            | Self::Internal { message } => message.clone(),
            Self::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
            Self::Superseded => "The session changed before the request completed.".to_string(),
            Self::Storage { source } => source.to_string(),
        }
    }

    /// Whether this error means the stored credentials are no longer usable.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized | Self::Authentication { .. } | Self::InvalidToken { .. }
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        let message = match &err {
            e if e.is_timeout() => "Request timed out".to_string(),
            e if e.is_connect() => "Could not connect to the ERP server".to_string(),
            _ => format!("Request failed: {}", err),
        };
        Self::Network { message }
    }
}
