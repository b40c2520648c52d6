//! Response envelope shared by every backend endpoint.
//!
//! The ERP backend wraps payloads as `{ success, data, message }`. A
//! response with `success: false` is turned into a [`ClientError`] carrying
//! the server's message so it can be shown to the user verbatim.

use crate::errors::{ClientError, ClientResult};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Standard API response wrapper for all endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Indicates if the request was successful
    pub success: bool,
    /// Response data (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    /// Unwraps the payload, turning a failed envelope into an error.
    pub fn into_data(self, status: StatusCode) -> ClientResult<T> {
        if !self.success {
            return Err(ClientError::api(
                status,
                self.message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            ));
        }

        self.data
            .ok_or_else(|| ClientError::internal("Response envelope is missing data"))
    }

    /// Checks the envelope for endpoints whose payload is irrelevant.
    pub fn into_unit(self, status: StatusCode) -> ClientResult<()> {
        if self.success {
            Ok(())
        } else {
            Err(ClientError::api(
                status,
                self.message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            ))
        }
    }
}
