//! JWT inspection utilities for the client side of authentication.
//!
//! The client never holds the signing secret, so tokens are decoded without
//! signature verification. The only thing trusted from the claims is the
//! expiry, which decides whether a stored token is worth presenting.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::ClientError;

/// Claims read from an access or refresh token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user identifier or username)
    #[serde(default)]
    pub sub: Option<String>,
    /// User role, when the issuer embeds it
    #[serde(default)]
    pub role: Option<String>,
    /// Token expiration timestamp
    #[serde(default)]
    pub exp: Option<i64>,
    /// Token issued at timestamp
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Decodes a token's claims without verifying its signature.
pub fn decode_claims(token: &str) -> Result<Claims, ClientError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|token_data| token_data.claims)
        .map_err(|e| ClientError::invalid_token(format!("Token decoding failed: {}", e)))
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Check if token has expired. Tokens without an expiry are treated as
    /// expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }

    /// Check if the token expires within `leeway` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        self.is_expired(now + leeway)
    }
}

/// Whether `token` decodes and carries an expiry strictly after `now`.
pub fn is_token_valid(token: &str, now: DateTime<Utc>) -> bool {
    match decode_claims(token) {
        Ok(claims) => !claims.is_expired(now),
        Err(_) => false,
    }
}
