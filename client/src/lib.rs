//! Client-side session and notification core of the ERP web application.
//!
//! The crate restores and maintains an authenticated session against the
//! ERP backend (JWT access/refresh tokens persisted between runs) and keeps
//! the user's unread-notification count fresh while the UI is visible.
//! Everything is reached through an explicitly constructed
//! [`context::ClientContext`].

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod errors;
pub mod repositories;
pub mod services;
pub mod utils;

#[cfg(test)]
mod testing;

pub use context::ClientContext;
pub use errors::{ClientError, ClientResult};
