//! Access to the ERP backend's REST API.
//!
//! Holds the response envelope, the notification payloads and the
//! [`Backend`](client::Backend) seam with its HTTP implementation.

pub mod client;
pub mod common;
pub mod models;
