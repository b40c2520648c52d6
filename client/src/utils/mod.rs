//! Shared helpers: token inspection and time.

pub mod clock;
pub mod jwt;
