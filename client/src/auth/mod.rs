//! Authentication data types and role-based UI guards.

pub mod guard;
pub mod models;
