//! Persistence of client-side state between runs.

pub mod token_repository;
