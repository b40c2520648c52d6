//! Module for the stateful client services.
//!
//! This module holds the session state machine and its manager, the
//! notification poller, and the scheduler that drives background refreshes.

pub mod notification_service;
pub mod scheduler;
pub mod session_service;
pub mod session_state;
