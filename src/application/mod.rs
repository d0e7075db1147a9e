//! Application Layer
//!
//! Use cases exposed to the request router.

mod sticky_session_service;

pub use sticky_session_service::{StickySessionService, StickySettings};
