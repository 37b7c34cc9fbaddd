//! Onboarding orchestrator: welcome sequence for newly created users.

pub mod clock;
pub mod config;
pub mod content;
pub mod directory;
pub mod error;
pub mod league;
pub mod notifications;
pub mod onboarding;
pub mod store;
