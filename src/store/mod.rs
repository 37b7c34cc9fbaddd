//! Persistence layer: libSQL-backed storage for users, profiles, league
//! memberships, queued notifications, contracts, feeds, and onboarding runs.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, OnboardingRun, RunStatus};
