//! `Database` trait: single async interface for all persistence.
//!
//! The store-backed collaborators (directory, league, outbox, trending,
//! personalizer) and the event consumer all go through this trait, so tests
//! can run against an in-memory libSQL backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::content::FeedItem;
use crate::error::DatabaseError;
use crate::league::LeagueMembership;
use crate::notifications::ScheduledNotification;
use crate::onboarding::model::{ContentItem, PrivateProfile, UserEntity};

/// Status of one onboarding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown run status: {s}")),
        }
    }
}

/// Audit record of one delivery attempt of a user-created event.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardingRun {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: String,
    pub attempt: u32,
    pub status: RunStatus,
    /// Terminal outcome on success (`profile_missing`, `blackout`, `completed`).
    pub outcome: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    async fn upsert_user(&self, user: &UserEntity) -> Result<(), DatabaseError>;

    async fn get_user(&self, id: &str) -> Result<Option<UserEntity>, DatabaseError>;

    async fn upsert_private_profile(&self, profile: &PrivateProfile) -> Result<(), DatabaseError>;

    async fn get_private_profile(&self, id: &str) -> Result<Option<PrivateProfile>, DatabaseError>;

    // ── Leagues ─────────────────────────────────────────────────────

    /// The user's membership for `season`, if any.
    async fn get_league_membership(
        &self,
        season: u32,
        user_id: &str,
    ) -> Result<Option<LeagueMembership>, DatabaseError>;

    /// Member count per cohort in a season/division, ordered by cohort name.
    async fn cohort_sizes(
        &self,
        season: u32,
        division: u32,
    ) -> Result<Vec<(String, i64)>, DatabaseError>;

    /// Insert a membership. Returns `false` if the user already has one
    /// for that season.
    async fn insert_league_membership(
        &self,
        membership: &LeagueMembership,
    ) -> Result<bool, DatabaseError>;

    // ── Notifications ───────────────────────────────────────────────

    /// Queue a notification. Returns `false` if one of the same kind is
    /// already queued for the user.
    async fn insert_scheduled_notification(
        &self,
        notification: &ScheduledNotification,
    ) -> Result<bool, DatabaseError>;

    /// All queued notifications for a user, ordered by delivery time.
    async fn list_notifications_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ScheduledNotification>, DatabaseError>;

    // ── Contracts ───────────────────────────────────────────────────

    async fn upsert_contract(&self, contract: &ContentItem) -> Result<(), DatabaseError>;

    /// Public, unresolved contracts open at `now`, most popular first.
    async fn list_open_contracts(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>, DatabaseError>;

    // ── Feed ────────────────────────────────────────────────────────

    /// Insert feed items, skipping any already present. Returns the number
    /// inserted.
    async fn insert_feed_items(&self, items: &[FeedItem]) -> Result<usize, DatabaseError>;

    /// A user's feed, highest score first.
    async fn list_feed(&self, user_id: &str) -> Result<Vec<FeedItem>, DatabaseError>;

    // ── Onboarding runs ─────────────────────────────────────────────

    async fn create_onboarding_run(&self, run: &OnboardingRun) -> Result<(), DatabaseError>;

    async fn complete_onboarding_run(
        &self,
        id: Uuid,
        status: RunStatus,
        outcome: Option<&str>,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Runs for a user, oldest first.
    async fn list_onboarding_runs(&self, user_id: &str) -> Result<Vec<OnboardingRun>, DatabaseError>;
}
