//! Collaborator seams the orchestrator calls through.
//!
//! Every implementation must tolerate repeat calls for the same user: the
//! event source delivers at least once, and a failed run is redelivered
//! from the first step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CollaboratorError;
use crate::league::LeagueEnrollment;
use crate::notifications::{DispatchReceipt, ScheduledNotification};
use crate::store::Database;

use super::model::{ContentItem, PrivateProfile};

/// Lookup of private (contact/preference) profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when no private profile exists for the user.
    async fn get_private_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<PrivateProfile>, CollaboratorError>;
}

/// League/cohort enrollment.
#[async_trait]
pub trait LeagueService: Send + Sync {
    async fn enroll(
        &self,
        db: &dyn Database,
        user_id: &str,
    ) -> Result<LeagueEnrollment, CollaboratorError>;
}

/// Templated, possibly deferred, notification dispatch.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn dispatch(
        &self,
        request: &ScheduledNotification,
    ) -> Result<DispatchReceipt, CollaboratorError>;
}

/// Ranked list of currently trending content.
#[async_trait]
pub trait TrendingService: Send + Sync {
    async fn get_trending(&self, now: DateTime<Utc>) -> Result<Vec<ContentItem>, CollaboratorError>;
}

/// Seeds a user's content feed from their declared interests.
#[async_trait]
pub trait PersonalizationService: Send + Sync {
    /// Returns the number of feed items added.
    async fn personalize(&self, user_id: &str, db: &dyn Database)
    -> Result<usize, CollaboratorError>;
}
