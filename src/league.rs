//! League cohort enrollment.
//!
//! Leagues run in monthly seasons. A new user joins the lowest division of
//! the current season, in the first cohort that still has room; when every
//! cohort is full a new one is opened. Enrolling an already-enrolled user
//! returns the existing membership, so redelivered events are harmless.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::LeagueConfig;
use crate::error::CollaboratorError;
use crate::onboarding::services::LeagueService;
use crate::store::Database;

/// Division every new user starts in.
pub const ENTRY_DIVISION: u32 = 1;

/// A user's seat in a league season.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueMembership {
    pub season: u32,
    pub division: u32,
    pub cohort: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Result of an enrollment call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeagueEnrollment {
    pub membership: LeagueMembership,
    /// `false` when the user was already enrolled this season.
    pub newly_enrolled: bool,
}

/// Season number for `at`, counting the epoch month as season 1.
/// Instants before the epoch map to season 1.
pub fn season_at(config: &LeagueConfig, at: DateTime<Utc>) -> u32 {
    let months = (at.year() - config.season_epoch_year) * 12 + at.month() as i32
        - config.season_epoch_month as i32;
    (months.max(0) + 1) as u32
}

/// Pick a cohort with room, or name a new one.
fn choose_cohort(sizes: &[(String, i64)], capacity: i64) -> String {
    sizes
        .iter()
        .find(|(_, count)| *count < capacity)
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| format!("cohort-{}", sizes.len() + 1))
}

/// Enrolls users through the `Database` handle passed by the orchestrator.
pub struct CohortEnroller {
    config: LeagueConfig,
    clock: Arc<dyn Clock>,
}

impl CohortEnroller {
    pub fn new(config: LeagueConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }
}

#[async_trait]
impl LeagueService for CohortEnroller {
    async fn enroll(
        &self,
        db: &dyn Database,
        user_id: &str,
    ) -> Result<LeagueEnrollment, CollaboratorError> {
        let now = self.clock.now();
        let season = season_at(&self.config, now);

        if let Some(existing) = db.get_league_membership(season, user_id).await? {
            debug!(user_id, season, cohort = %existing.cohort, "Already enrolled");
            return Ok(LeagueEnrollment {
                membership: existing,
                newly_enrolled: false,
            });
        }

        let sizes = db.cohort_sizes(season, ENTRY_DIVISION).await?;
        let membership = LeagueMembership {
            season,
            division: ENTRY_DIVISION,
            cohort: choose_cohort(&sizes, self.config.cohort_capacity),
            user_id: user_id.to_string(),
            created_at: now,
        };

        if !db.insert_league_membership(&membership).await? {
            // Lost a race with a concurrent delivery of the same event.
            let existing = db
                .get_league_membership(season, user_id)
                .await?
                .ok_or_else(|| CollaboratorError::Rejected {
                    service: "league".to_string(),
                    user_id: user_id.to_string(),
                    reason: format!("membership for season {season} vanished after conflict"),
                })?;
            return Ok(LeagueEnrollment {
                membership: existing,
                newly_enrolled: false,
            });
        }

        info!(
            user_id,
            season,
            cohort = %membership.cohort,
            "Enrolled user in league"
        );
        Ok(LeagueEnrollment {
            membership,
            newly_enrolled: true,
        })
    }
}
