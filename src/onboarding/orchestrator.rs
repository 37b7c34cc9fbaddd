//! Onboarding orchestrator: the per-user welcome sequence.
//!
//! One run per created user, strictly sequential:
//!
//! 1. private profile lookup (missing profile ends the run successfully)
//! 2. league enrollment
//! 3. welcome notification, delivered now
//! 4. personal follow-up, +48h
//! 5. creator guide, +96h
//! 6. weekly blackout gate (active window ends the run successfully)
//! 7. trending content fetch
//! 8. interesting-markets digest carrying the trending list, +24h
//! 9. feed personalization
//!
//! The clock is read once per run; every delivery time and the gate are
//! derived from that instant. Any collaborator failure aborts the run and
//! is returned as [`Error::Step`] so the caller can redeliver.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::{ContentConfig, LeagueConfig, OrchestratorConfig};
use crate::content::{FeedPersonalizer, StoreTrending};
use crate::directory::StoreDirectory;
use crate::error::{CollaboratorError, Error, Result};
use crate::league::CohortEnroller;
use crate::notifications::{
    DispatchReceipt, Notification, OutboxNotifier, Recipient, ScheduledNotification,
};
use crate::store::Database;

use super::blackout::BlackoutWindow;
use super::model::UserEntity;
use super::services::{
    LeagueService, NotificationService, PersonalizationService, TrendingService, UserDirectory,
};

/// The steps of an onboarding run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ProfileLookup,
    Enrollment,
    Welcome,
    PersonalFollowup,
    CreatorGuide,
    BlackoutGate,
    Trending,
    InterestingMarkets,
    Personalization,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProfileLookup => "profile_lookup",
            Self::Enrollment => "enrollment",
            Self::Welcome => "welcome",
            Self::PersonalFollowup => "personal_followup",
            Self::CreatorGuide => "creator_guide",
            Self::BlackoutGate => "blackout_gate",
            Self::Trending => "trending",
            Self::InterestingMarkets => "interesting_markets",
            Self::Personalization => "personalization",
        };
        write!(f, "{s}")
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingOutcome {
    /// No private profile exists; nothing was done.
    ProfileMissing,
    /// The weekly blackout window cut the run after the gate.
    Blackout,
    /// Every step ran.
    Completed,
}

impl std::fmt::Display for OnboardingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProfileMissing => write!(f, "profile_missing"),
            Self::Blackout => write!(f, "blackout"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnboardingReport {
    pub user_id: String,
    /// The single clock sample every offset was computed from.
    pub invoked_at: DateTime<Utc>,
    pub outcome: OnboardingOutcome,
    /// Steps that completed, in order.
    pub steps: Vec<Step>,
}

/// Collaborators and shared handles for the orchestrator.
#[derive(Clone)]
pub struct OnboardingDeps {
    pub directory: Arc<dyn UserDirectory>,
    pub league: Arc<dyn LeagueService>,
    pub notifier: Arc<dyn NotificationService>,
    pub trending: Arc<dyn TrendingService>,
    pub personalizer: Arc<dyn PersonalizationService>,
    /// Store handle passed to enrollment and personalization.
    pub db: Arc<dyn Database>,
    pub clock: Arc<dyn Clock>,
}

impl OnboardingDeps {
    /// Wire every collaborator to the given store.
    pub fn store_backed(
        db: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
        league: LeagueConfig,
        content: ContentConfig,
    ) -> Self {
        Self {
            directory: Arc::new(StoreDirectory::new(Arc::clone(&db))),
            league: Arc::new(CohortEnroller::new(league, Arc::clone(&clock))),
            notifier: Arc::new(OutboxNotifier::new(Arc::clone(&db))),
            trending: Arc::new(StoreTrending::new(Arc::clone(&db), &content)),
            personalizer: Arc::new(FeedPersonalizer::new(content, Arc::clone(&clock))),
            db,
            clock,
        }
    }
}

/// Runs the onboarding sequence for one user at a time. Holds no per-run
/// state, so one instance serves any number of concurrent runs.
pub struct Orchestrator {
    config: OrchestratorConfig,
    blackout: BlackoutWindow,
    deps: OnboardingDeps,
}

/// Per-run bookkeeping.
struct Run {
    user_id: String,
    now: DateTime<Utc>,
    steps: Vec<Step>,
}

impl Run {
    fn finish(self, outcome: OnboardingOutcome) -> OnboardingReport {
        OnboardingReport {
            user_id: self.user_id,
            invoked_at: self.now,
            outcome,
            steps: self.steps,
        }
    }

    /// Await a collaborator call, recording the step on success and tagging
    /// the error with it on failure.
    async fn attempt<T, F>(&mut self, step: Step, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, CollaboratorError>>,
    {
        match call.await {
            Ok(value) => {
                self.steps.push(step);
                Ok(value)
            }
            Err(source) => {
                warn!(user_id = %self.user_id, step = %step, error = %source, "Onboarding step failed");
                Err(Error::Step { step, source })
            }
        }
    }
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, deps: OnboardingDeps) -> Self {
        let blackout = BlackoutWindow::new(config.blackout_last_monday_hour);
        Self {
            config,
            blackout,
            deps,
        }
    }

    /// Run the full sequence for a newly created user.
    pub async fn run(&self, user: &UserEntity) -> Result<OnboardingReport> {
        let mut run = Run {
            user_id: user.id.clone(),
            now: self.deps.clock.now(),
            steps: Vec::with_capacity(9),
        };
        let now = run.now;

        let profile = run
            .attempt(
                Step::ProfileLookup,
                self.deps.directory.get_private_profile(&user.id),
            )
            .await?;
        let Some(profile) = profile else {
            info!(user_id = %user.id, "No private profile, skipping onboarding");
            return Ok(run.finish(OnboardingOutcome::ProfileMissing));
        };

        let enrollment = run
            .attempt(
                Step::Enrollment,
                self.deps.league.enroll(self.deps.db.as_ref(), &user.id),
            )
            .await?;
        info!(
            user_id = %user.id,
            season = enrollment.membership.season,
            cohort = %enrollment.membership.cohort,
            newly_enrolled = enrollment.newly_enrolled,
            "League enrollment done"
        );

        let recipient = Recipient::new(user, &profile);

        self.notify(&mut run, Step::Welcome, &recipient, Notification::Welcome, now)
            .await?;
        self.notify(
            &mut run,
            Step::PersonalFollowup,
            &recipient,
            Notification::PersonalFollowup,
            now + self.config.followup_delay(),
        )
        .await?;
        self.notify(
            &mut run,
            Step::CreatorGuide,
            &recipient,
            Notification::CreatorGuide,
            now + self.config.creator_guide_delay(),
        )
        .await?;

        run.steps.push(Step::BlackoutGate);
        if self.blackout.is_active(now) {
            info!(user_id = %user.id, invoked_at = %now, "Weekly blackout active, stopping after gate");
            return Ok(run.finish(OnboardingOutcome::Blackout));
        }

        let contracts = run
            .attempt(Step::Trending, self.deps.trending.get_trending(now))
            .await?;

        self.notify(
            &mut run,
            Step::InterestingMarkets,
            &recipient,
            Notification::InterestingMarkets { contracts },
            now + self.config.markets_delay(),
        )
        .await?;

        let seeded = run
            .attempt(
                Step::Personalization,
                self.deps
                    .personalizer
                    .personalize(&user.id, self.deps.db.as_ref()),
            )
            .await?;

        info!(user_id = %user.id, seeded, "Onboarding complete");
        Ok(run.finish(OnboardingOutcome::Completed))
    }

    async fn notify(
        &self,
        run: &mut Run,
        step: Step,
        recipient: &Recipient,
        notification: Notification,
        deliver_at: DateTime<Utc>,
    ) -> Result<()> {
        let request =
            ScheduledNotification::new(recipient.clone(), notification, deliver_at, run.now);
        let receipt = run
            .attempt(step, self.deps.notifier.dispatch(&request))
            .await?;
        if let DispatchReceipt::Suppressed { reason } = &receipt {
            info!(user_id = %run.user_id, kind = %request.kind(), reason = %reason, "Notification suppressed");
        }
        Ok(())
    }
}
