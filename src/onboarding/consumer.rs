//! At-least-once consumer for user-created events.
//!
//! Events land in a bounded queue. The dispatcher spawns one task per event,
//! bounded by a semaphore, and records every attempt in `onboarding_runs`.
//! Failed attempts are re-queued after exponential backoff with jitter until
//! `max_attempts`, after which the event is dead-lettered (logged).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ConsumerConfig;
use crate::error::{ConsumerError, Result};
use crate::store::{Database, OnboardingRun, RunStatus};

use super::model::UserEntity;
use super::orchestrator::{OnboardingReport, Orchestrator};

/// Upper bound on a single retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// A user-created event, possibly a redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreatedEvent {
    pub event_id: Uuid,
    pub user: UserEntity,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

impl UserCreatedEvent {
    pub fn new(user: UserEntity) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            user,
            attempt: 1,
        }
    }

    fn redelivery(&self) -> Self {
        Self {
            event_id: self.event_id,
            user: self.user.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// Producer handle for the event queue.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<UserCreatedEvent>,
    capacity: usize,
}

impl EventPublisher {
    fn channel(capacity: usize) -> (Self, mpsc::Receiver<UserCreatedEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, capacity }, rx)
    }

    /// Enqueue without waiting. Fails when the queue is full or closed.
    pub fn publish(&self, event: UserCreatedEvent) -> std::result::Result<Uuid, ConsumerError> {
        let event_id = event.event_id;
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConsumerError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => ConsumerError::QueueClosed,
        })?;
        Ok(event_id)
    }
}

/// Delay before redelivering after failed attempt `attempt` (1-based):
/// `base * 2^(attempt-1)` capped at five minutes, plus up to `base` of jitter.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let backoff = base.saturating_mul(1u32 << exp).min(MAX_RETRY_DELAY);
    let jitter_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let jitter = if jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    };
    backoff + jitter
}

/// Runs the orchestrator for queued events.
pub struct OnboardingConsumer {
    orchestrator: Arc<Orchestrator>,
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    config: ConsumerConfig,
}

impl OnboardingConsumer {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        db: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            orchestrator,
            db,
            clock,
            config,
        }
    }

    /// Start the dispatcher loop. It exits once every publisher is dropped,
    /// the queue has drained, and every in-flight run has finished.
    pub fn spawn(self) -> (EventPublisher, JoinHandle<()>) {
        let (publisher, mut rx) = EventPublisher::channel(self.config.queue_capacity);
        // Weak so that pending retries do not keep the loop alive forever.
        let requeue = publisher.tx.downgrade();
        let consumer = Arc::new(self);
        let slots = u32::try_from(consumer.config.max_concurrent_runs).unwrap_or(u32::MAX);
        let permits = Arc::new(Semaphore::new(slots as usize));

        let handle = tokio::spawn(async move {
            info!(
                capacity = consumer.config.queue_capacity,
                max_concurrent = slots,
                "Onboarding consumer started"
            );

            while let Some(event) = rx.recv().await {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                let consumer = Arc::clone(&consumer);
                let requeue = requeue.clone();
                tokio::spawn(async move {
                    let result = consumer.process(&event).await;
                    drop(permit);
                    if result.is_err() {
                        consumer.schedule_retry(event, requeue);
                    }
                });
            }

            // Every in-flight run holds a permit until it finishes.
            if permits.acquire_many(slots).await.is_err() {
                warn!("Semaphore closed while waiting for in-flight runs");
            }
            info!("Onboarding consumer stopped");
        });

        (publisher, handle)
    }

    /// One delivery attempt: record it, run the orchestrator, record the result.
    /// The returned result is the orchestrator's; a failure to record the
    /// final status is only logged.
    pub async fn process(&self, event: &UserCreatedEvent) -> Result<OnboardingReport> {
        let mut run = OnboardingRun {
            id: Uuid::new_v4(),
            event_id: event.event_id,
            user_id: event.user.id.clone(),
            attempt: event.attempt,
            status: RunStatus::Running,
            outcome: None,
            error: None,
            started_at: self.clock.now(),
            completed_at: None,
        };
        self.db.create_onboarding_run(&run).await?;

        let result = self.orchestrator.run(&event.user).await;
        match &result {
            Ok(report) => {
                run.status = RunStatus::Completed;
                run.outcome = Some(report.outcome.to_string());
                info!(
                    event_id = %event.event_id,
                    user_id = %event.user.id,
                    attempt = event.attempt,
                    outcome = %report.outcome,
                    "Onboarding attempt succeeded"
                );
            }
            Err(e) => {
                run.status = RunStatus::Failed;
                run.error = Some(e.to_string());
                warn!(
                    event_id = %event.event_id,
                    user_id = %event.user.id,
                    attempt = event.attempt,
                    error = %e,
                    "Onboarding attempt failed"
                );
            }
        }

        if let Err(e) = self
            .db
            .complete_onboarding_run(
                run.id,
                run.status,
                run.outcome.as_deref(),
                run.error.as_deref(),
                self.clock.now(),
            )
            .await
        {
            warn!(
                run_id = %run.id,
                event_id = %event.event_id,
                status = %run.status,
                error = %e,
                "Failed to record onboarding run result"
            );
        }
        result
    }

    fn schedule_retry(&self, event: UserCreatedEvent, requeue: mpsc::WeakSender<UserCreatedEvent>) {
        if event.attempt >= self.config.max_attempts {
            let exhausted = ConsumerError::Exhausted {
                event_id: event.event_id,
                attempts: event.attempt,
            };
            error!(user_id = %event.user.id, error = %exhausted, "Dead-lettered onboarding event");
            return;
        }

        let delay = retry_delay(self.config.retry_base_delay, event.attempt);
        let next = event.redelivery();
        info!(
            event_id = %next.event_id,
            attempt = next.attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling onboarding retry"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(tx) = requeue.upgrade() else {
                error!(event_id = %next.event_id, "Queue closed before retry, dropping event");
                return;
            };
            if tx.send(next).await.is_err() {
                error!("Queue closed before retry, dropping event");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::{ContentConfig, LeagueConfig, OrchestratorConfig};
    use crate::content::FeedItem;
    use crate::error::{CollaboratorError, DatabaseError};
    use crate::league::LeagueMembership;
    use crate::notifications::ScheduledNotification;
    use crate::onboarding::model::{ContentItem, PrivateProfile};
    use crate::onboarding::orchestrator::OnboardingDeps;
    use crate::onboarding::services::UserDirectory;
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` lookups, then reads the store. Every
    /// lookup waits `delay` first.
    struct FlakyDirectory {
        db: Arc<dyn Database>,
        failures: u32,
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl UserDirectory for FlakyDirectory {
        async fn get_private_profile(
            &self,
            user_id: &str,
        ) -> std::result::Result<Option<PrivateProfile>, CollaboratorError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(CollaboratorError::Unavailable {
                    service: "directory".into(),
                    reason: format!("call {n}"),
                });
            }
            Ok(self.db.get_private_profile(user_id).await?)
        }
    }

    /// Store whose run-completion write always fails.
    struct CompletionFails {
        inner: Arc<dyn Database>,
    }

    #[async_trait]
    impl Database for CompletionFails {
        async fn run_migrations(&self) -> std::result::Result<(), DatabaseError> {
            self.inner.run_migrations().await
        }
        async fn upsert_user(&self, user: &UserEntity) -> std::result::Result<(), DatabaseError> {
            self.inner.upsert_user(user).await
        }
        async fn get_user(&self, id: &str) -> std::result::Result<Option<UserEntity>, DatabaseError> {
            self.inner.get_user(id).await
        }
        async fn upsert_private_profile(
            &self,
            profile: &PrivateProfile,
        ) -> std::result::Result<(), DatabaseError> {
            self.inner.upsert_private_profile(profile).await
        }
        async fn get_private_profile(
            &self,
            id: &str,
        ) -> std::result::Result<Option<PrivateProfile>, DatabaseError> {
            self.inner.get_private_profile(id).await
        }
        async fn get_league_membership(
            &self,
            season: u32,
            user_id: &str,
        ) -> std::result::Result<Option<LeagueMembership>, DatabaseError> {
            self.inner.get_league_membership(season, user_id).await
        }
        async fn cohort_sizes(
            &self,
            season: u32,
            division: u32,
        ) -> std::result::Result<Vec<(String, i64)>, DatabaseError> {
            self.inner.cohort_sizes(season, division).await
        }
        async fn insert_league_membership(
            &self,
            membership: &LeagueMembership,
        ) -> std::result::Result<bool, DatabaseError> {
            self.inner.insert_league_membership(membership).await
        }
        async fn insert_scheduled_notification(
            &self,
            notification: &ScheduledNotification,
        ) -> std::result::Result<bool, DatabaseError> {
            self.inner.insert_scheduled_notification(notification).await
        }
        async fn list_notifications_for_user(
            &self,
            user_id: &str,
        ) -> std::result::Result<Vec<ScheduledNotification>, DatabaseError> {
            self.inner.list_notifications_for_user(user_id).await
        }
        async fn upsert_contract(&self, contract: &ContentItem) -> std::result::Result<(), DatabaseError> {
            self.inner.upsert_contract(contract).await
        }
        async fn list_open_contracts(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> std::result::Result<Vec<ContentItem>, DatabaseError> {
            self.inner.list_open_contracts(now, limit).await
        }
        async fn insert_feed_items(&self, items: &[FeedItem]) -> std::result::Result<usize, DatabaseError> {
            self.inner.insert_feed_items(items).await
        }
        async fn list_feed(&self, user_id: &str) -> std::result::Result<Vec<FeedItem>, DatabaseError> {
            self.inner.list_feed(user_id).await
        }
        async fn create_onboarding_run(&self, run: &OnboardingRun) -> std::result::Result<(), DatabaseError> {
            self.inner.create_onboarding_run(run).await
        }
        async fn complete_onboarding_run(
            &self,
            _id: Uuid,
            _status: RunStatus,
            _outcome: Option<&str>,
            _error: Option<&str>,
            _completed_at: DateTime<Utc>,
        ) -> std::result::Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk full".into()))
        }
        async fn list_onboarding_runs(
            &self,
            user_id: &str,
        ) -> std::result::Result<Vec<OnboardingRun>, DatabaseError> {
            self.inner.list_onboarding_runs(user_id).await
        }
    }

    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap()
    }

    fn user() -> UserEntity {
        UserEntity {
            id: "u1".into(),
            name: "Ada".into(),
            username: "ada".into(),
            created_at: wednesday(),
            interests: vec![],
            avatar_url: None,
        }
    }

    fn fast_config(max_attempts: u32) -> ConsumerConfig {
        ConsumerConfig {
            queue_capacity: 8,
            max_concurrent_runs: 2,
            max_attempts,
            retry_base_delay: Duration::from_millis(1),
        }
    }

    async fn consumer(failures: u32, max_attempts: u32) -> (OnboardingConsumer, Arc<dyn Database>) {
        build_consumer(failures, max_attempts, Duration::ZERO, false).await
    }

    /// Consumer plus the underlying store. With `completion_fails`, only the
    /// consumer's own bookkeeping goes through [`CompletionFails`].
    async fn build_consumer(
        failures: u32,
        max_attempts: u32,
        lookup_delay: Duration,
        completion_fails: bool,
    ) -> (OnboardingConsumer, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.upsert_user(&user()).await.unwrap();
        db.upsert_private_profile(&PrivateProfile {
            id: "u1".into(),
            email: Some("ada@example.com".into()),
            ..Default::default()
        })
        .await
        .unwrap();

        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(wednesday()));
        let mut deps = OnboardingDeps::store_backed(
            Arc::clone(&db),
            Arc::clone(&clock),
            LeagueConfig::default(),
            ContentConfig::default(),
        );
        deps.directory = Arc::new(FlakyDirectory {
            db: Arc::clone(&db),
            failures,
            delay: lookup_delay,
            calls: AtomicU32::new(0),
        });
        let orchestrator = Arc::new(Orchestrator::new(OrchestratorConfig::default(), deps));
        let runs_db: Arc<dyn Database> = if completion_fails {
            Arc::new(CompletionFails {
                inner: Arc::clone(&db),
            })
        } else {
            Arc::clone(&db)
        };
        (
            OnboardingConsumer::new(orchestrator, runs_db, clock, fast_config(max_attempts)),
            db,
        )
    }

    async fn wait_for_runs(db: &Arc<dyn Database>, count: usize) -> Vec<OnboardingRun> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let runs = db.list_onboarding_runs("u1").await.unwrap();
                let finished = runs
                    .iter()
                    .filter(|r| r.status != RunStatus::Running)
                    .count();
                if finished >= count {
                    return runs;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("runs did not finish in time")
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let base = Duration::from_millis(100);
        let first = retry_delay(base, 1);
        assert!(first >= base && first <= base * 2);
        let third = retry_delay(base, 3);
        assert!(third >= base * 4 && third <= base * 5);
        let huge = retry_delay(Duration::from_secs(60), 30);
        assert!(huge <= MAX_RETRY_DELAY + Duration::from_secs(60));
    }

    #[test]
    fn retry_delay_zero_base_has_no_jitter() {
        assert_eq!(retry_delay(Duration::ZERO, 4), Duration::ZERO);
    }

    #[tokio::test]
    async fn process_records_completed_run() {
        let (consumer, db) = consumer(0, 3).await;
        let event = UserCreatedEvent::new(user());

        let report = consumer.process(&event).await.unwrap();
        assert_eq!(report.outcome.to_string(), "completed");

        let runs = db.list_onboarding_runs("u1").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].event_id, event.event_id);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].outcome.as_deref(), Some("completed"));
        assert!(runs[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn process_records_failed_run() {
        let (consumer, db) = consumer(1, 3).await;
        let err = consumer
            .process(&UserCreatedEvent::new(user()))
            .await
            .unwrap_err();
        assert!(err.step().is_some());

        let runs = db.list_onboarding_runs("u1").await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error.as_deref().unwrap().contains("profile_lookup"));
    }

    #[tokio::test]
    async fn transient_failure_is_redelivered() {
        let (consumer, db) = consumer(2, 5).await;
        let (publisher, _handle) = consumer.spawn();
        let event = UserCreatedEvent::new(user());
        publisher.publish(event.clone()).unwrap();

        let runs = wait_for_runs(&db, 3).await;
        let mut attempts: Vec<(u32, RunStatus)> =
            runs.iter().map(|r| (r.attempt, r.status)).collect();
        attempts.sort_by_key(|(a, _)| *a);
        assert_eq!(attempts, vec![
            (1, RunStatus::Failed),
            (2, RunStatus::Failed),
            (3, RunStatus::Completed),
        ]);
        assert!(runs.iter().all(|r| r.event_id == event.event_id));

        // Welcome, follow-up, creator guide, markets digest.
        assert_eq!(db.list_notifications_for_user("u1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (consumer, db) = consumer(u32::MAX, 2).await;
        let (publisher, _handle) = consumer.spawn();
        publisher.publish(UserCreatedEvent::new(user())).unwrap();

        let runs = wait_for_runs(&db, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let runs_after = db.list_onboarding_runs("u1").await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs_after.len(), 2);
        assert!(runs_after.iter().all(|r| r.status == RunStatus::Failed));
    }

    #[tokio::test]
    async fn completion_write_failure_keeps_run_result() {
        let (consumer, db) = build_consumer(0, 3, Duration::ZERO, true).await;

        let report = consumer
            .process(&UserCreatedEvent::new(user()))
            .await
            .unwrap();
        assert_eq!(report.outcome.to_string(), "completed");
        assert_eq!(db.list_notifications_for_user("u1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn handle_joins_after_in_flight_runs_finish() {
        let (consumer, db) = build_consumer(0, 1, Duration::from_millis(200), false).await;
        let (publisher, handle) = consumer.spawn();
        publisher.publish(UserCreatedEvent::new(user())).unwrap();
        drop(publisher);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not exit")
            .unwrap();

        let runs = db.list_onboarding_runs("u1").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(db.list_notifications_for_user("u1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn publish_reports_full_queue() {
        let (publisher, _rx) = EventPublisher::channel(1);
        publisher.publish(UserCreatedEvent::new(user())).unwrap();
        let err = publisher
            .publish(UserCreatedEvent::new(user()))
            .unwrap_err();
        assert!(matches!(err, ConsumerError::QueueFull { capacity: 1 }));
    }

    #[tokio::test]
    async fn publish_reports_closed_queue() {
        let (publisher, rx) = EventPublisher::channel(1);
        drop(rx);
        let err = publisher
            .publish(UserCreatedEvent::new(user()))
            .unwrap_err();
        assert!(matches!(err, ConsumerError::QueueClosed));
    }

    #[tokio::test]
    async fn loop_exits_when_publishers_drop() {
        let (consumer, _db) = consumer(0, 1).await;
        let (publisher, handle) = consumer.spawn();
        drop(publisher);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not exit")
            .unwrap();
    }
}
