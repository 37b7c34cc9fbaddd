//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::content::FeedItem;
use crate::error::DatabaseError;
use crate::league::LeagueMembership;
use crate::notifications::{Notification, Recipient, ScheduledNotification};
use crate::onboarding::model::{ContentItem, PrivateProfile, UserEntity, Visibility};
use crate::store::migrations;
use crate::store::traits::{Database, OnboardingRun, RunStatus};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format. Fixed width, so text comparison in SQL orders
/// instants correctly.
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn row_err(context: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{context} row parse: {e}"))
}

fn row_to_user(row: &libsql::Row) -> Result<UserEntity, DatabaseError> {
    let err = row_err("user");
    let interests: String = row.get(3).map_err(&err)?;
    let created: String = row.get(5).map_err(&err)?;
    Ok(UserEntity {
        id: row.get(0).map_err(&err)?,
        name: row.get(1).map_err(&err)?,
        username: row.get(2).map_err(&err)?,
        interests: serde_json::from_str(&interests).unwrap_or_default(),
        avatar_url: row.get(4).ok(),
        created_at: parse_datetime(&created),
    })
}

fn row_to_profile(row: &libsql::Row) -> Result<PrivateProfile, DatabaseError> {
    let err = row_err("private_user");
    let unsubscribed: i64 = row.get(2).map_err(&err)?;
    let opted_out: String = row.get(3).map_err(&err)?;
    Ok(PrivateProfile {
        id: row.get(0).map_err(&err)?,
        email: row.get(1).ok(),
        unsubscribed_all: unsubscribed != 0,
        opted_out: serde_json::from_str(&opted_out).unwrap_or_default(),
    })
}

fn row_to_membership(row: &libsql::Row) -> Result<LeagueMembership, DatabaseError> {
    let err = row_err("league_membership");
    let season: i64 = row.get(0).map_err(&err)?;
    let division: i64 = row.get(2).map_err(&err)?;
    let created: String = row.get(4).map_err(&err)?;
    Ok(LeagueMembership {
        season: season as u32,
        user_id: row.get(1).map_err(&err)?,
        division: division as u32,
        cohort: row.get(3).map_err(&err)?,
        created_at: parse_datetime(&created),
    })
}

fn row_to_notification(row: &libsql::Row) -> Result<ScheduledNotification, DatabaseError> {
    let err = row_err("scheduled_notification");
    let id: String = row.get(0).map_err(&err)?;
    let recipient: String = row.get(1).map_err(&err)?;
    let payload: String = row.get(2).map_err(&err)?;
    let deliver_at: String = row.get(3).map_err(&err)?;
    let created_at: String = row.get(4).map_err(&err)?;

    let recipient: Recipient = serde_json::from_str(&recipient)
        .map_err(|e| DatabaseError::Serialization(format!("recipient: {e}")))?;
    let notification: Notification = serde_json::from_str(&payload)
        .map_err(|e| DatabaseError::Serialization(format!("payload: {e}")))?;

    Ok(ScheduledNotification {
        id: Uuid::parse_str(&id).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        recipient,
        notification,
        deliver_at: parse_datetime(&deliver_at),
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_contract(row: &libsql::Row) -> Result<ContentItem, DatabaseError> {
    let err = row_err("contract");
    let topics: String = row.get(4).map_err(&err)?;
    let close_time: Option<String> = row.get(6).ok();
    let resolved: i64 = row.get(7).map_err(&err)?;
    let visibility: String = row.get(8).map_err(&err)?;
    Ok(ContentItem {
        id: row.get(0).map_err(&err)?,
        slug: row.get(1).map_err(&err)?,
        question: row.get(2).map_err(&err)?,
        creator_username: row.get(3).map_err(&err)?,
        topics: serde_json::from_str(&topics).unwrap_or_default(),
        popularity_score: row.get(5).map_err(&err)?,
        close_time: parse_optional_datetime(&close_time),
        resolved: resolved != 0,
        visibility: visibility.parse().unwrap_or(Visibility::Private),
    })
}

fn row_to_feed_item(row: &libsql::Row) -> Result<FeedItem, DatabaseError> {
    let err = row_err("user_feed");
    let created: String = row.get(4).map_err(&err)?;
    Ok(FeedItem {
        user_id: row.get(0).map_err(&err)?,
        contract_id: row.get(1).map_err(&err)?,
        reason: row.get(2).map_err(&err)?,
        score: row.get(3).map_err(&err)?,
        created_at: parse_datetime(&created),
    })
}

fn row_to_run(row: &libsql::Row) -> Result<OnboardingRun, DatabaseError> {
    let err = row_err("onboarding_run");
    let id: String = row.get(0).map_err(&err)?;
    let event_id: String = row.get(1).map_err(&err)?;
    let attempt: i64 = row.get(3).map_err(&err)?;
    let status: String = row.get(4).map_err(&err)?;
    let started: String = row.get(7).map_err(&err)?;
    let completed: Option<String> = row.get(8).ok();
    Ok(OnboardingRun {
        id: Uuid::parse_str(&id).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        event_id: Uuid::parse_str(&event_id)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        user_id: row.get(2).map_err(&err)?,
        attempt: attempt as u32,
        status: status.parse().unwrap_or(RunStatus::Failed),
        outcome: row.get(5).ok(),
        error: row.get(6).ok(),
        started_at: parse_datetime(&started),
        completed_at: parse_optional_datetime(&completed),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const USER_COLUMNS: &str = "id, name, username, interests, avatar_url, created_at";

const PROFILE_COLUMNS: &str = "id, email, unsubscribed_all, opted_out";

const MEMBERSHIP_COLUMNS: &str = "season, user_id, division, cohort, created_at";

const NOTIFICATION_COLUMNS: &str = "id, recipient, payload, deliver_at, created_at";

const CONTRACT_COLUMNS: &str =
    "id, slug, question, creator_username, topics, popularity_score, close_time, resolved, visibility";

const FEED_COLUMNS: &str = "user_id, contract_id, reason, score, created_at";

const RUN_COLUMNS: &str =
    "id, event_id, user_id, attempt, status, outcome, error, started_at, completed_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn upsert_user(&self, user: &UserEntity) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (id, name, username, interests, avatar_url, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (id) DO UPDATE SET name = ?2, username = ?3, interests = ?4, avatar_url = ?5",
            params![
                user.id.clone(),
                user.name.clone(),
                user.username.clone(),
                to_json(&user.interests)?,
                opt_text_owned(user.avatar_url.clone()),
                fmt_datetime(&user.created_at),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_user: {e}")))?;

        debug!(user_id = %user.id, "User upserted");
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<UserEntity>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn upsert_private_profile(&self, profile: &PrivateProfile) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = fmt_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO private_users (id, email, unsubscribed_all, opted_out, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET email = ?2, unsubscribed_all = ?3, opted_out = ?4, updated_at = ?5",
            params![
                profile.id.clone(),
                opt_text_owned(profile.email.clone()),
                profile.unsubscribed_all as i64,
                to_json(&profile.opted_out)?,
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_private_profile: {e}")))?;
        Ok(())
    }

    async fn get_private_profile(&self, id: &str) -> Result<Option<PrivateProfile>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {PROFILE_COLUMNS} FROM private_users WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_private_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_profile(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_private_profile: {e}"))),
        }
    }

    // ── Leagues ─────────────────────────────────────────────────────

    async fn get_league_membership(
        &self,
        season: u32,
        user_id: &str,
    ) -> Result<Option<LeagueMembership>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MEMBERSHIP_COLUMNS} FROM league_memberships WHERE season = ?1 AND user_id = ?2"
                ),
                params![season as i64, user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_league_membership: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_membership(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_league_membership: {e}"))),
        }
    }

    async fn cohort_sizes(
        &self,
        season: u32,
        division: u32,
    ) -> Result<Vec<(String, i64)>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT cohort, COUNT(*) FROM league_memberships WHERE season = ?1 AND division = ?2 GROUP BY cohort ORDER BY cohort",
                params![season as i64, division as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("cohort_sizes: {e}")))?;

        let mut sizes = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let cohort: String = row.get(0).map_err(row_err("cohort_sizes"))?;
            let count: i64 = row.get(1).unwrap_or(0);
            sizes.push((cohort, count));
        }
        Ok(sizes)
    }

    async fn insert_league_membership(
        &self,
        membership: &LeagueMembership,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute(
                "INSERT INTO league_memberships (season, user_id, division, cohort, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (season, user_id) DO NOTHING",
                params![
                    membership.season as i64,
                    membership.user_id.clone(),
                    membership.division as i64,
                    membership.cohort.clone(),
                    fmt_datetime(&membership.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_league_membership: {e}")))?;
        Ok(count > 0)
    }

    // ── Notifications ───────────────────────────────────────────────

    async fn insert_scheduled_notification(
        &self,
        notification: &ScheduledNotification,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute(
                "INSERT INTO scheduled_notifications (id, user_id, kind, recipient, payload, deliver_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (user_id, kind) DO NOTHING",
                params![
                    notification.id.to_string(),
                    notification.recipient.user_id.clone(),
                    notification.kind().to_string(),
                    to_json(&notification.recipient)?,
                    to_json(&notification.notification)?,
                    fmt_datetime(&notification.deliver_at),
                    fmt_datetime(&notification.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_scheduled_notification: {e}")))?;

        debug!(
            notification_id = %notification.id,
            kind = %notification.kind(),
            inserted = count > 0,
            "Scheduled notification insert"
        );
        Ok(count > 0)
    }

    async fn list_notifications_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ScheduledNotification>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM scheduled_notifications WHERE user_id = ?1 ORDER BY deliver_at ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_notifications_for_user: {e}")))?;

        let mut notifications = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_notification(&row) {
                Ok(n) => notifications.push(n),
                Err(e) => tracing::warn!("Skipping notification row: {e}"),
            }
        }
        Ok(notifications)
    }

    // ── Contracts ───────────────────────────────────────────────────

    async fn upsert_contract(&self, contract: &ContentItem) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = fmt_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO contracts (id, slug, question, creator_username, topics, popularity_score, close_time, resolved, visibility, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (id) DO UPDATE SET slug = ?2, question = ?3, creator_username = ?4, topics = ?5, popularity_score = ?6, close_time = ?7, resolved = ?8, visibility = ?9, updated_at = ?10",
            params![
                contract.id.clone(),
                contract.slug.clone(),
                contract.question.clone(),
                contract.creator_username.clone(),
                to_json(&contract.topics)?,
                contract.popularity_score,
                opt_text_owned(contract.close_time.as_ref().map(fmt_datetime)),
                contract.resolved as i64,
                contract.visibility.to_string(),
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_contract: {e}")))?;
        Ok(())
    }

    async fn list_open_contracts(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CONTRACT_COLUMNS} FROM contracts
                     WHERE resolved = 0 AND visibility = 'public' AND (close_time IS NULL OR close_time > ?1)
                     ORDER BY popularity_score DESC, id ASC LIMIT ?2"
                ),
                params![fmt_datetime(&now), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_open_contracts: {e}")))?;

        let mut contracts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_contract(&row) {
                Ok(c) => contracts.push(c),
                Err(e) => tracing::warn!("Skipping contract row: {e}"),
            }
        }
        Ok(contracts)
    }

    // ── Feed ────────────────────────────────────────────────────────

    async fn insert_feed_items(&self, items: &[FeedItem]) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let mut inserted = 0;
        for item in items {
            let count = conn
                .execute(
                    "INSERT INTO user_feed (user_id, contract_id, reason, score, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (user_id, contract_id) DO NOTHING",
                    params![
                        item.user_id.clone(),
                        item.contract_id.clone(),
                        item.reason.clone(),
                        item.score,
                        fmt_datetime(&item.created_at),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("insert_feed_items: {e}")))?;
            inserted += count as usize;
        }
        Ok(inserted)
    }

    async fn list_feed(&self, user_id: &str) -> Result<Vec<FeedItem>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {FEED_COLUMNS} FROM user_feed WHERE user_id = ?1 ORDER BY score DESC, contract_id ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_feed: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_feed_item(&row) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!("Skipping feed row: {e}"),
            }
        }
        Ok(items)
    }

    // ── Onboarding runs ─────────────────────────────────────────────

    async fn create_onboarding_run(&self, run: &OnboardingRun) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO onboarding_runs (id, event_id, user_id, attempt, status, outcome, error, started_at, completed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id.to_string(),
                run.event_id.to_string(),
                run.user_id.clone(),
                run.attempt as i64,
                run.status.to_string(),
                opt_text_owned(run.outcome.clone()),
                opt_text_owned(run.error.clone()),
                fmt_datetime(&run.started_at),
                opt_text_owned(run.completed_at.as_ref().map(fmt_datetime)),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_onboarding_run: {e}")))?;
        Ok(())
    }

    async fn complete_onboarding_run(
        &self,
        id: Uuid,
        status: RunStatus,
        outcome: Option<&str>,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute(
                "UPDATE onboarding_runs SET status = ?1, outcome = ?2, error = ?3, completed_at = ?4 WHERE id = ?5",
                params![
                    status.to_string(),
                    opt_text_owned(outcome.map(String::from)),
                    opt_text_owned(error.map(String::from)),
                    fmt_datetime(&completed_at),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_onboarding_run: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "onboarding_run".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_onboarding_runs(&self, user_id: &str) -> Result<Vec<OnboardingRun>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM onboarding_runs WHERE user_id = ?1 ORDER BY started_at ASC, attempt ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_onboarding_runs: {e}")))?;

        let mut runs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_run(&row) {
                Ok(r) => runs.push(r),
                Err(e) => tracing::warn!("Skipping onboarding run row: {e}"),
            }
        }
        Ok(runs)
    }
}
