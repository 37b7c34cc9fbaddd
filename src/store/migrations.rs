//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users_and_profiles",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                username TEXT NOT NULL,
                interests TEXT NOT NULL DEFAULT '[]',
                avatar_url TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

            CREATE TABLE IF NOT EXISTS private_users (
                id TEXT PRIMARY KEY,
                email TEXT,
                unsubscribed_all INTEGER NOT NULL DEFAULT 0,
                opted_out TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
    },
    Migration {
        version: 2,
        name: "onboarding_effects",
        sql: r#"
            CREATE TABLE IF NOT EXISTS league_memberships (
                season INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                division INTEGER NOT NULL,
                cohort TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (season, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_league_cohort
                ON league_memberships(season, division, cohort);

            CREATE TABLE IF NOT EXISTS scheduled_notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                recipient TEXT NOT NULL,
                payload TEXT NOT NULL,
                deliver_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, kind)
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_deliver_at
                ON scheduled_notifications(deliver_at);

            CREATE TABLE IF NOT EXISTS contracts (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL,
                question TEXT NOT NULL,
                creator_username TEXT NOT NULL,
                topics TEXT NOT NULL DEFAULT '[]',
                popularity_score REAL NOT NULL DEFAULT 0,
                close_time TEXT,
                resolved INTEGER NOT NULL DEFAULT 0,
                visibility TEXT NOT NULL DEFAULT 'public',
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_contracts_popularity
                ON contracts(popularity_score DESC);

            CREATE TABLE IF NOT EXISTS user_feed (
                user_id TEXT NOT NULL,
                contract_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                score REAL NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, contract_id)
            );
        "#,
    },
    Migration {
        version: 3,
        name: "onboarding_runs",
        sql: r#"
            CREATE TABLE IF NOT EXISTS onboarding_runs (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                outcome TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_onboarding_runs_user ON onboarding_runs(user_id);
            CREATE INDEX IF NOT EXISTS idx_onboarding_runs_event ON onboarding_runs(event_id);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        "Database migrations complete (at V{})",
        get_current_version(conn).await?
    );

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
