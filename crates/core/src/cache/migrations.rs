//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`. Each pending migration
//! runs in its own transaction together with its version row, so a failed
//! batch leaves the schema at the previous version.

use super::Error;
use tokio_rusqlite::{Connection, params, rusqlite};

const MIGRATIONS: &[(i64, &str)] = &[
    (1, include_str!("../../migrations/001_stores.sql")),
    (2, include_str!("../../migrations/002_retry_tasks.sql")),
    (3, include_str!("../../migrations/003_generations.sql")),
];

/// Latest schema version this build knows about.
pub const LATEST_VERSION: i64 = MIGRATIONS[MIGRATIONS.len() - 1].0;

fn applied_version(conn: &rusqlite::Connection) -> Result<i64, Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?)
}

/// Apply every migration newer than the recorded version.
///
/// A database written by a newer build (recorded version above
/// [`LATEST_VERSION`]) is refused rather than silently used.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        let current = applied_version(conn)?;
        if current > LATEST_VERSION {
            return Err(Error::MigrationFailed(format!(
                "database schema version {current} is newer than supported version {LATEST_VERSION}"
            )));
        }

        for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            let tx = conn.transaction()?;
            tx.execute_batch(sql)
                .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
            tx.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, super::format_timestamp(chrono::Utc::now())],
            )?;
            tx.commit()?;
            tracing::debug!(version, "applied migration");
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}

/// Recorded schema version.
pub async fn current_version(conn: &Connection) -> Result<i64, Error> {
    conn.call(|conn| applied_version(conn)).await.map_err(Error::from)
}
