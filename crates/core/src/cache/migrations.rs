//! Schema creation for the cache.
//!
//! A `_migrations` table records which numbered SQL batches have run. Only
//! batches above the highest recorded number are applied, each inside its
//! own transaction together with its version row.

use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use tokio_rusqlite::{Connection, params};

use super::Error;
use crate::clock::encode_timestamp;

/// Numbered SQL batches, ascending.
const MIGRATIONS: &[(i64, &str)] = &[
    (1, include_str!("../../migrations/001_entities.sql")),
    (2, include_str!("../../migrations/002_key_values.sql")),
];

fn ensure_version_table(conn: &rusqlite::Connection) -> Result<(), Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;
    Ok(())
}

fn recorded_version(conn: &rusqlite::Connection) -> Result<i64, Error> {
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0)).optional()?.flatten();
    Ok(version.unwrap_or(0))
}

fn apply_pending(conn: &mut rusqlite::Connection, batches: &[(i64, &str)]) -> Result<usize, Error> {
    ensure_version_table(conn)?;
    let current = recorded_version(conn)?;

    let mut applied = 0;
    for &(version, sql) in batches.iter().filter(|(v, _)| *v > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql).map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
        tx.execute(
            "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, encode_timestamp(chrono::Utc::now())],
        )?;
        tx.commit()?;
        tracing::debug!(version, "applied migration");
        applied += 1;
    }
    Ok(applied)
}

/// Bring the schema up to date.
///
/// # Errors
///
/// Returns [`Error::MigrationFailed`] naming the version whose SQL failed.
/// Earlier versions stay applied.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    let applied = conn.call(|conn| apply_pending(conn, MIGRATIONS)).await.map_err(Error::from)?;
    if applied > 0 {
        tracing::info!(applied, "cache schema updated");
    }
    Ok(())
}

/// Highest applied schema version, 0 for a blank database.
pub async fn schema_version(conn: &Connection) -> Result<i64, Error> {
    conn.call(|conn| {
        ensure_version_table(conn)?;
        recorded_version(conn)
    })
    .await
    .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blank_database_reaches_latest_version() {
        let conn = Connection::open_in_memory().await.unwrap();
        assert_eq!(schema_version(&conn).await.unwrap(), 0);

        run(&conn).await.unwrap();
        run(&conn).await.unwrap();
        assert_eq!(schema_version(&conn).await.unwrap(), 2);

        let tables: Vec<String> = conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
                let names = stmt.query_map([], |row| row.get(0))?;
                names.collect::<Result<Vec<String>, _>>()
            })
            .await
            .unwrap();
        for table in ["announcements", "forum_moderators", "forums", "key_values", "threads", "users"] {
            assert!(tables.iter().any(|t| t == table), "missing {table}");
        }
    }

    #[tokio::test]
    async fn test_failed_batch_names_version_and_keeps_earlier_ones() {
        let conn = Connection::open_in_memory().await.unwrap();
        let err = conn
            .call(|conn| {
                apply_pending(conn, &[(1, "CREATE TABLE first (id INTEGER)"), (2, "CREATE TABLE broken (")])
            })
            .await
            .map_err(Error::from)
            .unwrap_err();
        assert!(err.to_string().contains("version 2"), "{err}");
        assert_eq!(schema_version(&conn).await.unwrap(), 1);
    }
}
