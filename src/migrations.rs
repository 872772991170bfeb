//! Versioned schema upgrades.
//!
//! SQL files under `migrations/` are compiled in and applied in order. The
//! highest applied version is kept in `schema_version`.

use rusqlite::Connection;

/// `(version, sql)` pairs in ascending order.
const MIGRATIONS: &[(i32, &str)] = &[(1, include_str!("migrations/001_baseline.sql"))];

fn latest_known() -> i32 {
    MIGRATIONS.last().map(|(version, _)| *version).unwrap_or(0)
}

/// Highest applied version, creating the tracking table on first use.
fn schema_version(conn: &Connection) -> Result<i32, String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )
    .map_err(|e| format!("Cannot create schema_version: {}", e))?;
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Cannot read schema version: {}", e))
}

/// Copy an existing database to `<path>.v<version>.bak` before upgrading it.
fn snapshot(conn: &Connection, version: i32) -> Result<(), String> {
    let path: String = conn
        .query_row("PRAGMA database_list", [], |row| row.get(2))
        .map_err(|e| format!("Cannot locate database file: {}", e))?;
    if path.is_empty() {
        // In-memory or temporary database.
        return Ok(());
    }

    let target = format!("{}.v{}.bak", path, version);
    let mut dest = Connection::open(&target)
        .map_err(|e| format!("Cannot create snapshot {}: {}", target, e))?;
    rusqlite::backup::Backup::new(conn, &mut dest)
        .and_then(|backup| backup.step(-1).map(|_| ()))
        .map_err(|e| format!("Snapshot to {} failed: {}", target, e))?;

    log::info!("Snapshot of schema v{} written to {}", version, target);
    Ok(())
}

/// Bring the schema up to date. Returns how many migrations ran.
///
/// A database written by a newer build is left untouched.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    let current = schema_version(conn)?;
    let latest = latest_known();
    if current > latest {
        return Err(format!(
            "Database schema v{} is newer than this build understands (v{})",
            current, latest
        ));
    }
    if current == latest {
        return Ok(0);
    }
    if current > 0 {
        snapshot(conn, current)?;
    }

    let mut applied = 0;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let script = format!(
            "BEGIN;\n{}\nINSERT INTO schema_version (version) VALUES ({});\nCOMMIT;",
            sql, version
        );
        if let Err(e) = conn.execute_batch(&script) {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                log::debug!("Nothing to roll back after v{}: {}", version, rollback);
            }
            return Err(format!("Migration v{} failed: {}", version, e));
        }
        log::info!("Schema migrated to v{}", version);
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_baseline_creates_every_collection() {
        let conn = memory();
        assert_eq!(run_migrations(&conn).unwrap(), 1);
        assert_eq!(schema_version(&conn).unwrap(), 1);

        for table in [
            "users",
            "admin_emails",
            "feature_requests",
            "feature_request_upvotes",
            "labels",
            "feature_request_labels",
            "comments",
            "app_settings",
            "analytics_cache",
        ] {
            let rows: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap_or_else(|e| panic!("missing table {}: {}", table, e));
            assert_eq!(rows, 0);
        }
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let conn = memory();
        run_migrations(&conn).unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn test_votes_are_unique_per_user() {
        let conn = memory();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO feature_requests (id, title) VALUES ('fr-1', 'Dark mode');
             INSERT INTO feature_request_upvotes (feature_request_id, user_id) VALUES ('fr-1', 'u1');",
        )
        .unwrap();
        let again = conn.execute(
            "INSERT INTO feature_request_upvotes (feature_request_id, user_id) VALUES ('fr-1', 'u1')",
            [],
        );
        assert!(again.is_err());
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = memory();
        schema_version(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (42)", [])
            .unwrap();
        let err = run_migrations(&conn).unwrap_err();
        assert!(err.contains("newer than this build"), "{}", err);
    }

    #[test]
    fn test_new_file_is_not_snapshotted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.db");
        let conn = Connection::open(&path).unwrap();
        run_migrations(&conn).unwrap();
        assert!(!dir.path().join("board.db.v0.bak").exists());
    }
}
