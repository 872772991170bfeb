//! SQLite-backed document store for the feature board.
//!
//! The database lives at `~/.featureboard/featureboard.db` unless the config
//! or `FEATUREBOARD_DB` points elsewhere. One table per logical collection;
//! array-valued fields (upvoters, labels) are keyed membership tables.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, params_from_iter, Connection};

use crate::util::{parse_timestamp, to_timestamp};

pub mod types;
pub use types::*;

/// Environment override for the database location.
pub const DB_PATH_ENV: &str = "FEATUREBOARD_DB";

pub struct BoardDb {
    conn: Connection,
}

/// `lower_unicode(text)`: full Unicode lowercase. SQLite's own `lower()`
/// and `LIKE` only fold ASCII.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "lower_unicode",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

impl BoardDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(DbError::from)?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT").map_err(DbError::from)?;
                Ok(val)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    log::warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Open (or create) the database at the default location.
    pub fn open() -> Result<Self, DbError> {
        Self::open_at(Self::db_path(None)?)
    }

    /// Open the database, honoring a configured path.
    pub fn open_configured(database_path: Option<&str>) -> Result<Self, DbError> {
        Self::open_at(Self::db_path(database_path)?)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        register_functions(&conn)?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        // After migrations, so table rebuilds in future migrations can turn it off.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        log::debug!("Opened board database at {}", path.display());
        Ok(Self { conn })
    }

    /// Resolve the database path: env override, then config, then
    /// `~/.featureboard/featureboard.db`.
    pub fn db_path(database_path: Option<&str>) -> Result<PathBuf, DbError> {
        if let Ok(env_path) = std::env::var(DB_PATH_ENV) {
            if !env_path.trim().is_empty() {
                return Ok(PathBuf::from(env_path.trim()));
            }
        }
        if let Some(configured) = database_path.map(str::trim).filter(|p| !p.is_empty()) {
            if let Some(rest) = configured.strip_prefix("~/") {
                let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
                return Ok(home.join(rest));
            }
            return Ok(PathBuf::from(configured));
        }
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".featureboard").join("featureboard.db"))
    }

    /// Count rows of a single-integer query.
    fn count(&self, sql: &str, values: Vec<rusqlite::types::Value>) -> Result<i64, DbError> {
        let n = self
            .conn
            .query_row(sql, params_from_iter(values), |row| row.get(0))?;
        Ok(n)
    }
}

pub mod analytics;
pub mod comments;
pub mod feature_requests;
pub mod labels;
pub mod settings;
pub mod users;

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::*;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    pub fn test_db() -> BoardDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        BoardDb::open_at(path).expect("Failed to open test database")
    }

    /// Fixed timestamp `minutes` after a reference instant.
    pub fn ts(minutes: i64) -> chrono::DateTime<chrono::Utc> {
        use chrono::TimeZone;
        chrono::Utc
            .with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
            .single()
            .expect("valid reference time")
            + chrono::Duration::minutes(minutes)
    }

    pub fn sample_request(id: &str, title: &str, minutes: i64) -> FeatureRequest {
        FeatureRequest {
            id: id.to_string(),
            title: title.to_string(),
            description: format!("{} description", title),
            status: crate::types::FeatureRequestStatus::Open,
            upvotes: 0,
            upvoted_by: Vec::new(),
            labels: Vec::new(),
            author_id: "author-1".to_string(),
            author_name: "Ada".to_string(),
            author_email: "ada@example.com".to_string(),
            comments_count: 0,
            created_at: ts(minutes),
            updated_at: ts(minutes),
        }
    }

    pub fn sample_comment(id: &str, feature_request_id: &str, minutes: i64) -> Comment {
        Comment {
            id: id.to_string(),
            content: format!("comment {}", id),
            feature_request_id: feature_request_id.to_string(),
            author_id: "author-2".to_string(),
            author_name: "Grace".to_string(),
            author_email: "grace@example.com".to_string(),
            author_photo_url: String::new(),
            created_at: ts(minutes),
            updated_at: ts(minutes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_open_applies_schema_and_foreign_keys() {
        let db = test_db();
        let fk: i64 = db
            .conn_ref()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        let version: i64 = db
            .conn_ref()
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.conn_ref().execute(
                "INSERT INTO labels (id, name) VALUES ('l1', 'UI')",
                params![],
            )?;
            Err(DbError::Migration("boom".to_string()))
        });
        assert!(result.is_err());
        let n = db
            .count("SELECT COUNT(*) FROM labels", Vec::new())
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_configured_path_expands_home() {
        if std::env::var(DB_PATH_ENV).is_ok() {
            return;
        }
        let path = BoardDb::db_path(Some("~/boards/team.db")).unwrap();
        assert!(path.ends_with("boards/team.db"));
        let default = BoardDb::db_path(None).unwrap();
        assert!(default.ends_with(".featureboard/featureboard.db"));
    }
}
