use super::*;

const USER_COLUMNS: &str =
    "uid, email, display_name, photo_url, is_admin, created_at, updated_at, last_login_at";

/// Profile fields refreshed on every sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginProfile<'a> {
    pub uid: &'a str,
    pub email: &'a str,
    pub display_name: &'a str,
    pub photo_url: &'a str,
}

impl BoardDb {
    // =========================================================================
    // Users
    // =========================================================================

    fn map_user_row(row: &rusqlite::Row) -> rusqlite::Result<(User, String)> {
        let created_raw: Option<String> = row.get(5)?;
        let updated_raw: Option<String> = row.get(6)?;
        let login_raw: Option<String> = row.get(7)?;
        let user = User {
            uid: row.get(0)?,
            email: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            display_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            photo_url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            is_admin: row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
            created_at: parse_timestamp(created_raw.as_deref()),
            updated_at: parse_timestamp(updated_raw.as_deref()),
            last_login_at: parse_timestamp(login_raw.as_deref()),
        };
        Ok((user, created_raw.unwrap_or_default()))
    }

    pub fn get_user(&self, uid: &str) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {} FROM users WHERE uid = ?1", USER_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![uid], Self::map_user_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.0)),
            None => Ok(None),
        }
    }

    /// Create the user on first sign-in, otherwise refresh the profile and
    /// `last_login_at`. `grant_admin` only applies when the row is created.
    pub fn upsert_user_on_login(
        &self,
        profile: &LoginProfile<'_>,
        grant_admin: bool,
        now: &DateTime<Utc>,
    ) -> Result<User, DbError> {
        let stamp = to_timestamp(now);
        self.conn.execute(
            "INSERT INTO users (
                uid, email, display_name, photo_url, is_admin, created_at, updated_at, last_login_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6)
             ON CONFLICT(uid) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name,
                photo_url = excluded.photo_url,
                updated_at = excluded.updated_at,
                last_login_at = excluded.last_login_at",
            params![
                profile.uid,
                profile.email,
                profile.display_name,
                profile.photo_url,
                grant_admin as i32,
                stamp,
            ],
        )?;
        self.get_user(profile.uid)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn set_user_admin(
        &self,
        uid: &str,
        is_admin: bool,
        now: &DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE users SET is_admin = ?2, updated_at = ?3 WHERE uid = ?1",
            params![uid, is_admin as i32, to_timestamp(now)],
        )?;
        Ok(rows > 0)
    }

    /// Whether any user row with this email carries the admin flag.
    pub fn is_admin_user_email(&self, email: &str) -> Result<bool, DbError> {
        let n = self.count(
            "SELECT COUNT(*) FROM users WHERE email = ? COLLATE NOCASE AND is_admin = 1",
            vec![email.trim().to_string().into()],
        )?;
        Ok(n > 0)
    }

    pub fn list_admin_users(&self) -> Result<Vec<User>, DbError> {
        let sql = format!(
            "SELECT {} FROM users WHERE is_admin = 1 ORDER BY email COLLATE NOCASE, uid",
            USER_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::map_user_row)?;
        let users = rows
            .map(|row| row.map(|(user, _)| user))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// All users, newest first.
    pub fn list_users(&self, limit: usize, after: Option<&Cursor>) -> Result<Page<User>, DbError> {
        let mut sql = format!("SELECT {} FROM users", USER_COLUMNS);
        let mut values: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(cursor) = after {
            sql.push_str(" WHERE (COALESCE(created_at, ''), uid) < (?, ?)");
            values.push(cursor.created_at.clone().into());
            values.push(cursor.id.clone().into());
        }
        sql.push_str(" ORDER BY COALESCE(created_at, '') DESC, uid DESC LIMIT ?");
        values.push((limit as i64 + 1).into());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::map_user_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let page = Page::from_overfetch(rows, limit, |(user, created_raw)| Cursor {
            sort_value: None,
            created_at: created_raw.clone(),
            id: user.uid.clone(),
        });
        Ok(page.map(|(user, _)| user))
    }

    /// Users whose last sign-in is at or after `since`.
    pub fn count_active_users_since(&self, since: &DateTime<Utc>) -> Result<i64, DbError> {
        self.count(
            "SELECT COUNT(*) FROM users WHERE last_login_at >= ?",
            vec![to_timestamp(since).into()],
        )
    }

    pub fn count_users(&self) -> Result<i64, DbError> {
        self.count("SELECT COUNT(*) FROM users", Vec::new())
    }

    // =========================================================================
    // Admin emails
    // =========================================================================

    /// Add an email to the allow-list. Returns `false` if already present.
    pub fn add_admin_email(
        &self,
        email: &str,
        added_by: &str,
        now: &DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "INSERT INTO admin_emails (email, added_by, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(email) DO NOTHING",
            params![email.trim().to_lowercase(), added_by, to_timestamp(now)],
        )?;
        Ok(rows > 0)
    }

    pub fn remove_admin_email(&self, email: &str) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "DELETE FROM admin_emails WHERE email = ?1",
            params![email.trim()],
        )?;
        Ok(rows > 0)
    }

    pub fn is_admin_email(&self, email: &str) -> Result<bool, DbError> {
        let n = self.count(
            "SELECT COUNT(*) FROM admin_emails WHERE email = ?",
            vec![email.trim().to_string().into()],
        )?;
        Ok(n > 0)
    }

    pub fn list_admin_emails(&self) -> Result<Vec<AdminEmail>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT email, added_by, created_at FROM admin_emails ORDER BY email")?;
        let rows = stmt.query_map([], |row| {
            let created_raw: Option<String> = row.get(2)?;
            Ok(AdminEmail {
                email: row.get(0)?,
                added_by: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                created_at: parse_timestamp(created_raw.as_deref()),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{test_db, ts};
    use super::*;

    fn profile<'a>(uid: &'a str, email: &'a str, name: &'a str) -> LoginProfile<'a> {
        LoginProfile {
            uid,
            email,
            display_name: name,
            photo_url: "",
        }
    }

    #[test]
    fn test_upsert_creates_then_refreshes() {
        let db = test_db();
        let created = db
            .upsert_user_on_login(&profile("u1", "ada@example.com", "Ada"), true, &ts(0))
            .unwrap();
        assert!(created.is_admin);
        assert_eq!(created.created_at, ts(0));

        let refreshed = db
            .upsert_user_on_login(&profile("u1", "ada@new.example", "Ada L."), false, &ts(60))
            .unwrap();
        assert!(refreshed.is_admin, "admin flag is only set on creation");
        assert_eq!(refreshed.email, "ada@new.example");
        assert_eq!(refreshed.display_name, "Ada L.");
        assert_eq!(refreshed.created_at, ts(0));
        assert_eq!(refreshed.last_login_at, ts(60));
    }

    #[test]
    fn test_admin_flag_and_listing() {
        let db = test_db();
        db.upsert_user_on_login(&profile("u1", "b@example.com", "B"), false, &ts(0))
            .unwrap();
        db.upsert_user_on_login(&profile("u2", "a@example.com", "A"), false, &ts(1))
            .unwrap();
        assert!(db.set_user_admin("u1", true, &ts(2)).unwrap());
        assert!(!db.set_user_admin("ghost", true, &ts(2)).unwrap());

        let admins = db.list_admin_users().unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].uid, "u1");
        assert!(db.is_admin_user_email("B@EXAMPLE.COM").unwrap());
        assert!(!db.is_admin_user_email("a@example.com").unwrap());
    }

    #[test]
    fn test_list_users_pages_newest_first() {
        let db = test_db();
        for i in 0..5 {
            let uid = format!("u{}", i);
            let email = format!("{}@example.com", uid);
            db.upsert_user_on_login(&profile(&uid, &email, "x"), false, &ts(i))
                .unwrap();
        }
        let first = db.list_users(3, None).unwrap();
        let ids: Vec<_> = first.items.iter().map(|u| u.uid.as_str()).collect();
        assert_eq!(ids, vec!["u4", "u3", "u2"]);
        let cursor = Cursor::decode(first.next_cursor.as_deref().unwrap()).unwrap();
        let second = db.list_users(3, Some(&cursor)).unwrap();
        let ids: Vec<_> = second.items.iter().map(|u| u.uid.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u0"]);
        assert!(!second.has_more);
    }

    #[test]
    fn test_active_users_since() {
        let db = test_db();
        db.upsert_user_on_login(&profile("old", "old@example.com", "Old"), false, &ts(0))
            .unwrap();
        db.upsert_user_on_login(&profile("new", "new@example.com", "New"), false, &ts(100))
            .unwrap();
        assert_eq!(db.count_active_users_since(&ts(50)).unwrap(), 1);
        assert_eq!(db.count_active_users_since(&ts(0)).unwrap(), 2);
        assert_eq!(db.count_users().unwrap(), 2);
    }

    #[test]
    fn test_admin_email_allow_list_is_case_insensitive() {
        let db = test_db();
        assert!(db.add_admin_email(" Ops@Example.com ", "u1", &ts(0)).unwrap());
        assert!(!db.add_admin_email("ops@example.com", "u1", &ts(1)).unwrap());
        assert!(db.is_admin_email("OPS@example.com").unwrap());

        let listed = db.list_admin_emails().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].email, "ops@example.com");

        assert!(db.remove_admin_email("OPS@EXAMPLE.COM").unwrap());
        assert!(!db.is_admin_email("ops@example.com").unwrap());
    }
}
