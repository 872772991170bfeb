use super::*;

use crate::types::Theme;

/// Key of the singleton settings row.
pub const SETTINGS_ID: &str = "app-settings";

impl BoardDb {
    // =========================================================================
    // App settings
    // =========================================================================

    /// Read the stored settings. Missing fields take their defaults; `None`
    /// when the document was never written.
    pub fn get_settings(&self) -> Result<Option<AppSettings>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT project_name, tagline, primary_color, default_theme,
                    created_at, updated_at, updated_by
             FROM app_settings WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![SETTINGS_ID], |row| {
            let defaults = AppSettings::defaults();
            let theme: Option<String> = row.get(3)?;
            let created_raw: Option<String> = row.get(4)?;
            let updated_raw: Option<String> = row.get(5)?;
            let text = |idx: usize| -> rusqlite::Result<Option<String>> {
                Ok(row
                    .get::<_, Option<String>>(idx)?
                    .filter(|v| !v.trim().is_empty()))
            };
            Ok(AppSettings {
                project_name: text(0)?.unwrap_or(defaults.project_name),
                tagline: text(1)?.unwrap_or(defaults.tagline),
                primary_color: text(2)?.unwrap_or(defaults.primary_color),
                default_theme: theme
                    .and_then(|t| t.parse::<Theme>().ok())
                    .unwrap_or_default(),
                created_at: parse_timestamp(created_raw.as_deref()),
                updated_at: parse_timestamp(updated_raw.as_deref()),
                updated_by: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Write the whole settings document, creating it if absent.
    /// `created_at` is kept from the first write.
    pub fn save_settings(&self, settings: &AppSettings) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO app_settings (
                id, project_name, tagline, primary_color, default_theme,
                created_at, updated_at, updated_by
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                project_name = excluded.project_name,
                tagline = excluded.tagline,
                primary_color = excluded.primary_color,
                default_theme = excluded.default_theme,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by",
            params![
                SETTINGS_ID,
                settings.project_name,
                settings.tagline,
                settings.primary_color,
                settings.default_theme.as_str(),
                to_timestamp(&settings.created_at),
                to_timestamp(&settings.updated_at),
                settings.updated_by,
            ],
        )?;
        Ok(())
    }

    /// Replace the settings document outright, restarting `created_at`.
    pub fn reset_settings(&self, settings: &AppSettings) -> Result<(), DbError> {
        self.with_transaction(|db| {
            db.conn
                .execute("DELETE FROM app_settings WHERE id = ?1", params![SETTINGS_ID])?;
            db.save_settings(settings)
        })
    }
}
