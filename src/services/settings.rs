// Settings service
// Branding and theme defaults for the whole board.

use chrono::Utc;

use crate::auth::AuthContext;
use crate::db::{AppSettings, BoardDb, SettingsUpdate};
use crate::error::BoardError;
use crate::validation;

/// Stored settings, or the defaults when none were saved or the read fails.
pub fn get(db: &BoardDb) -> AppSettings {
    match db.get_settings() {
        Ok(Some(settings)) => settings,
        Ok(None) => AppSettings::defaults(),
        Err(e) => {
            log::warn!("Failed to read app settings, using defaults: {}", e);
            AppSettings::defaults()
        }
    }
}

/// Merge `input` over the stored settings (or the defaults) and save.
pub fn update(
    db: &BoardDb,
    auth: &AuthContext,
    input: &SettingsUpdate,
) -> Result<AppSettings, BoardError> {
    let actor = auth.require_admin()?;
    let now = Utc::now();
    let mut settings = match db.get_settings()? {
        Some(settings) => settings,
        None => AppSettings {
            created_at: now,
            ..AppSettings::defaults()
        },
    };

    if let Some(ref name) = input.project_name {
        settings.project_name = validation::non_empty("Project name", name)?;
    }
    if let Some(ref tagline) = input.tagline {
        settings.tagline = validation::non_empty("Tagline", tagline)?;
    }
    if let Some(ref color) = input.primary_color {
        settings.primary_color = validation::hex_color("Primary color", color)?;
    }
    if let Some(theme) = input.default_theme {
        settings.default_theme = theme;
    }
    settings.updated_at = now;
    settings.updated_by = actor.uid.clone();

    db.save_settings(&settings)?;
    log::info!("App settings updated by {}", actor.uid);
    Ok(settings)
}

/// Replace the stored settings with the defaults.
pub fn reset(db: &BoardDb, auth: &AuthContext) -> Result<AppSettings, BoardError> {
    let actor = auth.require_admin()?;
    let now = Utc::now();
    let settings = AppSettings {
        created_at: now,
        updated_at: now,
        updated_by: actor.uid.clone(),
        ..AppSettings::defaults()
    };
    db.reset_settings(&settings)?;
    log::info!("App settings reset by {}", actor.uid);
    Ok(settings)
}

/// Primary color as an `H S% L%` triple for theming.
pub fn primary_color_hsl(settings: &AppSettings) -> String {
    validation::hex_to_hsl(&settings.primary_color)
        .or_else(|| validation::hex_to_hsl(crate::db::DEFAULT_PRIMARY_COLOR))
        .unwrap_or_default()
}
