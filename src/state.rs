use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::db::{AppSettings, BoardDb};
use crate::error::BoardError;
use crate::notification::Notices;
use crate::query_cache::{QueryCache, RetryPolicy};
use crate::types::Config;

/// Shared application context handed to every command.
///
/// Request-scoped data (who is calling) lives in
/// [`AuthContext`](crate::auth::AuthContext) instead.
pub struct AppState {
    pub config: RwLock<Config>,
    pub db: Mutex<Option<BoardDb>>,
    pub settings: SettingsContext,
    pub cache: QueryCache,
    pub notices: Notices,
    config_file: Option<PathBuf>,
}

impl AppState {
    pub fn new() -> Self {
        let config_file = config_path().ok();
        let config = match load_config() {
            Ok(config) => config,
            Err(e) => {
                log::info!("{e}. Using default configuration.");
                Config::default()
            }
        };

        let db = match BoardDb::open_configured(config.database_path.as_deref()) {
            Ok(db) => Some(db),
            Err(e) => {
                log::warn!("Failed to open board database: {e}. Board features disabled.");
                None
            }
        };

        let settings = SettingsContext::default();
        if let Some(ref db) = db {
            settings.refresh(db);
        }

        Self {
            config: RwLock::new(config),
            db: Mutex::new(db),
            settings,
            cache: QueryCache::default(),
            notices: Notices::new(),
            config_file,
        }
    }

    /// State over an already-open database, without a config file on disk.
    pub fn from_parts(db: BoardDb, config: Config) -> Self {
        let settings = SettingsContext::default();
        settings.refresh(&db);
        Self {
            config: RwLock::new(config),
            db: Mutex::new(Some(db)),
            settings,
            cache: QueryCache::new(RetryPolicy::immediate()),
            notices: Notices::new(),
            config_file: None,
        }
    }

    /// Persist config changes to `path`.
    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Config {
        self.config
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Run `f` against the open database.
    pub fn with_db<T>(
        &self,
        f: impl FnOnce(&BoardDb) -> Result<T, BoardError>,
    ) -> Result<T, BoardError> {
        let guard = self
            .db
            .lock()
            .map_err(|_| BoardError::Unavailable("Lock poisoned".to_string()))?;
        let db = guard
            .as_ref()
            .ok_or_else(|| BoardError::Unavailable("Database not initialized".to_string()))?;
        f(db)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Settings context
// =============================================================================

/// Last known app settings, shared by every request.
///
/// Readers never block on the store: until the first successful load they
/// see the hard-coded defaults.
#[derive(Default)]
pub struct SettingsContext {
    current: parking_lot::RwLock<Option<AppSettings>>,
}

impl SettingsContext {
    pub fn get(&self) -> Option<AppSettings> {
        self.current.read().clone()
    }

    pub fn current_or_default(&self) -> AppSettings {
        self.get().unwrap_or_default()
    }

    pub fn replace(&self, settings: AppSettings) {
        *self.current.write() = Some(settings);
    }

    /// Reload from the store. Falls back to defaults when the read fails.
    pub fn refresh(&self, db: &BoardDb) -> AppSettings {
        let settings = crate::services::settings::get(db);
        self.replace(settings.clone());
        settings
    }
}

// =============================================================================
// Config file
// =============================================================================

/// Get the canonical config file path (~/.featureboard/config.json)
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".featureboard").join("config.json"))
}

pub fn load_config() -> Result<Config, String> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        return Err(format!("Config file not found at {}", path.display()));
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    if config.default_page_size == 0 {
        return Err("defaultPageSize must be at least 1".to_string());
    }

    Ok(config)
}

/// Apply `mutator` to the in-memory config and write it back.
///
/// Written to a sibling temp file, then renamed into place. In-memory state
/// changes only after the write succeeds.
pub fn create_or_update_config(
    state: &AppState,
    mutator: impl FnOnce(&mut Config),
) -> Result<Config, String> {
    let mut guard = state.config.write().map_err(|_| "Lock poisoned")?;

    let mut config = guard.clone();
    mutator(&mut config);

    if let Some(ref path) = state.config_file {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create config dir: {}", e))?;
            }
        }

        let content = serde_json::to_string_pretty(&config)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| format!("Failed to write config: {}", e))?;
        fs::rename(&tmp, path).map_err(|e| format!("Failed to replace config: {}", e))?;
    }

    *guard = config.clone();

    Ok(config)
}

/// Reload configuration from disk
pub fn reload_config(state: &AppState) -> Result<Config, String> {
    let path = state
        .config_file
        .clone()
        .ok_or("No config file for this state")?;
    let config = load_config_from(&path)?;
    let mut guard = state.config.write().map_err(|_| "Lock poisoned")?;
    *guard = config.clone();
    Ok(config)
}
