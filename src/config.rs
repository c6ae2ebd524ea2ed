use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Store origin used when neither config nor environment names one.
pub const DEFAULT_STORE_SERVER: &str = "https://noxa-store.onrender.com";

pub(crate) const APP_CONFIG_FILE: &str = "config.json";

/// Environment override for the store origin.
const STORE_SERVER_ENV: &str = "PLUGIN_SERVER_URL";

/// Environment override for the plugins root.
const PLUGINS_DIR_ENV: &str = "NOXA_PLUGINS_DIR";

/// Get the config directory using platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/noxa/`
/// - Linux: `~/.config/noxa/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/noxa/`
///
/// Debug builds use a `noxa-dev/` subfolder so a development instance never
/// shares plugins with an installed one.
pub fn config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .map(|d| d.join("noxa"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".noxa")
        });
    if cfg!(debug_assertions) {
        base.join("noxa-dev")
    } else {
        base
    }
}

/// Load a JSON config file from `dir`, returning Default if missing or corrupt.
/// Logs when the file exists but cannot be read or parsed, so corrupt files are
/// visible in logs instead of silently resetting state.
pub(crate) fn load_json_config_in<T: DeserializeOwned + Default>(dir: &Path, filename: &str) -> T {
    let path = dir.join(filename);
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), "Could not read config: {e}");
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            error!(path = %path.display(), "Corrupt config: {e}. Using defaults.");
            T::default()
        }
    }
}

/// Save a JSON config file atomically (temp file + rename).
pub(crate) fn save_json_config_in<T: Serialize>(
    dir: &Path,
    filename: &str,
    config: &T,
) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create config directory: {e}"))?;

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {e}"))?;

    let target = dir.join(filename);
    let temp = dir.join(format!("{}.tmp.{}", filename, std::process::id()));

    std::fs::write(&temp, &json).map_err(|e| format!("Failed to write temp config: {e}"))?;

    // Either the old file or the new file exists, never a partial one
    std::fs::rename(&temp, &target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        format!("Failed to commit config: {e}")
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Plugin store origin; `None` falls back to env, then the default server
    #[serde(default)]
    pub store_server_url: Option<String>,
    /// Override for `{config_dir}/plugins`
    #[serde(default)]
    pub plugins_dir: Option<PathBuf>,
    /// Override for the bundled default plugins shipped with the app
    #[serde(default)]
    pub default_plugins_dir: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Upper bound on waiting for the host UI before loading extensions anyway
    #[serde(default = "default_ui_ready_timeout_ms")]
    pub ui_ready_timeout_ms: u64,
    #[serde(default = "default_sidebar_width")]
    pub sidebar_width: u32,
    #[serde(default = "default_title_bar_height")]
    pub title_bar_height: u32,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    10
}

fn default_ui_ready_timeout_ms() -> u64 {
    4000
}

fn default_sidebar_width() -> u32 {
    80
}

fn default_title_bar_height() -> u32 {
    40
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_server_url: None,
            plugins_dir: None,
            default_plugins_dir: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_redirects: default_max_redirects(),
            ui_ready_timeout_ms: default_ui_ready_timeout_ms(),
            sidebar_width: default_sidebar_width(),
            title_bar_height: default_title_bar_height(),
        }
    }
}

impl AppConfig {
    /// Resolve the store origin: config, then `PLUGIN_SERVER_URL`, then default.
    pub fn store_origin(&self) -> String {
        self.store_server_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var(STORE_SERVER_ENV).ok().filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_STORE_SERVER.to_string())
    }

    /// Resolve where installed plugins and bundled defaults live.
    pub fn shell_paths(&self, bundled: Option<PathBuf>) -> ShellPaths {
        let plugins_dir = std::env::var_os(PLUGINS_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| self.plugins_dir.clone())
            .unwrap_or_else(|| config_dir().join("plugins"));
        let default_plugins_dir = self
            .default_plugins_dir
            .clone()
            .or(bundled)
            .unwrap_or_else(|| PathBuf::from("plugins"));
        ShellPaths {
            plugins_dir,
            default_plugins_dir,
        }
    }
}

/// Filesystem locations owned by the manifest store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellPaths {
    pub plugins_dir: PathBuf,
    pub default_plugins_dir: PathBuf,
}

pub fn app_config_path() -> PathBuf {
    config_dir().join(APP_CONFIG_FILE)
}

pub fn load_app_config() -> AppConfig {
    load_json_config_in(&config_dir(), APP_CONFIG_FILE)
}

pub fn save_app_config(config: &AppConfig) -> Result<(), String> {
    save_json_config_in(&config_dir(), APP_CONFIG_FILE, config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
