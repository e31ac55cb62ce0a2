//! Runtime configuration resolved from the environment.
//!
//! Uses env vars when set, otherwise platform defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const REGISTRY_URL_ENV: &str = "MCP_REGISTRY_URL";
pub const SETTINGS_PATH_ENV: &str = "MCP_VSCODE_SETTINGS_PATH";
pub const REGISTRY_TIMEOUT_ENV: &str = "MCP_REGISTRY_TIMEOUT_SECS";

pub const DEFAULT_REGISTRY_URL: &str = "https://demo.registry.azure-mcp.net/v0";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the declared configuration file searched for in the working tree.
pub const DECLARED_CONFIG_FILE: &str = "mcp.yml";

/// Settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// VS Code user settings file. `None` when no config dir is known and no override is set.
    pub settings_path: Option<PathBuf>,
    pub registry_url: String,
    pub timeout: Duration,
}

impl Config {
    /// Resolve from the process environment.
    pub fn resolve() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve using `lookup` in place of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let settings_path = non_empty(lookup(SETTINGS_PATH_ENV))
            .map(|p| expand_tilde(&p))
            .or_else(default_settings_path);

        let registry_url = non_empty(lookup(REGISTRY_URL_ENV))
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let timeout = non_empty(lookup(REGISTRY_TIMEOUT_ENV))
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Self {
            settings_path,
            registry_url,
            timeout,
        }
    }

    /// Configuration pointing at an explicit settings file and registry.
    pub fn with(settings_path: impl AsRef<Path>, registry_url: &str) -> Self {
        Self {
            settings_path: Some(settings_path.as_ref().to_path_buf()),
            registry_url: registry_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// `<config dir>/Code/User/settings.json`:
/// `~/.config` on Linux, `~/Library/Application Support` on macOS, `%APPDATA%` on Windows.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("Code").join("User").join("settings.json"))
}

fn non_empty(val: Option<String>) -> Option<String> {
    val.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn expand_tilde(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}
