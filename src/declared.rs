//! Declared server list (`mcp.yml`): the servers a project expects to be installed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::settings::write_atomic;

pub const DEFAULT_VERSION: &str = "1.0";

/// `version` + ordered `servers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredConfig {
    #[serde(default = "default_version", deserialize_with = "version_string")]
    pub version: String,
    #[serde(default)]
    pub servers: Vec<String>,
}

impl Default for DeclaredConfig {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

/// `version: 1.0` is a YAML float; keep it as the text the user wrote.
fn version_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => {
            let text = n.to_string();
            if n.is_f64() && !text.contains('.') {
                format!("{text}.0")
            } else {
                text
            }
        }
        serde_yaml::Value::Null => default_version(),
        other => return Err(serde::de::Error::custom(format!("invalid version: {other:?}"))),
    })
}

impl DeclaredConfig {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            version: default_version(),
            servers,
        }
    }

    /// Parse YAML text. `path` is only used for error context.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let config: Option<DeclaredConfig> = serde_yaml::from_str(text).map_err(|e| Error::ParseConfig {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = config.unwrap_or_default();
        config.validate(path)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Reading MCP config");
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(Error::io("read", path, e)),
        };
        Self::parse(&text, path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate(path)?;
        let text = serde_yaml::to_string(self).map_err(|e| Error::Serialize {
            what: "MCP config",
            message: e.to_string(),
        })?;
        write_atomic(path, text.as_bytes())?;
        debug!(path = %path.display(), servers = self.servers.len(), "Wrote MCP config");
        Ok(())
    }

    /// Identifiers must be non-empty and unique.
    pub fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |message: String| Error::InvalidConfig {
            path: path.to_path_buf(),
            message,
        };

        let mut seen = HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            if server.trim().is_empty() {
                return Err(invalid(format!("server #{} has an empty identifier", i + 1)));
            }
            if !seen.insert(server.as_str()) {
                return Err(invalid(format!("server '{server}' is listed more than once")));
            }
        }
        Ok(())
    }
}

/// Looks for `file_name` in `start` and then in each of its ancestors.
pub fn find_config_file(start: &Path, file_name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}
