//! Error types shared by the settings store, registry client and reconciler.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Longest slice of a registry response body kept for diagnostics.
const BODY_DIGEST_LEN: usize = 200;

/// Coarse classification used by front ends to pick an exit code and message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Parse,
    Network,
    Registry,
    Ambiguous,
    Io,
}

impl ErrorKind {
    /// Process exit code for this kind. `1` is reserved for "servers missing".
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::NotFound => 2,
            ErrorKind::Parse => 3,
            ErrorKind::Network => 4,
            ErrorKind::Registry => 5,
            ErrorKind::Ambiguous => 6,
            ErrorKind::Io => 7,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("settings file not found: {path}")]
    SettingsNotFound { path: PathBuf },

    #[error("cannot determine the VS Code settings location; set MCP_VSCODE_SETTINGS_PATH")]
    SettingsUnlocatable,

    #[error("MCP config file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("server not found in registry: {identifier}")]
    ServerNotFound { identifier: String },

    #[error("failed to parse settings file {path}")]
    ParseSettings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("settings file {path} is not valid UTF-8")]
    InvalidEncoding { path: PathBuf },

    #[error("settings file {path} does not contain a JSON object at {key}")]
    InvalidSettings { path: PathBuf, key: String },

    #[error("failed to parse MCP config file {path}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid MCP config file {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },

    #[error("invalid registry URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("invalid response from {url}")]
    InvalidResponse {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to reach registry at {url}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("registry returned HTTP {status} for {url}: {body}")]
    Registry { url: String, status: u16, body: String },

    #[error("server '{server}' cannot be installed: {reason}")]
    UnusableServer { server: String, reason: String },

    #[error("name '{name}' matches several registry servers: {}", candidates.join(", "))]
    Ambiguous { name: String, candidates: Vec<String> },

    #[error("failed to {action} {path}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {message}")]
    Serialize { what: &'static str, message: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SettingsNotFound { .. }
            | Error::SettingsUnlocatable
            | Error::ConfigNotFound { .. }
            | Error::ServerNotFound { .. } => ErrorKind::NotFound,
            Error::ParseSettings { .. }
            | Error::InvalidEncoding { .. }
            | Error::InvalidSettings { .. }
            | Error::ParseConfig { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidUrl { .. }
            | Error::InvalidResponse { .. }
            | Error::Serialize { .. } => ErrorKind::Parse,
            Error::Network { .. } => ErrorKind::Network,
            Error::Registry { .. } | Error::UnusableServer { .. } => ErrorKind::Registry,
            Error::Ambiguous { .. } => ErrorKind::Ambiguous,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Builds a [`Error::Registry`] keeping only a short digest of the body.
    pub(crate) fn registry(url: impl Into<String>, status: u16, body: &str) -> Self {
        let trimmed = body.trim();
        let body = match trimmed.char_indices().nth(BODY_DIGEST_LEN) {
            Some((cut, _)) => format!("{}...", &trimmed[..cut]),
            None => trimmed.to_string(),
        };
        Error::Registry {
            url: url.into(),
            status,
            body,
        }
    }

    /// Renders the error and its source chain, one cause per line.
    pub fn display_chain(&self) -> String {
        use std::error::Error as _;

        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(s) = source {
            out.push_str(&format!("\n  Caused by: {}", s));
            source = s.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_body_is_truncated() {
        let body = "x".repeat(500);
        let err = Error::registry("http://r/servers", 500, &body);
        match err {
            Error::Registry { body, status, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), BODY_DIGEST_LEN + 3);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn kinds_map_to_distinct_exit_codes() {
        let kinds = [
            ErrorKind::NotFound,
            ErrorKind::Parse,
            ErrorKind::Network,
            ErrorKind::Registry,
            ErrorKind::Ambiguous,
            ErrorKind::Io,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&1));
    }

    #[test]
    fn ambiguous_lists_candidates() {
        let err = Error::Ambiguous {
            name: "redis-mcp-server".into(),
            candidates: vec!["a (1)".into(), "b (2)".into()],
        };
        assert_eq!(err.kind(), ErrorKind::Ambiguous);
        let msg = err.to_string();
        assert!(msg.contains("a (1), b (2)"));
    }
}
