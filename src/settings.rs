//! VS Code `settings.json` access.
//!
//! The document is kept as raw, order-preserving JSON so that every key other
//! than `mcp.servers` survives a load/modify/save cycle untouched.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::{entry_identity, MatchMode};
use crate::models::ServerEntry;

pub const MCP_SECTION: &str = "mcp";
pub const SERVERS_KEY: &str = "servers";

const DEFAULT_INDENT: &[u8] = b"    ";

/// Parsed settings file.
#[derive(Debug, Clone)]
pub struct SettingsDocument {
    path: PathBuf,
    root: Value,
    indent: Vec<u8>,
    trailing_newline: bool,
    dirty: bool,
}

impl Default for SettingsDocument {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            root: Value::Object(Map::new()),
            indent: DEFAULT_INDENT.to_vec(),
            trailing_newline: true,
            dirty: false,
        }
    }
}

impl SettingsDocument {
    /// Parse settings text. `path` is only used for error context.
    pub fn parse(text: &str, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if text.trim().is_empty() {
            return Ok(Self {
                path,
                ..Self::default()
            });
        }

        let root: Value = serde_json::from_str(text).map_err(|e| Error::ParseSettings {
            path: path.clone(),
            source: e,
        })?;
        if !root.is_object() {
            return Err(Error::InvalidSettings {
                path,
                key: "<root>".to_string(),
            });
        }

        Ok(Self {
            path,
            root,
            indent: detect_indent(text),
            trailing_newline: text.ends_with('\n'),
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole document, including keys this tool never touches.
    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Serialize with the indentation of the original file.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(&self.indent);
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.root.serialize(&mut ser).map_err(|e| Error::Serialize {
            what: "settings",
            message: e.to_string(),
        })?;
        if self.trailing_newline {
            buf.push(b'\n');
        }
        Ok(buf)
    }

    fn servers(&self) -> Option<&Map<String, Value>> {
        self.root
            .get(MCP_SECTION)
            .and_then(|m| m.get(SERVERS_KEY))
            .and_then(Value::as_object)
    }

    /// `mcp.servers`, created on demand.
    fn servers_mut(&mut self) -> Result<&mut Map<String, Value>> {
        let path = self.path.clone();
        let invalid = |key: &str| Error::InvalidSettings {
            path: path.clone(),
            key: key.to_string(),
        };

        let root = self.root.as_object_mut().ok_or_else(|| invalid("<root>"))?;
        let section = root
            .entry(MCP_SECTION)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| invalid(MCP_SECTION))?;
        section
            .entry(SERVERS_KEY)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| invalid("mcp.servers"))
    }

    /// Installed server identifiers, in file order.
    pub fn list_servers(&self) -> Vec<String> {
        self.servers()
            .map(|servers| servers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Installed entries, in file order. Entries that are not objects are skipped.
    pub fn entries(&self) -> Vec<ServerEntry> {
        let Some(servers) = self.servers() else {
            return vec![];
        };

        let mut result = Vec::with_capacity(servers.len());
        for (name, value) in servers {
            if !value.is_object() {
                warn!(server = %name, "Skipping MCP server entry that is not an object");
                continue;
            }
            match serde_json::from_value::<ServerEntry>(value.clone()) {
                Ok(mut entry) => {
                    entry.name = name.clone();
                    result.push(entry);
                }
                Err(e) => warn!(server = %name, error = %e, "Skipping malformed MCP server entry"),
            }
        }
        result
    }

    pub fn server(&self, name: &str) -> Option<ServerEntry> {
        self.entries().into_iter().find(|e| e.name == name)
    }

    /// Image/package identity per entry, or `"<name> (<command>)"` when none can be derived.
    pub fn installed_identities(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|e| entry_identity(e).unwrap_or_else(|| format!("{} ({})", e.name, e.command)))
            .collect()
    }

    /// True when some entry's name or launched image/package matches `query`.
    pub fn has_server(&self, query: &str, mode: MatchMode) -> bool {
        self.entries().iter().any(|e| entry_matches(e, query, mode))
    }

    /// Insert or replace an entry by name. Returns true when an entry was replaced.
    pub fn upsert_server(&mut self, entry: &ServerEntry) -> Result<bool> {
        let value = serde_json::to_value(entry).map_err(|e| Error::Serialize {
            what: "server entry",
            message: e.to_string(),
        })?;
        let replaced = self.servers_mut()?.insert(entry.name.clone(), value).is_some();
        self.dirty = true;
        info!(server = %entry.name, replaced, "Updated MCP server entry");
        Ok(replaced)
    }

    /// Remove an entry by name. Returns true when it existed.
    pub fn remove_server(&mut self, name: &str) -> Result<bool> {
        if self.servers().map_or(true, |s| !s.contains_key(name)) {
            return Ok(false);
        }
        self.servers_mut()?.shift_remove(name);
        self.dirty = true;
        info!(server = %name, "Removed MCP server entry");
        Ok(true)
    }
}

/// Whether `entry` is what `query` refers to, by name or by launched image/package.
pub fn entry_matches(entry: &ServerEntry, query: &str, mode: MatchMode) -> bool {
    mode.matches(query, &entry.name)
        || entry_identity(entry).is_some_and(|id| mode.matches(query, &id))
}

/// Location of the settings file plus load/save.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store for the platform settings file (or `MCP_VSCODE_SETTINGS_PATH`).
    pub fn locate(config: &Config) -> Result<Self> {
        let path = config.settings_path.clone().ok_or(Error::SettingsUnlocatable)?;
        debug!(path = %path.display(), "Resolved VS Code settings path");
        Ok(Self { path })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<SettingsDocument> {
        debug!(path = %self.path.display(), "Reading settings");
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SettingsNotFound {
                    path: self.path.clone(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(Error::InvalidEncoding {
                    path: self.path.clone(),
                })
            }
            Err(e) => return Err(Error::io("read", &self.path, e)),
        };
        SettingsDocument::parse(&text, &self.path)
    }

    /// Like [`load`](Self::load), but a missing file is an empty document.
    pub fn load_or_default(&self) -> Result<SettingsDocument> {
        match self.load() {
            Err(Error::SettingsNotFound { .. }) => {
                debug!(path = %self.path.display(), "Settings file absent, starting empty");
                Ok(SettingsDocument {
                    path: self.path.clone(),
                    ..SettingsDocument::default()
                })
            }
            other => other,
        }
    }

    /// Write the whole document via temp file + rename.
    pub fn save(&self, doc: &mut SettingsDocument) -> Result<()> {
        let bytes = doc.to_bytes()?;
        write_atomic(&self.path, &bytes)?;
        doc.dirty = false;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Saved settings");
        Ok(())
    }
}

/// Replace `path` with `contents` so readers see either the old or the new file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    write_atomic_with(path, contents, |_| Ok(()))
}

/// `before_commit` runs after the temp file is written and before it is renamed into place.
fn write_atomic_with(
    path: &Path,
    contents: &[u8],
    before_commit: impl FnOnce(&Path) -> std::io::Result<()>,
) -> Result<()> {
    let target = resolve_symlink(path)?;
    let path = target.as_path();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| Error::io("create directory", &dir, e))?;

    let prefix = format!(
        ".{}.",
        path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    );
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(|e| Error::io("create temporary file in", &dir, e))?;

    if let Ok(meta) = std::fs::metadata(path) {
        let _ = tmp.as_file().set_permissions(meta.permissions());
    }

    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::io("write", tmp.path().to_path_buf(), e))?;

    before_commit(tmp.path()).map_err(|e| Error::io("write", path, e))?;

    tmp.persist(path).map_err(|e| Error::io("replace", path, e.error))?;
    Ok(())
}

/// The file a symlinked `path` points at, so the rename replaces the target and keeps the link.
fn resolve_symlink(path: &Path) -> Result<PathBuf> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => match std::fs::canonicalize(path) {
            Ok(target) => Ok(target),
            // dangling link: write where it points
            Err(_) => {
                let link = std::fs::read_link(path).map_err(|e| Error::io("read link", path, e))?;
                Ok(match path.parent() {
                    Some(parent) if link.is_relative() => parent.join(link),
                    _ => link,
                })
            }
        },
        _ => Ok(path.to_path_buf()),
    }
}

/// Leading whitespace of the first indented line; four spaces if none.
///
/// Only the indent unit is remembered. Files that are not in the one-value-per-line
/// pretty layout (single-line files, inline arrays) are re-laid-out on save.
fn detect_indent(text: &str) -> Vec<u8> {
    text.lines()
        .skip(1)
        .map(|line| {
            let trimmed = line.trim_start_matches([' ', '\t']);
            &line[..line.len() - trimmed.len()]
        })
        .find(|ws| !ws.is_empty())
        .map(|ws| ws.as_bytes().to_vec())
        .unwrap_or_else(|| DEFAULT_INDENT.to_vec())
}
