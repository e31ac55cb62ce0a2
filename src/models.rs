//! Data structures for settings entries and registry payloads.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ordered environment map, keeps the order the registry or file declared.
pub type EnvMap = serde_json::Map<String, serde_json::Value>;

/// One `mcp.servers` entry in VS Code settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Key under `mcp.servers`; not part of the serialized object.
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvMap>,
}

impl ServerEntry {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env: None,
        }
    }

    /// Names of declared environment variables, in declaration order.
    pub fn env_names(&self) -> Vec<String> {
        self.env
            .as_ref()
            .map(|env| env.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_env(&mut self, name: &str, value: String) {
        self.env
            .get_or_insert_with(EnvMap::new)
            .insert(name.to_string(), serde_json::Value::String(value));
    }
}

/// A page returned by `GET /servers`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryPage {
    pub servers: Vec<RegistryServer>,
    pub next_cursor: Option<String>,
}

/// Wire shape of a page. Registries put the cursor either at the top level or under `metadata`.
#[derive(Debug, Deserialize)]
pub(crate) struct RawPage {
    #[serde(default)]
    servers: Vec<RegistryServer>,
    #[serde(default)]
    next_cursor: Option<String>,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct PageMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

impl From<RawPage> for RegistryPage {
    fn from(raw: RawPage) -> Self {
        let next_cursor = raw
            .next_cursor
            .or_else(|| raw.metadata.and_then(|m| m.next_cursor))
            .filter(|c| !c.is_empty());
        Self {
            servers: raw.servers,
            next_cursor,
        }
    }
}

/// A server definition published in the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryServer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_detail: Option<VersionDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<Package>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionDetail {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub is_latest: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub registry_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_arguments: Vec<Argument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_arguments: Vec<Argument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvironmentVariable>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub value_hint: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Result of `GET /health`. Never an error: an unreachable registry is "offline".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryHealth {
    pub url: String,
    pub status: String,
    pub version: Option<String>,
}

impl RegistryHealth {
    pub fn offline(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: "offline".to_string(),
            version: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status != "offline"
    }
}

impl RegistryServer {
    /// Segment after the last `/` of the registry name (`io.github.x/redis` -> `redis`).
    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }

    pub fn version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .or_else(|| self.version_detail.as_ref().map(|v| v.version.as_str()))
            .filter(|v| !v.is_empty())
    }

    /// Picks the package to launch: docker first, then npm, then whatever comes first.
    pub fn preferred_package(&self) -> Option<&Package> {
        let by_registry = |name: &str| {
            self.packages
                .iter()
                .find(|p| p.registry_name.eq_ignore_ascii_case(name))
        };
        by_registry("docker")
            .or_else(|| by_registry("npm"))
            .or_else(|| self.packages.first())
    }

    /// Derives the VS Code launch configuration. Environment values start out empty.
    pub fn launch_config(&self) -> Result<ServerEntry> {
        let package = self.preferred_package().ok_or_else(|| Error::UnusableServer {
            server: self.name.clone(),
            reason: "server has no package information".to_string(),
        })?;

        let registry = package.registry_name.to_lowercase();
        let runtime_args: Vec<String> = package
            .runtime_arguments
            .iter()
            .filter(|a| a.kind == "positional")
            .filter_map(|a| a.value_hint.clone())
            .filter(|hint| !hint.is_empty())
            .collect();

        let (command, args) = match registry.as_str() {
            "docker" => {
                let args = if runtime_args.is_empty() {
                    let mut args: Vec<String> =
                        ["run", "-i", "--rm"].iter().map(|s| s.to_string()).collect();
                    for env in package.environment_variables.iter().filter(|e| !e.name.is_empty()) {
                        args.push("-e".to_string());
                        args.push(env.name.clone());
                    }
                    args.push(package.name.clone());
                    args
                } else {
                    runtime_args
                };
                ("docker".to_string(), args)
            }
            "npm" => {
                let args = if runtime_args.is_empty() {
                    vec![package.name.clone()]
                } else {
                    runtime_args
                };
                ("npx".to_string(), args)
            }
            _ => {
                let args = if runtime_args.is_empty() {
                    vec![package.name.clone()]
                } else {
                    runtime_args
                };
                (registry, args)
            }
        };

        let mut entry = ServerEntry::new(self.short_name(), command, args);
        for env in package.environment_variables.iter().filter(|e| !e.name.is_empty()) {
            entry.set_env(&env.name, String::new());
        }
        Ok(entry)
    }
}

pub fn short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
