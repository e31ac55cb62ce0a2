//! Reconciliation of a declared server list against installed settings.
//!
//! Every operation here is a function of its inputs plus the injected
//! [`Registry`] and [`EnvResolver`]; nothing reads or writes files.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, info};

use crate::declared::DeclaredConfig;
use crate::error::{Error, Result};
use crate::identity::MatchMode;
use crate::models::{short_name, RegistryServer, ServerEntry};
use crate::registry::{looks_like_id, Registry};
use crate::settings::{entry_matches, SettingsDocument};

/// Outcome of comparing installed and declared identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Declared but not installed.
    pub missing: BTreeSet<String>,
    /// Installed but not declared.
    pub extra: BTreeSet<String>,
}

impl Diff {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

/// `missing = declared - installed`, `extra = installed - declared`.
pub fn diff(installed: &BTreeSet<String>, declared: &BTreeSet<String>) -> Diff {
    Diff {
        missing: declared.difference(installed).cloned().collect(),
        extra: installed.difference(declared).cloned().collect(),
    }
}

/// Whether `identifier` (or its short name, for qualified registry names) is installed.
pub fn is_installed(doc: &SettingsDocument, identifier: &str, mode: MatchMode) -> bool {
    doc.has_server(identifier, mode)
        || (short_name(identifier) != identifier && doc.has_server(short_name(identifier), mode))
}

/// Declared servers that are not installed, and installed servers nobody declared.
///
/// Identifiers are matched as written; registry ids need
/// [`Reconciler::verify`], which looks their names up first.
pub fn verify(doc: &SettingsDocument, declared: &DeclaredConfig, mode: MatchMode) -> Diff {
    let missing = declared
        .servers
        .iter()
        .filter(|id| !is_installed(doc, id, mode))
        .cloned()
        .collect();

    let extra = doc
        .entries()
        .into_iter()
        .filter(|entry| {
            !declared
                .servers
                .iter()
                .any(|id| entry_matches(entry, id, mode) || entry_matches(entry, short_name(id), mode))
        })
        .map(|entry| entry.name)
        .collect();

    Diff { missing, extra }
}

/// Declared config listing what `doc` has installed right now.
pub fn init_from_installed(doc: &SettingsDocument) -> DeclaredConfig {
    DeclaredConfig::new(doc.list_servers())
}

/// Upserts every entry into `doc`. Saving is left to the caller.
pub fn apply(mut doc: SettingsDocument, entries: &[ServerEntry]) -> Result<SettingsDocument> {
    for entry in entries {
        doc.upsert_server(entry)?;
    }
    Ok(doc)
}

/// A value needed for one environment variable of a server being installed.
#[derive(Debug, Clone, Copy)]
pub struct EnvRequest<'a> {
    pub server: &'a str,
    pub variable: &'a str,
    pub description: Option<&'a str>,
    pub current: &'a str,
}

/// Supplies environment variable values during installation.
///
/// Returning `None` keeps the current (usually empty) value.
pub trait EnvResolver {
    fn resolve(&self, request: &EnvRequest<'_>) -> Option<String>;
}

impl<F> EnvResolver for F
where
    F: Fn(&EnvRequest<'_>) -> Option<String>,
{
    fn resolve(&self, request: &EnvRequest<'_>) -> Option<String> {
        self(request)
    }
}

/// Leaves every value blank, for non-interactive installs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankEnv;

impl EnvResolver for BlankEnv {
    fn resolve(&self, _request: &EnvRequest<'_>) -> Option<String> {
        None
    }
}

static BLANK_ENV: BlankEnv = BlankEnv;

/// A declared identifier resolved to a launch configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub identifier: String,
    pub registry_id: String,
    pub entry: ServerEntry,
}

/// An identifier that could not be resolved.
#[derive(Debug)]
pub struct Failure {
    pub identifier: String,
    pub error: Error,
}

/// Entries ready for [`apply`], plus what was skipped or failed.
#[derive(Debug, Default)]
pub struct InstallPlan {
    pub entries: Vec<Resolved>,
    pub already_installed: Vec<String>,
    pub failures: Vec<Failure>,
}

impl InstallPlan {
    pub fn server_entries(&self) -> Vec<ServerEntry> {
        self.entries.iter().map(|r| r.entry.clone()).collect()
    }
}

/// First resolution failure of a fail-fast plan, with what succeeded before it.
#[derive(Error, Debug)]
#[error("failed to resolve '{identifier}'")]
pub struct PlanError {
    pub identifier: String,
    pub resolved: Vec<Resolved>,
    #[source]
    pub source: Error,
}

pub struct Reconciler<'a, R: Registry + ?Sized> {
    registry: &'a R,
    env: &'a dyn EnvResolver,
    match_mode: MatchMode,
}

impl<'a, R: Registry + ?Sized> Reconciler<'a, R> {
    pub fn new(registry: &'a R) -> Self {
        Self {
            registry,
            env: &BLANK_ENV,
            match_mode: MatchMode::Exact,
        }
    }

    pub fn with_env(mut self, env: &'a dyn EnvResolver) -> Self {
        self.env = env;
        self
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    pub fn is_installed(&self, doc: &SettingsDocument, identifier: &str) -> bool {
        is_installed(doc, identifier, self.match_mode)
    }

    /// Copy of `declared` with registry ids replaced by the server names they resolve to.
    pub fn named(&self, declared: &DeclaredConfig) -> Result<DeclaredConfig> {
        let mut named = declared.clone();
        for id in named.servers.iter_mut().filter(|id| looks_like_id(id)) {
            let server = self.registry.get_details(id.trim())?;
            debug!(id = %id, name = %server.name, "Named registry id");
            *id = server.name;
        }
        Ok(named)
    }

    /// Like the free [`verify`], with registry ids looked up in the registry.
    pub fn verify(&self, doc: &SettingsDocument, declared: &DeclaredConfig) -> Result<Diff> {
        let named = if declared.servers.iter().any(|id| looks_like_id(id)) {
            self.named(declared)?
        } else {
            declared.clone()
        };
        Ok(verify(doc, &named, self.match_mode))
    }

    /// Looks `identifier` up by id when it is a UUID, by name otherwise.
    pub fn resolve(&self, identifier: &str) -> Result<RegistryServer> {
        if looks_like_id(identifier) {
            debug!(identifier, "Resolving by registry id");
            self.registry.get_details(identifier.trim())
        } else {
            debug!(identifier, "Resolving by name");
            self.registry.find_by_name(identifier)
        }
    }

    /// Resolves `identifier` and fills in its environment through the resolver.
    pub fn prepare(&self, identifier: &str) -> Result<Resolved> {
        let server = self.resolve(identifier)?;
        self.prepare_server(identifier, server)
    }

    fn prepare_server(&self, identifier: &str, server: RegistryServer) -> Result<Resolved> {
        let entry = self.launch_entry(&server)?;
        info!(identifier, server = %entry.name, id = %server.id, "Resolved server");
        Ok(Resolved {
            identifier: identifier.to_string(),
            registry_id: server.id,
            entry,
        })
    }

    /// Launch configuration for `server` with environment values from the resolver.
    pub fn launch_entry(&self, server: &RegistryServer) -> Result<ServerEntry> {
        let mut entry = server.launch_config()?;
        let descriptions = server
            .preferred_package()
            .map(|p| p.environment_variables.as_slice())
            .unwrap_or_default();

        for variable in entry.env_names() {
            let current = entry
                .env
                .as_ref()
                .and_then(|env| env.get(&variable))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let description = descriptions
                .iter()
                .find(|e| e.name == variable)
                .and_then(|e| e.description.as_deref());

            let request = EnvRequest {
                server: &entry.name,
                variable: &variable,
                description,
                current: &current,
            };
            if let Some(value) = self.env.resolve(&request) {
                entry.set_env(&variable, value);
            }
        }
        Ok(entry)
    }

    /// `None` when `identifier` is already installed. Registry ids are fetched
    /// first so the check runs against the name the entry was installed under.
    fn plan_one(&self, doc: &SettingsDocument, identifier: &str) -> Result<Option<Resolved>> {
        if looks_like_id(identifier) {
            let server = self.registry.get_details(identifier.trim())?;
            if self.is_installed(doc, &server.name) {
                return Ok(None);
            }
            return self.prepare_server(identifier, server).map(Some);
        }
        if self.is_installed(doc, identifier) {
            return Ok(None);
        }
        self.prepare(identifier).map(Some)
    }

    /// Resolves every declared server that is not installed, stopping at the first failure.
    pub fn plan_install(
        &self,
        declared: &DeclaredConfig,
        doc: &SettingsDocument,
    ) -> std::result::Result<InstallPlan, PlanError> {
        let mut plan = InstallPlan::default();

        for identifier in &declared.servers {
            match self.plan_one(doc, identifier) {
                Ok(Some(resolved)) => plan.entries.push(resolved),
                Ok(None) => plan.already_installed.push(identifier.clone()),
                Err(source) => {
                    return Err(PlanError {
                        identifier: identifier.clone(),
                        resolved: plan.entries,
                        source,
                    })
                }
            }
        }
        Ok(plan)
    }

    /// Like [`plan_install`](Self::plan_install) but resolves every identifier and collects failures.
    pub fn plan_install_all(&self, declared: &DeclaredConfig, doc: &SettingsDocument) -> InstallPlan {
        let mut plan = InstallPlan::default();

        for identifier in &declared.servers {
            match self.plan_one(doc, identifier) {
                Ok(Some(resolved)) => plan.entries.push(resolved),
                Ok(None) => plan.already_installed.push(identifier.clone()),
                Err(error) => plan.failures.push(Failure {
                    identifier: identifier.clone(),
                    error,
                }),
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn diff_is_set_algebra() {
        let d = diff(&set(&["A", "B"]), &set(&["B", "C"]));
        assert_eq!(d.missing, set(&["C"]));
        assert_eq!(d.extra, set(&["A"]));
        assert!(!d.is_satisfied());
    }

    #[test]
    fn diff_of_equal_sets_is_empty() {
        let d = diff(&set(&["A"]), &set(&["A"]));
        assert_eq!(d, Diff::default());
        assert!(d.is_satisfied());
    }

    #[test]
    fn init_lists_installed_names() {
        let doc = SettingsDocument::parse(
            r#"{"mcp": {"servers": {"b": {"command": "x"}, "a": {"command": "y"}}}}"#,
            "s.json",
        )
        .unwrap();
        let cfg = init_from_installed(&doc);
        assert_eq!(cfg.servers, vec!["b", "a"]);
        assert_eq!(cfg.version, crate::declared::DEFAULT_VERSION);
    }

    #[test]
    fn apply_upserts_without_saving() {
        let doc = SettingsDocument::default();
        let entries = vec![
            ServerEntry::new("one", "docker", vec!["img:1".into()]),
            ServerEntry::new("two", "npx", vec!["@x/two".into()]),
        ];
        let doc = apply(doc, &entries).unwrap();
        assert!(doc.is_dirty());
        assert_eq!(doc.list_servers(), vec!["one", "two"]);
    }

    #[test]
    fn verify_matches_short_names_and_reports_extras() {
        let doc = SettingsDocument::parse(
            r#"{"mcp": {"servers": {"azure-mcp": {"command": "npx", "args": ["@azure/mcp"]}, "old": {"command": "x"}}}}"#,
            "s.json",
        )
        .unwrap();
        let declared = DeclaredConfig::new(vec!["io.github.azure/azure-mcp".into(), "redis".into()]);

        let d = verify(&doc, &declared, MatchMode::Exact);
        assert_eq!(d.missing, set(&["redis"]));
        assert_eq!(d.extra, set(&["old"]));
    }

    #[test]
    fn closures_are_env_resolvers() {
        let resolver = |req: &EnvRequest<'_>| (req.variable == "TOKEN").then(|| "secret".to_string());
        let req = EnvRequest {
            server: "s",
            variable: "TOKEN",
            description: None,
            current: "",
        };
        assert_eq!(resolver.resolve(&req).as_deref(), Some("secret"));
        assert_eq!(BlankEnv.resolve(&req), None);
    }
}
