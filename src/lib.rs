//! mcp-installer - MCP server verification and installation for VS Code
//!
//! Checks which MCP servers are configured in VS Code's user settings,
//! compares them with a declared `mcp.yml`, and installs servers from an
//! MCP registry.

pub mod config;
pub mod declared;
pub mod error;
pub mod identity;
pub mod models;
pub mod reconcile;
pub mod registry;
pub mod settings;

pub use config::Config;
pub use declared::{find_config_file, DeclaredConfig};
pub use error::{Error, ErrorKind, Result};
pub use identity::MatchMode;
pub use models::{RegistryHealth, RegistryPage, RegistryServer, ServerEntry};
pub use reconcile::{apply, diff, init_from_installed, verify, BlankEnv, Diff, EnvRequest, EnvResolver, InstallPlan, PlanError, Reconciler};
pub use registry::{collect_all, pages, with_retry, Registry, RegistryClient, Retrying};
pub use settings::{SettingsDocument, SettingsStore};
