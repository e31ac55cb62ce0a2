//! mcp-installer CLI

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

use mcp_installer::config::DECLARED_CONFIG_FILE;
use mcp_installer::reconcile::Failure;
use mcp_installer::registry::{looks_like_id, Pages, DEFAULT_PAGE_SIZE};
use mcp_installer::{
    apply, find_config_file, init_from_installed, verify, BlankEnv, Config, DeclaredConfig, EnvRequest, EnvResolver,
    Error, ErrorKind, MatchMode, Reconciler, Registry, RegistryClient, RegistryServer, Retrying, ServerEntry,
    SettingsDocument, SettingsStore,
};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);
const INDENT: &str = "        ";

/// Exit code when required servers are missing.
const EXIT_MISSING: u8 = 1;

#[derive(Parser)]
#[command(name = "mcp-installer")]
#[command(version, about = "MCP Installer - verify and install MCP servers in VS Code")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify that MCP servers are installed in VS Code
    Check {
        /// Server names or images (e.g. mcr.microsoft.com/mcp/redis:1.0)
        #[arg(required = true)]
        servers: Vec<String>,

        /// How identifiers are compared with installed servers
        #[arg(long = "match", value_enum, default_value_t = MatchArg::Exact)]
        match_mode: MatchArg,
    },

    /// List MCP servers installed in VS Code settings
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Query the MCP registry
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Work with the declared server list (mcp.yml)
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Remove an MCP server entry from VS Code settings
    Uninstall {
        /// Entry name under mcp.servers
        name: String,
    },

    /// Show resolved paths and registry URL
    Paths,
}

#[derive(Subcommand)]
enum RegistryAction {
    /// List servers available in the registry
    List {
        /// Maximum number of entries per page (max 100)
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: usize,

        /// Pagination cursor from a previous listing
        #[arg(long)]
        cursor: Option<String>,

        /// Follow cursors until the listing is exhausted
        #[arg(long)]
        all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search servers by name or description
    Search {
        query: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show details of a server
    Show {
        /// Registry server ID
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Install a server from the registry into VS Code settings
    Install {
        /// Server name, or ID with --by-id
        identifier: String,

        /// Interpret the identifier as a server ID
        #[arg(long)]
        by_id: bool,

        /// Install without asking for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Do not prompt for environment variable values
        #[arg(long)]
        no_interactive: bool,
    },

    /// Check that the registry is reachable
    Health,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Report declared servers that are missing from VS Code
    Verify {
        /// Config file (default: nearest mcp.yml)
        #[arg(long)]
        file: Option<PathBuf>,

        /// How identifiers are compared with installed servers
        #[arg(long = "match", value_enum, default_value_t = MatchArg::Exact)]
        match_mode: MatchArg,
    },

    /// Install every declared server that is missing
    Install {
        /// Config file (default: nearest mcp.yml)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Do not prompt for environment variable values
        #[arg(long)]
        no_interactive: bool,

        /// Install what resolves instead of stopping at the first failure
        #[arg(long)]
        keep_going: bool,

        /// How identifiers are compared with installed servers
        #[arg(long = "match", value_enum, default_value_t = MatchArg::Exact)]
        match_mode: MatchArg,
    },

    /// Write an mcp.yml listing the servers installed now
    Init {
        /// Output file
        #[arg(long, default_value = DECLARED_CONFIG_FILE)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MatchArg {
    Exact,
    IgnoreTag,
    Substring,
}

impl From<MatchArg> for MatchMode {
    fn from(m: MatchArg) -> Self {
        match m {
            MatchArg::Exact => MatchMode::Exact,
            MatchArg::IgnoreTag => MatchMode::IgnoreTag,
            MatchArg::Substring => MatchMode::Substring,
        }
    }
}

fn log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(log_level(cli.verbose, cli.quiet));

    let config = Config::resolve();
    debug!(?config, "Resolved configuration");

    match run(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e.display_chain());
            ExitCode::from(e.kind().exit_code())
        }
    }
}

fn run(command: Commands, config: &Config) -> Result<ExitCode, Error> {
    match command {
        Commands::Check { servers, match_mode } => check(config, &servers, match_mode.into()),
        Commands::List { json } => list(config, json),
        Commands::Uninstall { name } => uninstall(config, &name),
        Commands::Paths => {
            paths(config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Registry { action } => {
            let registry = Retrying::new(RegistryClient::new(config)?, RETRY_ATTEMPTS, RETRY_DELAY);
            eprintln!("Using MCP Registry: {}", config.registry_url);
            match action {
                RegistryAction::List {
                    limit,
                    cursor,
                    all,
                    json,
                } => registry_list(&registry, limit, cursor, all, json),
                RegistryAction::Search { query, json } => registry_search(&registry, &query, json),
                RegistryAction::Show { id, json } => registry_show(&registry, &id, json),
                RegistryAction::Install {
                    identifier,
                    by_id,
                    yes,
                    no_interactive,
                } => registry_install(config, &registry, &identifier, by_id, yes, no_interactive),
                RegistryAction::Health => Ok(registry_health(&registry)),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Verify { file, match_mode } => config_verify(config, file, match_mode.into()),
            ConfigAction::Install {
                file,
                no_interactive,
                keep_going,
                match_mode,
            } => {
                let registry = Retrying::new(RegistryClient::new(config)?, RETRY_ATTEMPTS, RETRY_DELAY);
                config_install(config, &registry, file, no_interactive, keep_going, match_mode.into())
            }
            ConfigAction::Init { output, force } => config_init(config, &output, force),
        },
    }
}

fn load_settings(config: &Config) -> Result<(SettingsStore, SettingsDocument), Error> {
    let store = SettingsStore::locate(config)?;
    let doc = store.load_or_default()?;
    Ok((store, doc))
}

fn check(config: &Config, servers: &[String], mode: MatchMode) -> Result<ExitCode, Error> {
    let (_, doc) = load_settings(config)?;
    let missing: Vec<&String> = servers.iter().filter(|s| !doc.has_server(s, mode)).collect();

    if missing.is_empty() {
        println!("All required MCP servers are installed.");
        return Ok(ExitCode::SUCCESS);
    }
    println!("The following MCP servers are not installed:");
    for server in missing {
        println!("  - {}", server);
    }
    Ok(ExitCode::from(EXIT_MISSING))
}

fn list(config: &Config, json: bool) -> Result<ExitCode, Error> {
    let (store, doc) = load_settings(config)?;
    let entries = doc.entries();
    let mut identities = doc.installed_identities();
    identities.sort();

    if json {
        let output = serde_json::json!({
            "settings_path": store.path(),
            "count": identities.len(),
            "servers": identities,
            "entries": entries
                .iter()
                .map(|e| (e.name.clone(), serde_json::to_value(e).unwrap_or_default()))
                .collect::<serde_json::Map<_, _>>(),
        });
        print_json(&output);
        return Ok(ExitCode::SUCCESS);
    }

    if store.exists() {
        println!("Found settings file at: {}", store.path().display());
    }
    if entries.is_empty() {
        println!("No MCP servers detected in settings.json");
        return Ok(ExitCode::SUCCESS);
    }

    println!("\nInstalled MCP servers:");
    for identity in &identities {
        println!("  - {}", identity);
    }
    println!("\nTotal: {} servers", identities.len());

    println!("\nDetailed MCP Server Configurations:");
    for entry in &entries {
        println!();
        print_entry(entry);
    }
    Ok(ExitCode::SUCCESS)
}

fn uninstall(config: &Config, name: &str) -> Result<ExitCode, Error> {
    let (store, mut doc) = load_settings(config)?;
    if !doc.remove_server(name)? {
        eprintln!("Server not installed: {}", name);
        return Ok(ExitCode::from(ErrorKind::NotFound.exit_code()));
    }
    store.save(&mut doc)?;
    println!("Uninstalled {}", name);
    Ok(ExitCode::SUCCESS)
}

fn paths(config: &Config) {
    match &config.settings_path {
        Some(p) => {
            println!("Settings file:   {}", p.display());
            println!("Settings exists: {}", p.is_file());
        }
        None => println!("Settings file:   <unknown>"),
    }
    println!("Registry URL:    {}", config.registry_url);
    println!("Timeout:         {}s", config.timeout.as_secs());
    let declared = std::env::current_dir()
        .ok()
        .and_then(|cwd| find_config_file(&cwd, DECLARED_CONFIG_FILE));
    match declared {
        Some(p) => println!("MCP config:      {}", p.display()),
        None => println!("MCP config:      <none found>"),
    }
}

fn registry_list<R: Registry>(
    registry: &R,
    limit: usize,
    cursor: Option<String>,
    all: bool,
    json: bool,
) -> Result<ExitCode, Error> {
    if all {
        let mut servers = Vec::new();
        let walk = Pages::starting_at(
            |c: Option<&str>| registry.list_available(limit, c),
            cursor,
        );
        for page in walk {
            let page = page?;
            if !json {
                print_server_summaries(&page.servers);
            }
            servers.extend(page.servers);
        }
        if json {
            print_json(&servers);
        } else {
            println!("\nTotal: {} servers", servers.len());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let page = registry.list_available(limit, cursor.as_deref())?;
    if json {
        print_json(&page);
        return Ok(ExitCode::SUCCESS);
    }
    if page.servers.is_empty() {
        println!("No MCP servers found in the registry");
        return Ok(ExitCode::SUCCESS);
    }
    print_server_summaries(&page.servers);
    println!("\nTotal: {} servers", page.servers.len());
    if let Some(next) = page.next_cursor {
        println!("\nFor more results, run with --cursor={}", next);
    }
    Ok(ExitCode::SUCCESS)
}

fn registry_search<R: Registry>(registry: &R, query: &str, json: bool) -> Result<ExitCode, Error> {
    let servers = registry.search(query)?;
    if json {
        print_json(&servers);
        return Ok(ExitCode::SUCCESS);
    }
    if servers.is_empty() {
        println!("No servers found matching '{}'", query);
        return Ok(ExitCode::SUCCESS);
    }
    println!("Found {} matching servers:", servers.len());
    print_server_summaries(&servers);
    Ok(ExitCode::SUCCESS)
}

fn registry_show<R: Registry>(registry: &R, id: &str, json: bool) -> Result<ExitCode, Error> {
    let server = registry.get_details(id)?;
    if json {
        print_json(&server);
    } else {
        print_server_details(&server);
    }
    Ok(ExitCode::SUCCESS)
}

fn registry_health<R: Registry>(registry: &R) -> ExitCode {
    let health = registry.health();
    println!("Registry: {}", health.url);
    println!("Status:   {}", health.status);
    if let Some(v) = &health.version {
        println!("Version:  {}", v);
    }
    if health.is_online() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(ErrorKind::Network.exit_code())
    }
}

fn registry_install<R: Registry>(
    config: &Config,
    registry: &R,
    identifier: &str,
    by_id: bool,
    yes: bool,
    no_interactive: bool,
) -> Result<ExitCode, Error> {
    let server = if by_id {
        eprintln!("Looking up server by ID: {}", identifier);
        registry.get_details(identifier)?
    } else {
        eprintln!("Searching for server by name: {}", identifier);
        match registry.find_by_name(identifier) {
            Ok(s) => s,
            Err(Error::Ambiguous { candidates, .. }) => {
                eprintln!("Multiple servers found matching '{}':", identifier);
                for (i, c) in candidates.iter().enumerate() {
                    eprintln!("  {}. {}", i + 1, c);
                }
                eprintln!("\nPlease use --by-id with the specific server ID");
                return Ok(ExitCode::from(ErrorKind::Ambiguous.exit_code()));
            }
            Err(e) => return Err(e),
        }
    };

    println!("Installing server: {}", server.name);
    let env: &dyn EnvResolver = if no_interactive { &BlankEnv } else { &prompt_env };
    let entry = Reconciler::new(registry).with_env(env).launch_entry(&server)?;

    let mut preview = serde_json::Map::new();
    preview.insert(entry.name.clone(), serde_json::to_value(&entry).unwrap_or_default());
    println!("\nVS Code configuration:");
    print_json(&preview);

    if !yes && !confirm("Do you want to install this server?") {
        println!("Installation cancelled");
        return Ok(ExitCode::SUCCESS);
    }

    let (store, mut doc) = load_settings(config)?;
    doc.upsert_server(&entry)?;
    store.save(&mut doc)?;
    println!("\nServer installed successfully: {}", entry.name);
    Ok(ExitCode::SUCCESS)
}

fn declared_path(file: Option<PathBuf>) -> Result<PathBuf, Error> {
    if let Some(f) = file {
        return Ok(f);
    }
    let cwd = std::env::current_dir().map_err(|e| Error::Io {
        action: "read current directory",
        path: PathBuf::from("."),
        source: e,
    })?;
    find_config_file(&cwd, DECLARED_CONFIG_FILE).ok_or_else(|| Error::ConfigNotFound {
        path: cwd.join(DECLARED_CONFIG_FILE),
    })
}

fn config_verify(config: &Config, file: Option<PathBuf>, mode: MatchMode) -> Result<ExitCode, Error> {
    let path = declared_path(file)?;
    println!("Using MCP config file: {}", path.display());
    let declared = DeclaredConfig::load(&path)?;
    let (_, doc) = load_settings(config)?;

    // registry ids are the only reason to go to the network here
    let diff = if declared.servers.iter().any(|id| looks_like_id(id)) {
        let registry = Retrying::new(RegistryClient::new(config)?, RETRY_ATTEMPTS, RETRY_DELAY);
        Reconciler::new(&registry).with_match_mode(mode).verify(&doc, &declared)?
    } else {
        verify(&doc, &declared, mode)
    };

    if !diff.extra.is_empty() {
        println!("\nInstalled but not declared:");
        for name in &diff.extra {
            println!("  - {}", name);
        }
    }
    if diff.is_satisfied() {
        println!("\nAll {} declared MCP servers are installed.", declared.servers.len());
        return Ok(ExitCode::SUCCESS);
    }
    println!("\nMissing MCP servers:");
    for name in &diff.missing {
        println!("  - {}", name);
    }
    Ok(ExitCode::from(EXIT_MISSING))
}

fn config_install<R: Registry>(
    config: &Config,
    registry: &R,
    file: Option<PathBuf>,
    no_interactive: bool,
    keep_going: bool,
    mode: MatchMode,
) -> Result<ExitCode, Error> {
    let path = declared_path(file)?;
    println!("Using MCP config file: {}", path.display());
    let declared = DeclaredConfig::load(&path)?;
    let (store, doc) = load_settings(config)?;

    let env: &dyn EnvResolver = if no_interactive { &BlankEnv } else { &prompt_env };
    let reconciler = Reconciler::new(registry).with_env(env).with_match_mode(mode);

    let plan = if keep_going {
        reconciler.plan_install_all(&declared, &doc)
    } else {
        match reconciler.plan_install(&declared, &doc) {
            Ok(plan) => plan,
            Err(e) => {
                if !e.resolved.is_empty() {
                    let names: Vec<&str> = e.resolved.iter().map(|r| r.identifier.as_str()).collect();
                    eprintln!("Resolved before the failure (nothing installed): {}", names.join(", "));
                }
                eprintln!("Error: failed to resolve '{}': {}", e.identifier, e.source.display_chain());
                return Ok(ExitCode::from(e.source.kind().exit_code()));
            }
        }
    };

    for name in &plan.already_installed {
        println!("Already installed: {}", name);
    }
    report_failures(&plan.failures);

    if !plan.entries.is_empty() {
        let mut doc = apply(doc, &plan.server_entries())?;
        store.save(&mut doc)?;
        for resolved in &plan.entries {
            println!("Installed {} ({})", resolved.entry.name, resolved.identifier);
        }
    } else if plan.failures.is_empty() {
        println!("All declared MCP servers are already installed.");
    }

    match plan.failures.first() {
        Some(f) => Ok(ExitCode::from(f.error.kind().exit_code())),
        None => Ok(ExitCode::SUCCESS),
    }
}

fn report_failures(failures: &[Failure]) {
    for f in failures {
        eprintln!("Failed to resolve '{}': {}", f.identifier, f.error.display_chain());
    }
}

fn config_init(config: &Config, output: &Path, force: bool) -> Result<ExitCode, Error> {
    if output.exists() && !force {
        eprintln!("{} already exists; use --force to overwrite", output.display());
        return Ok(ExitCode::FAILURE);
    }
    let (_, doc) = load_settings(config)?;
    let declared = init_from_installed(&doc);
    declared.save(output)?;
    println!("Created MCP config file: {}", output.display());
    println!("Servers: {}", declared.servers.len());
    Ok(ExitCode::SUCCESS)
}

fn is_secret(name: &str) -> bool {
    let upper = name.to_uppercase();
    ["TOKEN", "SECRET", "KEY", "PASSWORD", "PASS"]
        .iter()
        .any(|k| upper.contains(k))
}

/// Interactive value prompt; defaults to the process environment.
fn prompt_env(req: &EnvRequest<'_>) -> Option<String> {
    let default = std::env::var(req.variable)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| Some(req.current.to_string()).filter(|v| !v.is_empty()));

    if let Some(desc) = req.description.filter(|d| !d.is_empty()) {
        eprintln!("  # {}", desc);
    }
    let secret = is_secret(req.variable);
    let prompt = match (&default, secret) {
        (Some(d), false) => format!("  {} [{}]: ", req.variable, d),
        (Some(_), true) => format!("  {} [keep existing]: ", req.variable),
        (None, _) => format!("  {}: ", req.variable),
    };

    let input = if secret {
        rpassword::prompt_password(&prompt).ok()
    } else {
        read_line(&prompt)
    };
    match input {
        Some(value) if !value.is_empty() => Some(value),
        _ => default,
    }
}

/// Echoed prompt on stderr; `None` on end of input.
fn read_line(prompt: &str) -> Option<String> {
    eprint!("{prompt}");
    let _ = std::io::stderr().flush();

    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

fn confirm(question: &str) -> bool {
    eprint!("{} [y/N]: ", question);
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Error: failed to render JSON: {e}"),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

fn print_entry(entry: &ServerEntry) {
    println!("Server: {}", entry.name);
    println!("{}Command: {}", INDENT, entry.command);
    if !entry.args.is_empty() {
        println!("{}Args:    {}", INDENT, entry.args.join(" "));
    }
    if let Some(env) = entry.env.as_ref().filter(|e| !e.is_empty()) {
        println!("{}Environment Variables:", INDENT);
        for (name, value) in env {
            let value = value.as_str().map(String::from).unwrap_or_else(|| value.to_string());
            println!("{}{}{}: {}", INDENT, INDENT, name, truncate(&value, 50));
        }
    }
}

fn print_server_summaries(servers: &[RegistryServer]) {
    for s in servers {
        println!();
        println!("{}", s.name);
        println!("{}ID:          {}", INDENT, s.id);
        if let Some(v) = s.version() {
            println!("{}Version:     {}", INDENT, v);
        }
        if !s.description.is_empty() {
            println!("{}Description: {}", INDENT, truncate(s.description.trim(), 100));
        }
    }
}

fn print_server_details(server: &RegistryServer) {
    println!("{}", server.name);
    println!("{}ID:          {}", INDENT, server.id);
    if !server.description.is_empty() {
        println!("{}Description: {}", INDENT, server.description.trim());
    }
    if let Some(repo) = &server.repository {
        println!("{}Repository:  {} ({})", INDENT, repo.url, repo.source);
    }
    if let Some(v) = server.version() {
        println!("{}Version:     {}", INDENT, v);
    }
    if let Some(detail) = &server.version_detail {
        if let Some(date) = &detail.release_date {
            println!("{}Released:    {}", INDENT, date);
        }
        println!("{}Latest:      {}", INDENT, detail.is_latest);
    }

    for (i, pkg) in server.packages.iter().enumerate() {
        println!("{}Package {}:   {} ({})", INDENT, i + 1, pkg.name, pkg.registry_name);
        if let Some(v) = pkg.version.as_deref().filter(|v| !v.is_empty()) {
            println!("{}{}Version: {}", INDENT, INDENT, v);
        }
        for arg in &pkg.package_arguments {
            println!(
                "{}{}Argument: {}: {}",
                INDENT,
                INDENT,
                arg.description.as_deref().unwrap_or(""),
                arg.value.as_deref().unwrap_or("")
            );
        }
        for env in &pkg.environment_variables {
            println!(
                "{}{}Env: {}: {}",
                INDENT,
                INDENT,
                env.name,
                env.description.as_deref().unwrap_or("")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn secret_names() {
        assert!(is_secret("GITHUB_TOKEN"));
        assert!(is_secret("api_key"));
        assert!(!is_secret("REDIS_HOST"));
    }

    #[test]
    fn truncate_long_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate(&"a".repeat(60), 50).chars().count(), 50);
    }

    #[test]
    fn quiet_wins_over_verbose() {
        assert_eq!(log_level(3, true), Level::ERROR);
        assert_eq!(log_level(0, false), Level::WARN);
        assert_eq!(log_level(2, false), Level::DEBUG);
    }
}
