//! MCP registry access: listing, search, detail lookup and health.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::models::{short_name, RawPage, RegistryHealth, RegistryPage, RegistryServer};

/// Largest page the registry serves.
pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 30;

/// Read side of an MCP registry.
///
/// `search` and `find_by_name` have client-side defaults built on
/// `list_available`, so an implementation only needs the three endpoints.
pub trait Registry {
    /// One page of servers. `cursor` is the `next_cursor` of the previous page.
    fn list_available(&self, limit: usize, cursor: Option<&str>) -> Result<RegistryPage>;

    /// A single server by exact id.
    fn get_details(&self, server_id: &str) -> Result<RegistryServer>;

    /// Reachability probe; an unreachable registry reports status `offline`.
    fn health(&self) -> RegistryHealth;

    /// Servers whose name or description contains `query`, ignoring case.
    fn search(&self, query: &str) -> Result<Vec<RegistryServer>> {
        let mut found = Vec::new();
        for page in pages(self, MAX_PAGE_SIZE) {
            found.extend(page?.servers.into_iter().filter(|s| matches_query(s, query)));
        }
        Ok(dedup_by_id(found))
    }

    /// The one server whose full or short name equals `name`, ignoring case.
    fn find_by_name(&self, name: &str) -> Result<RegistryServer> {
        let mut candidates: Vec<RegistryServer> = self
            .search(name)?
            .into_iter()
            .filter(|s| name_matches(s, name))
            .collect();

        match candidates.len() {
            0 => Err(Error::ServerNotFound {
                identifier: name.to_string(),
            }),
            1 => {
                let server = candidates.remove(0);
                debug!(name, id = %server.id, "Resolved server name");
                self.get_details(&server.id)
            }
            _ => Err(Error::Ambiguous {
                name: name.to_string(),
                candidates: candidates
                    .iter()
                    .map(|s| format!("{} ({})", s.name, s.id))
                    .collect(),
            }),
        }
    }
}

/// Case-insensitive substring match on name and description. Empty query matches all.
pub fn matches_query(server: &RegistryServer, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    query.is_empty()
        || server.name.to_lowercase().contains(&query)
        || server.description.to_lowercase().contains(&query)
}

/// A qualified name (`io.github.x/redis`) must match in full; a bare one may match the short name.
fn name_matches(server: &RegistryServer, name: &str) -> bool {
    let name = name.trim();
    server.name.eq_ignore_ascii_case(name)
        || (short_name(name) == name && server.short_name().eq_ignore_ascii_case(name))
}

/// Registry ids are UUIDs; anything else is treated as a name.
pub fn looks_like_id(identifier: &str) -> bool {
    uuid::Uuid::parse_str(identifier.trim()).is_ok()
}

fn dedup_by_id(servers: Vec<RegistryServer>) -> Vec<RegistryServer> {
    let mut seen = HashSet::new();
    servers
        .into_iter()
        .filter(|s| seen.insert(s.id.clone()))
        .collect()
}

/// Iterator over registry pages, following `next_cursor` until it is exhausted.
///
/// Dropping the iterator abandons the listing between pages. A cursor that
/// comes back a second time ends the walk.
pub struct Pages<F> {
    fetch: F,
    cursor: Option<String>,
    seen: HashSet<String>,
    done: bool,
}

impl<F> Pages<F>
where
    F: FnMut(Option<&str>) -> Result<RegistryPage>,
{
    pub fn new(fetch: F) -> Self {
        Self::starting_at(fetch, None)
    }

    pub fn starting_at(fetch: F, cursor: Option<String>) -> Self {
        Self {
            fetch,
            cursor,
            seen: HashSet::new(),
            done: false,
        }
    }
}

impl<F> Iterator for Pages<F>
where
    F: FnMut(Option<&str>) -> Result<RegistryPage>,
{
    type Item = Result<RegistryPage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let page = match (self.fetch)(self.cursor.as_deref()) {
            Ok(p) => p,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        match &page.next_cursor {
            None => self.done = true,
            Some(c) if !self.seen.insert(c.clone()) => {
                warn!(cursor = %c, "Registry repeated a pagination cursor, stopping");
                self.done = true;
            }
            Some(c) => self.cursor = Some(c.clone()),
        }
        Some(Ok(page))
    }
}

/// Pages of `registry`, `limit` servers at a time.
pub fn pages<'a, R: Registry + ?Sized>(
    registry: &'a R,
    limit: usize,
) -> Pages<impl FnMut(Option<&str>) -> Result<RegistryPage> + 'a> {
    Pages::new(move |cursor| registry.list_available(limit, cursor))
}

/// Every server across all pages, without duplicate ids.
pub fn collect_all<R: Registry + ?Sized>(registry: &R, limit: usize) -> Result<Vec<RegistryServer>> {
    let mut servers = Vec::new();
    for page in pages(registry, limit) {
        servers.extend(page?.servers);
    }
    Ok(dedup_by_id(servers))
}

/// Runs `op` up to `attempts` times, backing off exponentially, retrying only network errors.
pub fn with_retry<T>(attempts: u32, base_delay: Duration, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let attempts = attempts.max(1);
    let mut delay = base_delay;
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.kind() == ErrorKind::Network && attempt < attempts => {
                warn!(attempt, error = %e, "Registry unreachable, retrying");
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Wraps a registry so every call is retried on network errors.
#[derive(Debug, Clone)]
pub struct Retrying<R> {
    inner: R,
    attempts: u32,
    base_delay: Duration,
}

impl<R: Registry> Retrying<R> {
    pub fn new(inner: R, attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            attempts,
            base_delay,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: Registry> Registry for Retrying<R> {
    fn list_available(&self, limit: usize, cursor: Option<&str>) -> Result<RegistryPage> {
        with_retry(self.attempts, self.base_delay, || self.inner.list_available(limit, cursor))
    }

    fn get_details(&self, server_id: &str) -> Result<RegistryServer> {
        with_retry(self.attempts, self.base_delay, || self.inner.get_details(server_id))
    }

    fn health(&self) -> RegistryHealth {
        self.inner.health()
    }

    fn search(&self, query: &str) -> Result<Vec<RegistryServer>> {
        with_retry(self.attempts, self.base_delay, || self.inner.search(query))
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

/// Blocking HTTP client for a registry exposing `/servers`, `/servers/{id}` and `/health`.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base: Url,
    http: reqwest::blocking::Client,
}

impl RegistryClient {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_url(&config.registry_url, config.timeout)
    }

    pub fn with_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url.trim_end_matches('/')).map_err(|e| Error::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::InvalidUrl {
                url: base_url.to_string(),
                message: "not a hierarchical URL".to_string(),
            });
        }

        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("mcp-installer/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network {
                url: base_url.to_string(),
                source: e,
            })?;

        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T> {
        debug!(url = %url, ?query, "GET");
        let shown = url.to_string();
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .map_err(|e| Error::Network {
                url: shown.clone(),
                source: e,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(Error::registry(shown, status.as_u16(), &body));
        }

        resp.json::<T>().map_err(|e| {
            if e.is_timeout() {
                Error::Network { url: shown, source: e }
            } else {
                Error::InvalidResponse { url: shown, source: e }
            }
        })
    }

    fn fetch_page(&self, limit: usize, cursor: Option<&str>, search: Option<&str>) -> Result<RegistryPage> {
        let mut query = vec![("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string())];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        if let Some(s) = search.map(str::trim).filter(|s| !s.is_empty()) {
            query.push(("search", s.to_string()));
        }
        let raw: RawPage = self.get_json(self.endpoint(&["servers"]), &query)?;
        Ok(raw.into())
    }
}

impl Registry for RegistryClient {
    fn list_available(&self, limit: usize, cursor: Option<&str>) -> Result<RegistryPage> {
        self.fetch_page(limit, cursor, None)
    }

    fn get_details(&self, server_id: &str) -> Result<RegistryServer> {
        match self.get_json(self.endpoint(&["servers", server_id]), &[]) {
            Err(Error::Registry { status: 404, .. }) => Err(Error::ServerNotFound {
                identifier: server_id.to_string(),
            }),
            other => other,
        }
    }

    fn health(&self) -> RegistryHealth {
        let url = self.endpoint(&["health"]);
        let shown = url.to_string();
        match self.get_json::<HealthBody>(url, &[]) {
            Ok(body) => RegistryHealth {
                url: shown,
                status: body.status.unwrap_or_else(|| "ok".to_string()),
                version: body.version,
            },
            Err(e) => {
                debug!(error = %e.display_chain(), "Registry health check failed");
                RegistryHealth::offline(shown)
            }
        }
    }

    /// Asks the registry to filter, then filters again locally in case it ignored the parameter.
    fn search(&self, query: &str) -> Result<Vec<RegistryServer>> {
        let mut found = Vec::new();
        for page in Pages::new(|cursor| self.fetch_page(MAX_PAGE_SIZE, cursor, Some(query))) {
            found.extend(page?.servers.into_iter().filter(|s| matches_query(s, query)));
        }
        Ok(dedup_by_id(found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn server(id: &str, name: &str, description: &str) -> RegistryServer {
        RegistryServer {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// In-memory registry paging over a fixed list with numeric cursors.
    struct StaticRegistry {
        servers: Vec<RegistryServer>,
        calls: Cell<usize>,
    }

    impl StaticRegistry {
        fn new(servers: Vec<RegistryServer>) -> Self {
            Self {
                servers,
                calls: Cell::new(0),
            }
        }
    }

    impl Registry for StaticRegistry {
        fn list_available(&self, limit: usize, cursor: Option<&str>) -> Result<RegistryPage> {
            self.calls.set(self.calls.get() + 1);
            let start: usize = cursor.map_or(0, |c| c.parse().unwrap());
            let end = (start + limit).min(self.servers.len());
            Ok(RegistryPage {
                servers: self.servers[start..end].to_vec(),
                next_cursor: (end < self.servers.len()).then(|| end.to_string()),
            })
        }

        fn get_details(&self, server_id: &str) -> Result<RegistryServer> {
            self.servers
                .iter()
                .find(|s| s.id == server_id)
                .cloned()
                .ok_or_else(|| Error::ServerNotFound {
                    identifier: server_id.into(),
                })
        }

        fn health(&self) -> RegistryHealth {
            RegistryHealth::offline("memory")
        }
    }

    fn sample() -> StaticRegistry {
        StaticRegistry::new(vec![
            server("1", "io.github.felores/github", "GitHub tools"),
            server("2", "io.github.microsoft/redis-mcp-server", "Redis access"),
            server("3", "io.github.azure/azure-mcp", "Works with GITHUB actions"),
            server("4", "io.github.other/redis-mcp-server", "Another redis"),
            server("5", "io.github.mongodb-js/mongodb-mcp-server", "MongoDB"),
        ])
    }

    #[test]
    fn pagination_terminates_without_duplicates() {
        let registry = sample();
        let all = collect_all(&registry, 2).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(registry.calls.get(), 3);
        let ids: HashSet<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn repeated_cursor_stops_walk() {
        let mut calls = 0;
        let walk = Pages::new(|_| {
            calls += 1;
            Ok(RegistryPage {
                servers: vec![],
                next_cursor: Some("same".into()),
            })
        });
        assert_eq!(walk.count(), 2);
        assert_eq!(calls, 2);
    }

    #[test]
    fn page_error_ends_iteration() {
        let mut walk = Pages::new(|_| Err(Error::ServerNotFound { identifier: "x".into() }));
        assert!(matches!(walk.next(), Some(Err(_))));
        assert!(walk.next().is_none());
    }

    #[test]
    fn search_is_case_insensitive_on_name_and_description() {
        let registry = sample();
        let ids: Vec<_> = registry.search("GitHub").unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);

        let ids: Vec<_> = registry.search("mongodb").unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["5"]);
    }

    #[test]
    fn empty_search_returns_all() {
        assert_eq!(sample().search("").unwrap().len(), 5);
    }

    #[test]
    fn find_by_name_matches_short_name() {
        let found = sample().find_by_name("azure-mcp").unwrap();
        assert_eq!(found.id, "3");
        let found = sample().find_by_name("IO.GITHUB.FELORES/GITHUB").unwrap();
        assert_eq!(found.id, "1");
    }

    #[test]
    fn find_by_name_ambiguous() {
        let err = sample().find_by_name("redis-mcp-server").unwrap_err();
        match err {
            Error::Ambiguous { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn find_by_name_not_found() {
        let err = sample().find_by_name("github-tools").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn looks_like_id_only_for_uuids() {
        assert!(looks_like_id("428785c9-039e-47f6-9636-cbe289cc1990"));
        assert!(!looks_like_id("redis-mcp-server"));
        assert!(!looks_like_id("123"));
    }

    #[test]
    fn retry_only_network_errors() {
        let mut calls = 0;
        let result: Result<()> = with_retry(3, Duration::ZERO, || {
            calls += 1;
            Err(Error::ServerNotFound { identifier: "x".into() })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    /// A real connection-refused error from a port nothing listens on.
    fn refused() -> Error {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = RegistryClient::with_url(&format!("http://{addr}/v0"), Duration::from_secs(1)).unwrap();
        client.list_available(1, None).unwrap_err()
    }

    #[test]
    fn retry_network_errors_up_to_attempts() {
        let mut calls = 0;
        let result: Result<()> = with_retry(3, Duration::ZERO, || {
            calls += 1;
            Err(refused())
        });
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Network);
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_stops_after_recovery() {
        let mut calls = 0;
        let result = with_retry(5, Duration::ZERO, || {
            calls += 1;
            if calls < 2 {
                Err(refused())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn invalid_base_url_rejected() {
        let err = RegistryClient::with_url("not a url", Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn endpoints_escape_ids() {
        let client = RegistryClient::with_url("http://localhost:1/v0/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint(&["servers"]).as_str(), "http://localhost:1/v0/servers");
        assert_eq!(
            client.endpoint(&["servers", "a/b"]).as_str(),
            "http://localhost:1/v0/servers/a%2Fb"
        );
    }
}
