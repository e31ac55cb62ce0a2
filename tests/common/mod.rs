//! Shared helpers for integration tests: a canned HTTP registry on localhost.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mcp_installer::RegistryClient;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

type Handler = dyn Fn(&str, &str) -> (u16, String) + Send + Sync;

/// Minimal HTTP/1.1 server answering GET requests from a routing closure.
///
/// The closure receives the path and the raw query string and returns a
/// status code and a JSON body. Every request line is recorded.
pub struct StubRegistry {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubRegistry {
    pub fn start(handler: impl Fn(&str, &str) -> (u16, String) + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let recorded = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&recorded);
                thread::spawn(move || serve(stream, &*handler, &recorded));
            }
        });

        Self {
            base_url: format!("http://{addr}/v0"),
            requests,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> RegistryClient {
        RegistryClient::with_url(&self.base_url, TEST_TIMEOUT).unwrap()
    }

    /// Request targets received so far, e.g. `/v0/servers?limit=100`.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve(stream: TcpStream, handler: &Handler, recorded: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) | Err(_) => break,
            Ok(_) if header == "\r\n" || header == "\n" => break,
            Ok(_) => {}
        }
    }

    let target = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
    recorded.lock().unwrap().push(target.clone());

    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let (status, body) = handler(path, query);

    let mut stream = stream;
    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        reason(status),
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

/// Value of `key` in a raw query string, without percent-decoding.
pub fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// A base URL nothing listens on.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/v0")
}

pub const REDIS_ID: &str = "428785c9-039e-47f6-9636-cbe289cc1990";
pub const AZURE_ID: &str = "0b8e2a6f-1e34-4e1f-9b9a-3f0ad2f6f7a1";

pub fn redis_summary() -> serde_json::Value {
    serde_json::json!({
        "id": REDIS_ID,
        "name": "io.github.microsoft/redis-mcp-server",
        "description": "Redis MCP server",
        "version_detail": {"version": "1.0.0", "is_latest": true}
    })
}

pub fn redis_details() -> serde_json::Value {
    serde_json::json!({
        "id": REDIS_ID,
        "name": "io.github.microsoft/redis-mcp-server",
        "description": "Redis MCP server",
        "version_detail": {"version": "1.0.0", "is_latest": true},
        "packages": [{
            "registry_name": "docker",
            "name": "mcr.microsoft.com/mcp/redis:1.0",
            "environment_variables": [
                {"name": "REDIS_URL", "description": "Connection string"}
            ]
        }]
    })
}

pub fn azure_summary() -> serde_json::Value {
    serde_json::json!({
        "id": AZURE_ID,
        "name": "io.github.azure/azure-mcp",
        "description": "Azure tools"
    })
}

pub fn azure_details() -> serde_json::Value {
    serde_json::json!({
        "id": AZURE_ID,
        "name": "io.github.azure/azure-mcp",
        "description": "Azure tools",
        "packages": [{
            "registry_name": "npm",
            "name": "@azure/mcp",
            "runtime_arguments": [
                {"type": "positional", "value_hint": "-y"},
                {"type": "positional", "value_hint": "@azure/mcp@latest"}
            ]
        }]
    })
}

/// Registry with the redis and azure servers on two pages.
pub fn two_page_registry() -> StubRegistry {
    StubRegistry::start(|path, query| match path {
        "/v0/servers" => match query_param(query, "cursor") {
            None => (
                200,
                serde_json::json!({"servers": [redis_summary()], "metadata": {"next_cursor": "page2"}}).to_string(),
            ),
            Some("page2") => (200, serde_json::json!({"servers": [azure_summary()]}).to_string()),
            Some(_) => (400, r#"{"error":"bad cursor"}"#.to_string()),
        },
        p if p == format!("/v0/servers/{REDIS_ID}") => (200, redis_details().to_string()),
        p if p == format!("/v0/servers/{AZURE_ID}") => (200, azure_details().to_string()),
        "/v0/health" => (200, r#"{"status":"ok","version":"1.2.0"}"#.to_string()),
        _ => (404, r#"{"error":"not found"}"#.to_string()),
    })
}
