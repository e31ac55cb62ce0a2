//! Identity of an installed server: the docker image or npm package it launches.

use crate::models::ServerEntry;

/// How an identifier query is compared with installed servers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// Full string equality.
    #[default]
    Exact,
    /// Equality after stripping tag, version and digest from both sides.
    IgnoreTag,
    /// Installed candidate contains the query.
    Substring,
}

impl MatchMode {
    pub fn matches(self, query: &str, candidate: &str) -> bool {
        match self {
            MatchMode::Exact => query == candidate,
            MatchMode::IgnoreTag => strip_tag(query) == strip_tag(candidate),
            MatchMode::Substring => !query.is_empty() && candidate.contains(query),
        }
    }
}

/// Docker flags that consume the following argument.
const DOCKER_VALUE_FLAGS: &[&str] = &["-e", "--env", "-v", "--volume", "-p", "--publish"];
const DOCKER_PREFIX: &[&str] = &["docker", "run", "-i", "--rm"];

/// Image or package launched by `entry`, if it can be told from the args.
pub fn entry_identity(entry: &ServerEntry) -> Option<String> {
    match entry.command.as_str() {
        "docker" => docker_image(&entry.args),
        "npx" => npm_package(&entry.args),
        _ => None,
    }
}

/// First positional argument after `docker run` and its flags.
pub fn docker_image(args: &[String]) -> Option<String> {
    let mut i = args
        .iter()
        .take_while(|a| DOCKER_PREFIX.contains(&a.as_str()))
        .count();

    while i < args.len() {
        let arg = &args[i];
        if arg.starts_with('-') {
            i += if DOCKER_VALUE_FLAGS.contains(&arg.as_str()) { 2 } else { 1 };
        } else {
            return Some(arg.clone());
        }
    }
    None
}

/// Scoped or slash-qualified package among the args, `@latest` removed.
pub fn npm_package(args: &[String]) -> Option<String> {
    let package = args
        .iter()
        .find(|a| a.starts_with('@') || (a.contains('/') && !a.starts_with('-')));

    match package {
        Some(p) => Some(match p.split_once("@latest") {
            Some((name, _)) => name.to_string(),
            None => p.clone(),
        }),
        None => args.first().filter(|a| !a.starts_with('-')).cloned(),
    }
}

/// Drops a digest (`@sha256:...`), a docker tag (`:1.0`) or an npm version (`@1.2.3`).
pub fn strip_tag(reference: &str) -> &str {
    let reference = match reference.find("@sha256:") {
        Some(at) => &reference[..at],
        None => reference,
    };
    let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    let tail = &reference[last_slash..];

    if let Some(colon) = tail.rfind(':') {
        return &reference[..last_slash + colon];
    }
    match tail.rfind('@') {
        Some(at) if last_slash + at > 0 => &reference[..last_slash + at],
        _ => reference,
    }
}
