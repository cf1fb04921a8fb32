//! Remote host addressing.
//!
//! A remote location can be reached over two network paths, the local
//! network and the internet. Reachability is decided with a plain TCP
//! connect to the ssh port, after resolving the address through the
//! user's `~/.ssh/config` the same way `ssh` itself would pick a
//! `HostName` and `Port` for it.

use crate::backup::shell::expand_home;
use bon::Builder;
use derive_more::Display;
use getset::{CopyGetters, Getters};
use globset::GlobBuilder;
use serde::Deserialize;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace, warn};
use validator::{Validate, ValidationError};
use walkdir::{DirEntry, WalkDir};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_INCLUDE_DEPTH: usize = 16;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum NetworkPath {
    #[display("local network")]
    Local,
    #[display("internet")]
    Remote,
}

#[derive(Clone, Debug, Deserialize, Builder, Getters, CopyGetters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SshAddress {
    #[builder(into)]
    #[getset(get = "pub")]
    addr: String,
    #[getset(get_copy = "pub")]
    port: Option<u16>,
}

#[derive(Clone, Debug, Deserialize, Builder, Getters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SshCredentials {
    #[builder(into)]
    user: Option<String>,
    #[builder(into)]
    keyfile: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Validate, Builder, Getters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = validate_ssh))]
#[getset(get = "pub")]
pub struct SshConfig {
    credentials: Option<SshCredentials>,
    local: Option<SshAddress>,
    remote: Option<SshAddress>,
}

fn validate_ssh(ssh: &SshConfig) -> Result<(), ValidationError> {
    if ssh.local.is_none() && ssh.remote.is_none() {
        return Err(ValidationError::new("NoNetworkPath")
            .with_message("ssh needs at least one of `local` or `remote`".into()));
    }
    if let Some(address) = ssh.network_paths().find(|(_, a)| a.addr.trim().is_empty()) {
        return Err(ValidationError::new("EmptyAddress")
            .with_message(format!("ssh {} address is empty", address.0).into()));
    }
    if let Some(SshCredentials {
        user: None,
        keyfile: None,
    }) = &ssh.credentials
    {
        return Err(ValidationError::new("EmptyCredentials")
            .with_message("ssh credentials need a user or a keyfile".into()));
    }
    Ok(())
}

impl SshConfig {
    pub fn address(&self, path: NetworkPath) -> Option<&SshAddress> {
        match path {
            NetworkPath::Local => self.local.as_ref(),
            NetworkPath::Remote => self.remote.as_ref(),
        }
    }

    /// Configured network paths, local network first.
    pub fn network_paths(&self) -> impl Iterator<Item = (NetworkPath, &SshAddress)> {
        [NetworkPath::Local, NetworkPath::Remote]
            .into_iter()
            .filter_map(|path| self.address(path).map(|address| (path, address)))
    }

    pub fn user(&self) -> Option<&str> {
        self.credentials.as_ref().and_then(|c| c.user.as_deref())
    }

    pub fn keyfile(&self) -> Option<&Path> {
        self.credentials.as_ref().and_then(|c| c.keyfile.as_deref())
    }

    /// Expands `~` in the key file path.
    pub fn with_expanded_keyfile(mut self) -> Self {
        if let Some(credentials) = self.credentials.as_mut() {
            credentials.keyfile = credentials.keyfile.take().map(expand_home);
        }
        self
    }
}

/// One `Host` block of an ssh client configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Getters, CopyGetters)]
pub struct HostEntry {
    #[getset(get = "pub")]
    patterns: Vec<String>,
    #[getset(get = "pub")]
    hostname: Option<String>,
    #[getset(get_copy = "pub")]
    port: Option<u16>,
}

impl HostEntry {
    fn matches(&self, addr: &str) -> bool {
        self.patterns.iter().any(|p| p == addr) || self.hostname.as_deref() == Some(addr)
    }
}

/// Parses `path` and every file it includes. A missing file yields no
/// entries. Relative `Include` paths resolve against the directory of the
/// top-level file.
pub fn read_ssh_config<P: AsRef<Path>>(path: P) -> Vec<HostEntry> {
    let path = path.as_ref();
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut entries = Vec::new();
    read_into(path, &base_dir, 0, &mut entries);
    entries
}

fn read_into(path: &Path, base_dir: &Path, depth: usize, entries: &mut Vec<HostEntry>) {
    if depth > MAX_INCLUDE_DEPTH {
        warn!("Ignoring {path:?}, ssh config includes nested too deeply");
        return;
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!("Skipping ssh config {path:?}: {e}");
            return;
        }
    };
    trace!("Parsing ssh config {path:?}");

    let mut current: Option<HostEntry> = None;
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (keyword, args) = split_keyword(line);
        match keyword.to_ascii_lowercase().as_str() {
            "host" => {
                entries.extend(current.take());
                current = Some(HostEntry {
                    patterns: args.split_whitespace().map(str::to_string).collect(),
                    ..HostEntry::default()
                });
            }
            "match" => entries.extend(current.take()),
            "include" => {
                entries.extend(current.take());
                for pattern in args.split_whitespace() {
                    for included in expand_include(pattern, base_dir) {
                        read_into(&included, base_dir, depth + 1, entries);
                    }
                }
            }
            "hostname" => {
                if let Some(entry) = current.as_mut() {
                    entry.hostname.get_or_insert_with(|| args.to_string());
                }
            }
            "port" => {
                if let Some(entry) = current.as_mut() {
                    match args.parse() {
                        Ok(port) => {
                            entry.port.get_or_insert(port);
                        }
                        Err(_) => warn!("Ignoring invalid port {args:?} in {path:?}"),
                    }
                }
            }
            _ => {}
        }
    }
    entries.extend(current);
}

fn split_keyword(line: &str) -> (&str, &str) {
    match line.split_once(|c: char| c.is_whitespace() || c == '=') {
        Some((keyword, args)) => (
            keyword,
            args.trim_start_matches(|c: char| c.is_whitespace() || c == '=')
                .trim()
                .trim_matches('"'),
        ),
        None => (line, ""),
    }
}

fn is_glob_component(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

fn expand_include(pattern: &str, base_dir: &Path) -> Vec<PathBuf> {
    let expanded = expand_home(pattern);
    let full = if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    };

    let full_str = full.to_string_lossy().to_string();
    if !is_glob_component(&full_str) {
        return if full.is_file() { vec![full] } else { vec![] };
    }

    let mut walk_root = PathBuf::new();
    let mut glob_depth = 0;
    for component in full.components() {
        let text = component.as_os_str().to_string_lossy();
        if glob_depth > 0 || is_glob_component(&text) {
            glob_depth += 1;
        } else {
            walk_root.push(component);
        }
    }

    let matcher = match GlobBuilder::new(&full_str).literal_separator(true).build() {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => {
            warn!("Ignoring ssh config include {pattern:?}: {e}");
            return vec![];
        }
    };

    WalkDir::new(&walk_root)
        .min_depth(1)
        .max_depth(glob_depth)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(DirEntry::into_path)
        .filter(|path| path.is_file() && matcher.is_match(path))
        .collect()
}

pub fn find_host_entry<'a>(entries: &'a [HostEntry], addr: &str) -> Option<&'a HostEntry> {
    entries.iter().find(|entry| entry.matches(addr))
}

/// Address and port to probe for `address`. The ssh config `HostName`
/// replaces the address; the configured port wins over the config `Port`.
pub fn probe_target(address: &SshAddress, entries: &[HostEntry]) -> (String, u16) {
    let entry = find_host_entry(entries, &address.addr);
    let host = entry
        .and_then(|e| e.hostname.clone())
        .unwrap_or_else(|| address.addr.clone());
    let port = address
        .port
        .or_else(|| entry.and_then(|e| e.port))
        .unwrap_or(DEFAULT_SSH_PORT);
    (host, port)
}

pub fn probe_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok()),
        Err(e) => {
            debug!("Could not resolve {host}:{port}: {e}");
            false
        }
    }
}
