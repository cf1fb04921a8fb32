//! rsync command synthesis.
//!
//! Turns one source to target edge of the execution tree into a single rsync
//! invocation. Options from the defaults, the source node and the target's
//! incoming edge are flattened into a canonical list (bundled short flags
//! split apart, dashes stripped, duplicates dropped), then reassembled with
//! every single-letter flag in one leading `-xyz` group.

use bon::{builder, Builder};
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use tracing::debug;

use crate::backup::shell::{join_dir, shell_quote};

/// Filesystem metadata that is never worth replicating.
pub const EXCLUDED_METADATA: [&str; 7] = [
    ".DocumentRevisions-V100",
    ".Spotlight-V100",
    ".TemporaryItems",
    ".Trashes",
    ".fseventsd",
    ".DS_Store",
    "lost+found",
];

const DRY_RUN: &str = "dry-run";
const LIVE_RUN_FLAGS: [&str; 4] = ["n", "dry-run", "no-n", "no-dry-run"];

/// How to reach a location root. `host` is only set for remote locations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Builder, Getters)]
#[getset(get = "pub")]
pub struct ConnectionParameters {
    #[builder(into)]
    host: Option<String>,
    port: Option<u16>,
    #[builder(into)]
    root: String,
    #[builder(into)]
    user: Option<String>,
    #[builder(into)]
    keyfile: Option<PathBuf>,
}

impl ConnectionParameters {
    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    fn as_local(&self) -> Self {
        Self::builder().root(self.root.clone()).build()
    }
}

/// One side of a transfer, rendered as `[user@][host:]path`.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct Endpoint {
    user: Option<String>,
    host: Option<String>,
    path: String,
}

impl Endpoint {
    fn new(params: &ConnectionParameters, subpath: &str) -> Self {
        Self {
            user: params.user.clone().filter(|_| params.is_remote()),
            host: params.host.clone(),
            path: join_dir(&params.root, subpath),
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if let Some(host) = &self.host {
            write!(f, "{host}:")?;
        }
        write!(f, "{}", self.path)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

/// Where the command runs: a remote source pushing to a local target is
/// pulled by the target instead.
pub fn executing_side(source_remote: bool, target_remote: bool) -> Side {
    if source_remote && !target_remote {
        Side::Target
    } else {
        Side::Source
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct ReplicationCommand {
    #[getset(get = "pub")]
    executable: String,
    /// Canonical option names, without dashes.
    #[getset(get = "pub")]
    options: Vec<String>,
    #[getset(get = "pub")]
    transport: Option<String>,
    #[getset(get = "pub")]
    source: Endpoint,
    #[getset(get = "pub")]
    destination: Endpoint,
}

impl ReplicationCommand {
    pub fn flags(&self) -> Vec<String> {
        assemble_flags(&self.options)
    }

    pub fn to_shell_string(&self) -> String {
        self.to_string()
    }
}

impl Display for ReplicationCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.executable)?;
        for flag in self.flags() {
            write!(f, " {flag}")?;
        }
        if let Some(transport) = &self.transport {
            write!(f, " -e \"{transport}\"")?;
        }
        write!(f, " \"{}\" \"{}\"", self.source, self.destination)
    }
}

/// A non-empty override replaces everything. Otherwise defaults, source
/// merge list and target merge list are concatenated in that order.
pub fn resolve_options(
    defaults: &[String],
    source_merge: &[String],
    target_merge: &[String],
    target_override: Option<&[String]>,
) -> Vec<String> {
    match target_override {
        Some(options) if !options.is_empty() => options.to_vec(),
        _ => defaults
            .iter()
            .chain(source_merge)
            .chain(target_merge)
            .cloned()
            .collect(),
    }
}

/// Splits `-abc` into `a`, `b`, `c`, strips leading dashes, drops empty
/// entries and keeps the first occurrence of each option.
pub fn normalize_options<S: AsRef<str>>(options: &[S]) -> Vec<String> {
    options
        .iter()
        .map(AsRef::as_ref)
        .flat_map(|option| {
            if option.starts_with("--") {
                vec![option.trim_start_matches('-').to_string()]
            } else if let Some(bundle) = option.strip_prefix('-') {
                bundle.chars().map(String::from).collect()
            } else {
                vec![option.to_string()]
            }
        })
        .filter(|option| !option.trim().is_empty())
        .unique()
        .collect()
}

/// Puts `dry-run` first and removes every other flag that would contradict
/// or duplicate it.
pub fn force_dry_run(options: Vec<String>) -> Vec<String> {
    std::iter::once(DRY_RUN.to_string())
        .chain(
            options
                .into_iter()
                .filter(|option| !LIVE_RUN_FLAGS.contains(&option.as_str())),
        )
        .collect()
}

fn with_exclusions(options: Vec<String>) -> Vec<String> {
    options
        .into_iter()
        .chain(EXCLUDED_METADATA.iter().map(|name| format!("exclude {name}")))
        .unique()
        .collect()
}

/// Single-letter options become one leading `-xyz` group, the rest become
/// `--name` flags in order.
pub fn assemble_flags(options: &[String]) -> Vec<String> {
    let (short, long): (Vec<&String>, Vec<&String>) =
        options.iter().partition(|option| option.chars().count() == 1);
    let group = (!short.is_empty()).then(|| format!("-{}", short.iter().join("")));
    group
        .into_iter()
        .chain(long.into_iter().map(|option| format!("--{option}")))
        .collect()
}

fn transport_for(remote: &ConnectionParameters) -> String {
    let mut transport = "ssh -Tx -o Compression=no".to_string();
    if let Some(port) = remote.port {
        transport.push_str(&format!(" -p {port}"));
    }
    if let Some(keyfile) = &remote.keyfile {
        transport.push_str(&format!(" -i {}", shell_quote(keyfile.to_string_lossy())));
    }
    transport
}

/// Builds the rsync command for one edge. `options` is the resolved list
/// from [`resolve_options`].
#[builder]
pub fn synthesize(
    #[builder(into)] executable: String,
    options: &[String],
    source: &ConnectionParameters,
    source_subpath: &str,
    target: &ConnectionParameters,
    dest_subpath: &str,
    #[builder(default)] dry_run: bool,
) -> ReplicationCommand {
    let mut options = normalize_options(options);
    if dry_run {
        options = force_dry_run(options);
    }
    debug!("Dry run mode: {dry_run}. Pre-processed rsync options: {options:?}");
    let options = with_exclusions(options);

    let (source, target, transport) = match (source.is_remote(), target.is_remote()) {
        (true, true) if source.host == target.host => (source.as_local(), target.as_local(), None),
        (true, false) => (source.clone(), target.clone(), Some(transport_for(source))),
        (false, true) => (source.clone(), target.clone(), Some(transport_for(target))),
        _ => (source.clone(), target.clone(), None),
    };

    ReplicationCommand {
        executable,
        options,
        transport,
        source: Endpoint::new(&source, source_subpath),
        destination: Endpoint::new(&target, dest_subpath),
    }
}
