//! YAML configuration.
//!
//! The file names a set of locations and describes how backups flow between
//! them as a forest of execution nodes. Every struct rejects unknown keys so
//! that a typo fails loudly instead of silently changing what gets copied.

use crate::backup::highlight::HighlightColor;
use crate::backup::location::disk::DiskSetting;
use crate::backup::location::ssh::SshConfig;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::shell::expand_home;
use crate::backup::validate::validate_rsync_options;
use bon::Builder;
use derive_more::Display;
use getset::{CopyGetters, Getters};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use validator::{Validate, ValidationError};

pub const EXAMPLE_CONFIG: &str = include_str!("example.yaml");
pub const CONFIG_FILE_NAME: &str = "backupchain.yaml";

fn root_folder() -> String {
    "/".to_string()
}

fn one() -> usize {
    1
}

/// Per-role concurrency limits of a location.
#[derive(Clone, Copy, Debug, Deserialize, Validate, Builder, CopyGetters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[getset(get_copy = "pub")]
pub struct MaxThreads {
    #[serde(default = "one")]
    #[builder(default = one())]
    #[validate(range(min = 1))]
    read: usize,
    #[serde(default = "one")]
    #[builder(default = one())]
    #[validate(range(min = 1))]
    write: usize,
}

impl Default for MaxThreads {
    fn default() -> Self {
        Self { read: 1, write: 1 }
    }
}

#[derive(Clone, Debug, Deserialize, Validate, Builder, Getters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = validate_location))]
#[getset(get = "pub")]
pub struct LocationConfig {
    #[builder(into)]
    root: PathBuf,
    ssh: Option<SshConfig>,
    #[serde(default)]
    #[builder(default)]
    disk: DiskSetting,
    #[serde(default)]
    #[builder(default)]
    highlight_color: HighlightColor,
    #[serde(default)]
    #[builder(default)]
    max_threads: MaxThreads,
}

fn nested_error(code: &'static str, errors: validator::ValidationErrors) -> ValidationError {
    ValidationError::new(code).with_message(errors.to_string().into())
}

fn validate_location(location: &LocationConfig) -> std::result::Result<(), ValidationError> {
    if location.root.as_os_str().is_empty() {
        return Err(ValidationError::new("EmptyRoot").with_message("root must not be empty".into()));
    }
    if let Some(ssh) = &location.ssh {
        ssh.validate().map_err(|e| nested_error("InvalidSsh", e))?;
    }
    location
        .disk
        .validate()
        .map_err(|e| nested_error("InvalidDisk", e))?;
    location
        .max_threads
        .validate()
        .map_err(|e| nested_error("InvalidMaxThreads", e))
}

#[derive(Clone, Copy, Debug, Default, Display, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Transfer to a target, then let the target pass the data on.
    #[default]
    #[display("fullsync")]
    Fullsync,
    /// Let the target pass its current data on first, then overwrite it.
    #[display("shiftsync")]
    Shiftsync,
}

/// Settings of the edge coming into a node from its parent.
#[derive(Clone, Debug, Deserialize, Builder, Getters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct IncomingConfig {
    #[builder(into)]
    source_folder_override: Option<String>,
    #[serde(default = "root_folder")]
    #[builder(default = root_folder(), into)]
    dest_folder: String,
    rsync_options_merge: Option<Vec<String>>,
    rsync_options_override: Option<Vec<String>>,
}

impl Default for IncomingConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl IncomingConfig {
    pub fn merge_options(&self) -> &[String] {
        self.rsync_options_merge.as_deref().unwrap_or_default()
    }

    /// The override list, unless it is missing or empty.
    pub fn override_options(&self) -> Option<&[String]> {
        self.rsync_options_override
            .as_deref()
            .filter(|options| !options.is_empty())
    }
}

/// Settings of the edges going out of a node to its children.
#[derive(Clone, Debug, Deserialize, Builder, Getters, CopyGetters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OutgoingConfig {
    #[serde(default = "root_folder")]
    #[builder(default = root_folder(), into)]
    #[getset(get = "pub")]
    source_folder: String,
    #[getset(get_copy = "pub")]
    exec_mode: Option<ExecMode>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    parallelize: bool,
    #[getset(get = "pub")]
    rsync_options_merge: Option<Vec<String>>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    targets: Vec<ExecutionNodeConfig>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    failovers: Vec<ExecutionNodeConfig>,
}

impl Default for OutgoingConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl OutgoingConfig {
    pub fn merge_options(&self) -> &[String] {
        self.rsync_options_merge.as_deref().unwrap_or_default()
    }

    /// Targets followed by failovers.
    pub fn children(&self) -> impl Iterator<Item = &ExecutionNodeConfig> {
        self.targets.iter().chain(self.failovers.iter())
    }
}

/// A node is either written out in full or as the bare location name.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum NodeForm {
    Name(String),
    Node(NodeFields),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeFields {
    location: String,
    execution_group: Option<u8>,
    #[serde(default)]
    incoming: IncomingConfig,
    #[serde(default)]
    outgoing: OutgoingConfig,
}

#[derive(Clone, Debug, Deserialize, Builder, Getters, CopyGetters, PartialEq, Eq)]
#[serde(from = "NodeForm")]
pub struct ExecutionNodeConfig {
    #[builder(into)]
    #[getset(get = "pub")]
    location: String,
    #[getset(get_copy = "pub")]
    execution_group: Option<u8>,
    #[builder(default)]
    #[getset(get = "pub")]
    incoming: IncomingConfig,
    #[builder(default)]
    #[getset(get = "pub")]
    outgoing: OutgoingConfig,
}

impl From<NodeForm> for ExecutionNodeConfig {
    fn from(form: NodeForm) -> Self {
        match form {
            NodeForm::Name(location) => Self::builder().location(location).build(),
            NodeForm::Node(fields) => Self {
                location: fields.location,
                execution_group: fields.execution_group,
                incoming: fields.incoming,
                outgoing: fields.outgoing,
            },
        }
    }
}

impl From<&str> for ExecutionNodeConfig {
    fn from(location: &str) -> Self {
        NodeForm::Name(location.to_string()).into()
    }
}

#[derive(Clone, Debug, Deserialize, Validate, Builder, Getters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = validate_execution_tree))]
#[getset(get = "pub")]
pub struct BackupChainConfig {
    locations: BTreeMap<String, LocationConfig>,
    execution_tree: Vec<ExecutionNodeConfig>,
    #[serde(default)]
    #[builder(default)]
    rsync_defaults: Vec<String>,
}

fn validate_locations(
    locations: &BTreeMap<String, LocationConfig>,
) -> std::result::Result<(), ValidationError> {
    for (name, location) in locations {
        if name.trim().is_empty() {
            return Err(ValidationError::new("EmptyLocationName")
                .with_message("location names must not be empty".into()));
        }
        location.validate().map_err(|e| {
            ValidationError::new("InvalidLocation")
                .with_message(format!("location {name:?}: {e}").into())
        })?;
    }
    Ok(())
}

fn validate_execution_tree(config: &BackupChainConfig) -> std::result::Result<(), ValidationError> {
    validate_locations(&config.locations)?;
    validate_rsync_options(config.rsync_defaults.as_slice())?;
    config
        .execution_tree
        .iter()
        .try_for_each(|root| validate_node(root, &config.locations, true))
}

fn validate_node(
    node: &ExecutionNodeConfig,
    locations: &BTreeMap<String, LocationConfig>,
    is_root: bool,
) -> std::result::Result<(), ValidationError> {
    if !locations.contains_key(&node.location) {
        return Err(ValidationError::new("UnknownLocation")
            .with_message(format!("execution tree references undefined location {:?}", node.location).into()));
    }
    if !is_root && node.execution_group.is_some() {
        return Err(ValidationError::new("NestedExecutionGroup").with_message(
            format!("execution_group is only valid on tree roots, found on {:?}", node.location).into(),
        ));
    }
    validate_rsync_options(node.incoming.merge_options())?;
    if let Some(options) = &node.incoming.rsync_options_override {
        validate_rsync_options(options.as_slice())?;
    }
    validate_rsync_options(node.outgoing.merge_options())?;
    node.outgoing
        .children()
        .try_for_each(|child| validate_node(child, locations, false))
}

/// `./backupchain.yaml`, `~/.backupchain.yaml`, `/etc/backupchain.yaml`.
pub fn default_config_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(".").join(CONFIG_FILE_NAME),
        expand_home(format!("~/.{CONFIG_FILE_NAME}")),
        PathBuf::from("/etc").join(CONFIG_FILE_NAME),
    ]
}

impl BackupChainConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Loads the first of `paths` that exists and parses. Missing files are
    /// skipped quietly, broken ones with a warning.
    pub fn load_first(paths: &[PathBuf]) -> Result<(PathBuf, Self)> {
        for path in paths {
            let file = match File::open(path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Attempted to load YAML config file but did not find it at: {path:?}");
                    continue;
                }
                Err(e) => {
                    warn!("Could not open config file {path:?}: {e}");
                    continue;
                }
            };
            match serde_yml::from_reader::<_, Self>(file) {
                Ok(config) => {
                    debug!("Loaded valid YAML config file at {path:?}");
                    return Ok((path.clone(), config));
                }
                Err(e) => warn!("Invalid YAML config found at {path:?}: {e}"),
            }
        }
        Err(Error::ConfigNotFound(paths.to_vec()))
    }
}

/// Writes the bundled example configuration to `path`, refusing to replace
/// an existing file.
pub fn write_example_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path.as_ref())?;
    file.write_all(EXAMPLE_CONFIG.as_bytes())?;
    Ok(())
}
