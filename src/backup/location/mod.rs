//! Storage locations.
//!
//! A [`Location`] is one named endpoint a backup reads from or writes to: a
//! folder or a removable disk, on this machine or on a host reached over
//! ssh. It owns everything that has to be probed or serialized per endpoint:
//! cached availability, the reader/writer admission lock and the one-shot
//! filesystem check.

pub mod admission;
pub mod capability;
pub mod disk;
pub mod fsck;
pub mod ssh;

use crate::backup::command::{CommandOutput, CommandRunner, RunOptions};
use crate::backup::config::{LocationConfig, MaxThreads};
use crate::backup::function_path;
use crate::backup::highlight::{paint, HighlightColor};
use crate::backup::location::admission::{AdmissionGuard, AdmissionLock, Role};
use crate::backup::location::capability::{Folder, StorageCapability};
use crate::backup::location::disk::DiskConfig;
use crate::backup::location::fsck::{FatalHook, FsckStatus, Severity};
use crate::backup::location::ssh::{
    probe_reachable, probe_target, read_ssh_config, NetworkPath, SshAddress, SshConfig,
    PROBE_TIMEOUT,
};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;
use crate::backup::rsync::ConnectionParameters;
use crate::backup::shell::{expand_home, shell_quote};
use crossterm::style::Color;
use derive_more::Display;
use function_name::named;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum OperatingSystem {
    Linux,
    Darwin,
}

/// Where a location lives and what kind of medium backs it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocationKind {
    LocalFolder,
    LocalDisk(DiskConfig),
    RemoteFolder(SshConfig),
    RemoteDisk(SshConfig, DiskConfig),
}

impl LocationKind {
    fn new(ssh: Option<SshConfig>, disk: Option<DiskConfig>) -> Self {
        match (ssh, disk) {
            (None, None) => LocationKind::LocalFolder,
            (None, Some(disk)) => LocationKind::LocalDisk(disk),
            (Some(ssh), None) => LocationKind::RemoteFolder(ssh),
            (Some(ssh), Some(disk)) => LocationKind::RemoteDisk(ssh, disk),
        }
    }

    pub fn ssh(&self) -> Option<&SshConfig> {
        match self {
            LocationKind::RemoteFolder(ssh) | LocationKind::RemoteDisk(ssh, _) => Some(ssh),
            LocationKind::LocalFolder | LocationKind::LocalDisk(_) => None,
        }
    }

    pub fn medium(&self) -> &dyn StorageCapability {
        match self {
            LocationKind::LocalFolder | LocationKind::RemoteFolder(_) => &Folder,
            LocationKind::LocalDisk(disk) | LocationKind::RemoteDisk(_, disk) => disk,
        }
    }
}

#[derive(Debug, Default)]
struct LocationState {
    available: Option<bool>,
    host_available: Option<bool>,
    root_available: Option<bool>,
    network_path: Option<NetworkPath>,
    operating_system: Option<OperatingSystem>,
    executable_path: Option<String>,
}

pub struct Location {
    name: String,
    root: PathBuf,
    kind: LocationKind,
    highlight_color: HighlightColor,
    admission: AdmissionLock,
    state: Mutex<LocationState>,
    fsck_gate: Mutex<Option<FsckStatus>>,
    runner: Arc<dyn CommandRunner>,
    ssh_config_file: PathBuf,
    color: bool,
}

impl Debug for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Location")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Location {
    pub fn new<S: Into<String>>(
        name: S,
        config: &LocationConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let kind = LocationKind::new(
            config.ssh().clone().map(SshConfig::with_expanded_keyfile),
            config.disk().to_config(),
        );
        let mut root = expand_home(config.root());
        if kind.ssh().is_none() && root.is_relative() {
            root = std::env::current_dir()?.join(root);
        }
        // Drops trailing slashes so the root compares equal to df output.
        let root: PathBuf = root.components().collect();

        Ok(Self {
            name: name.into(),
            root,
            kind,
            highlight_color: *config.highlight_color(),
            admission: AdmissionLock::new(*config.max_threads()),
            state: Mutex::new(LocationState::default()),
            fsck_gate: Mutex::new(None),
            runner,
            ssh_config_file: expand_home("~/.ssh/config"),
            color: false,
        })
    }

    /// Resolves remote addresses through `path` instead of `~/.ssh/config`.
    pub fn with_ssh_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.ssh_config_file = path.as_ref().to_path_buf();
        self
    }

    /// Colors log output about this location.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn colored(&self) -> bool {
        self.color
    }

    /// Color for streamed command output, when `highlight` is requested
    /// and colored output is on.
    pub fn stream_color(&self, highlight: bool) -> Option<Color> {
        self.highlight_color.color().filter(|_| highlight && self.color)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_str(&self) -> String {
        self.root.to_string_lossy().to_string()
    }

    pub fn kind(&self) -> &LocationKind {
        &self.kind
    }

    pub fn highlight_color(&self) -> HighlightColor {
        self.highlight_color
    }

    pub fn max_threads(&self) -> MaxThreads {
        self.admission.limits()
    }

    pub fn is_remote(&self) -> bool {
        self.kind.ssh().is_some()
    }

    pub fn paint<S: AsRef<str>>(&self, text: S) -> String {
        self.highlight_color.paint(text, self.color)
    }

    pub fn painted_name(&self) -> String {
        self.paint(&self.name)
    }

    fn state(&self) -> MutexGuard<'_, LocationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached availability unless `force_check` is set or nothing is cached
    /// yet. A probe that errors counts as unavailable.
    pub fn available(&self, force_check: bool) -> bool {
        let cached = self.state().available;
        if let (Some(available), false) = (cached, force_check) {
            return available;
        }
        let available = self.check_availability().unwrap_or_else(|e| {
            warn!("Availability check for {} failed: {e}", self.name);
            false
        });
        self.state().available = Some(available);
        available
    }

    /// Availability as last computed, without probing.
    pub fn cached_available(&self) -> bool {
        self.state().available.unwrap_or(false)
    }

    fn invalidate_availability(&self) {
        self.state().available = None;
    }

    fn check_availability(&self) -> Result<bool> {
        if !self.probe_host() {
            return Ok(false);
        }
        let root = self.kind.medium().probe_root(self);
        self.state().root_available = Some(*root.as_ref().unwrap_or(&false));
        root
    }

    fn probe_host(&self) -> bool {
        let available = match self.kind.ssh() {
            None => true,
            Some(ssh) => {
                let entries = read_ssh_config(&self.ssh_config_file);
                let reachable = ssh.network_paths().find(|(path, address)| {
                    let (host, port) = probe_target(address, &entries);
                    debug!("Probing {} over the {path} at {host}:{port}", self.name);
                    probe_reachable(&host, port, PROBE_TIMEOUT)
                });
                self.state().network_path = reachable.map(|(path, _)| path);
                reachable.is_some()
            }
        };
        self.state().host_available = Some(available);
        available
    }

    pub fn network_path(&self) -> Option<NetworkPath> {
        self.state().network_path
    }

    fn host_status_message(&self) -> String {
        let (host_available, network_path) = {
            let state = self.state();
            (state.host_available, state.network_path)
        };
        let name = self.painted_name();
        match (host_available, self.kind.ssh(), network_path) {
            (None, _, _) => format!(
                "{name} is in an {} state. Please check for availability before using it.",
                paint("unknown", Some(Color::DarkGrey), self.color)
            ),
            (Some(true), Some(ssh), Some(path)) => {
                let addr = ssh.address(path).map(|a| a.addr().as_str()).unwrap_or_default();
                format!("{name} is {} at {}", self.paint(format!("available over the {path}")), self.paint(addr))
            }
            (Some(true), _, _) => format!("{name} is {}", self.paint("available")),
            (Some(false), _, _) => format!("{name} is {}", paint("unreachable", Some(Color::Red), self.color)),
        }
    }

    fn root_status_message(&self) -> String {
        let root = self.paint(self.root_str());
        match self.state().root_available {
            None => format!("{root} is in an {} state.", paint("unknown", Some(Color::DarkGrey), self.color)),
            Some(true) => format!("{root} is {}", self.paint("present")),
            Some(false) => format!("{root} is {}", paint("missing", Some(Color::Red), self.color)),
        }
    }

    pub fn status_message(&self) -> String {
        format!("{}\n{}", self.host_status_message(), self.root_status_message())
    }

    /// Forces an availability check and, when allowed, mounts a missing
    /// disk and checks again.
    pub fn analyze(&self, allow_automount: bool) {
        info!("Analyzing {}...", self.name);
        self.available(true);
        info!("{}", self.status_message());
        if allow_automount && self.can_automount() {
            info!("Attempting to automount disk on {}...", self.name);
            let success = self.automount();
            let outcome = if success {
                paint("succeeded", Some(Color::Green), self.color)
            } else {
                paint("failed", Some(Color::Red), self.color)
            };
            info!("Automounting disk on {} {outcome}", self.name);
            if success {
                info!("Re-analyzing {}...", self.name);
                self.available(true);
                info!("{}", self.status_message());
            }
        }
    }

    pub fn can_automount(&self) -> bool {
        let (host, root) = {
            let state = self.state();
            (state.host_available, state.root_available)
        };
        host == Some(true) && root != Some(true) && self.kind.medium().can_automount()
    }

    /// Mounts the disk if it is missing. Returns whether the root is
    /// available afterwards.
    pub fn automount(&self) -> bool {
        if self.state().root_available == Some(true) {
            return true;
        }
        if !self.can_automount() {
            return false;
        }
        match self.kind.medium().automount(self) {
            Ok(true) => debug!("Mount command succeeded on {}", self.name),
            Ok(false) => debug!("Mount command failed on {}", self.name),
            Err(e) => warn!("Automount on {} failed: {e}", self.name),
        }
        self.invalidate_availability();
        self.available(true)
    }

    pub fn can_fsck(&self) -> bool {
        self.kind.medium().can_fsck()
    }

    /// Runs a shell command on the location's host. Remote hosts are
    /// reached over ssh through the network path chosen during analysis.
    #[named]
    pub fn run_command(&self, command: &str, options: &RunOptions) -> Result<CommandOutput> {
        let command = match self.kind.ssh() {
            None => command.to_string(),
            Some(ssh) => self.ssh_command(ssh, command)?,
        };
        self.runner
            .run(&command, options)
            .with_debug_object_and_fn_name(self.name.clone(), function_path!())
    }

    fn selected_address<'a>(&self, ssh: &'a SshConfig) -> Result<&'a SshAddress> {
        self.network_path()
            .and_then(|path| ssh.address(path))
            .ok_or_else(|| Error::HostNotAnalyzed(self.name.clone()))
    }

    fn ssh_command(&self, ssh: &SshConfig, command: &str) -> Result<String> {
        let address = self.selected_address(ssh)?;
        let mut parts = vec!["ssh".to_string()];
        if let Some(port) = address.port() {
            parts.push(format!("-p {port}"));
        }
        if let Some(keyfile) = ssh.keyfile() {
            parts.push(format!("-i {}", shell_quote(keyfile.to_string_lossy())));
        }
        let user = ssh.user().map(|user| format!("{user}@")).unwrap_or_default();
        parts.push(format!("{user}{}", address.addr()));
        parts.push(shell_quote(command));
        Ok(parts.join(" "))
    }

    pub fn operating_system(&self) -> Result<OperatingSystem> {
        let cached = self.state().operating_system;
        if let Some(os) = cached {
            return Ok(os);
        }
        let uname = self.run_command("uname", &RunOptions::silenced())?;
        let uname = uname.output().trim().to_string();
        let os = match uname.to_lowercase().as_str() {
            "linux" => OperatingSystem::Linux,
            "darwin" => OperatingSystem::Darwin,
            _ => {
                return Err(Error::UnsupportedOperatingSystem {
                    location: self.name.clone(),
                    uname,
                })
            }
        };
        debug!("Detected {os} OS running on {}", self.name);
        self.state().operating_system = Some(os);
        Ok(os)
    }

    /// A Homebrew rsync when one is installed, else whatever `rsync` is on
    /// the host's path.
    pub fn rsync_executable_path(&self) -> Result<String> {
        let cached = self.state().executable_path.clone();
        if let Some(path) = cached {
            return Ok(path);
        }
        let found = self.run_command(
            "find /opt/homebrew/Cellar/rsync -name 'rsync' | grep 'bin'",
            &RunOptions::silenced(),
        )?;
        let path = found
            .output()
            .lines()
            .map(str::trim)
            .find(|line| line.contains("rsync"))
            .unwrap_or("rsync")
            .to_string();
        debug!("Found rsync executable for {} at {path}", self.painted_name());
        self.state().executable_path = Some(path.clone());
        Ok(path)
    }

    pub fn connection_parameters(&self) -> Result<ConnectionParameters> {
        let root = self.root_str();
        match self.kind.ssh() {
            None => Ok(ConnectionParameters::builder().root(root).build()),
            Some(ssh) => {
                let address = self.selected_address(ssh)?;
                Ok(ConnectionParameters::builder()
                    .host(address.addr().clone())
                    .maybe_port(address.port())
                    .root(root)
                    .maybe_user(ssh.user())
                    .maybe_keyfile(ssh.keyfile().map(Path::to_path_buf))
                    .build())
            }
        }
    }

    /// Blocks until this location can be read from.
    pub fn acquire_reader(&self) -> AdmissionGuard<'_> {
        self.admission.acquire(Role::Reader)
    }

    /// Blocks until this location can be written to.
    pub fn acquire_writer(&self) -> AdmissionGuard<'_> {
        self.admission.acquire(Role::Writer)
    }

    pub fn release_reader(&self) {
        self.admission.release(Role::Reader)
    }

    pub fn release_writer(&self) {
        self.admission.release(Role::Writer)
    }

    /// `(readers, writers)` currently admitted.
    pub fn admission_counts(&self) -> (usize, usize) {
        self.admission.counts()
    }

    pub fn fsck_status(&self) -> Option<FsckStatus> {
        *self.fsck_gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the filesystem check at most once per process. Later calls, and
    /// callers that were waiting on the first one, get the cached result.
    ///
    /// A fatal outcome marks the location unavailable, calls `on_fatal` and
    /// returns [`Error::FsckFatal`].
    pub fn run_fsck(
        &self,
        dry_run: bool,
        highlight: bool,
        on_fatal: Option<&FatalHook>,
    ) -> Result<FsckStatus> {
        let mut gate = self.fsck_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = *gate {
            debug!("Fsck already ran on {} with result: {status}", self.name);
            return if status.is_fatal() {
                Err(self.fatal_error(status))
            } else {
                Ok(status)
            };
        }

        let status = if !self.can_fsck() {
            FsckStatus::SkippedDisabled
        } else if dry_run {
            info!("Dry-run mode enabled. Skipping fsck check for {}.", self.painted_name());
            FsckStatus::SkippedDryRun
        } else {
            self.kind.medium().run_fsck(self, highlight)?
        };
        *gate = Some(status);
        drop(gate);
        self.handle_fsck_status(status, highlight, on_fatal)
    }

    fn fatal_error(&self, status: FsckStatus) -> Error {
        Error::FsckFatal {
            location: self.name.clone(),
            status,
        }
    }

    fn handle_fsck_status(
        &self,
        status: FsckStatus,
        highlight: bool,
        on_fatal: Option<&FatalHook>,
    ) -> Result<FsckStatus> {
        let color = self.stream_color(highlight);
        let name = self.painted_name();
        let root = self.paint(self.root_str());
        let message = match status {
            FsckStatus::Ok => format!("Fsck completed {} on {name}", paint("successfully", Some(Color::Green), self.color)),
            FsckStatus::SkippedDisabled => {
                format!("Location {name} does not have the fsck check enabled.")
            }
            FsckStatus::SkippedDryRun => format!("Fsck skipped on {name} in dry-run mode."),
            FsckStatus::NoMountpoint => {
                format!("Could not run fsck on {name}. Could not find mountpoint for {root}.")
            }
            FsckStatus::NoFsckTool => format!(
                "Could not run fsck on {name}. The filesystem on {root} does not have a compatible fsck executable on the host."
            ),
            FsckStatus::UnmountFailed => format!(
                "Could not run fsck on {name}. Could not unmount the filesystem at {root}."
            ),
            FsckStatus::CheckFailed => format!(
                "Could not run fsck on {name}. The drive is unmounted but the fsck check did not run or did not run correctly. Halting execution to prevent unintended consequences."
            ),
            FsckStatus::RemountFailed => format!(
                "Error running fsck on {name}. The volume could not be re-mounted at {root}. Halting execution to prevent unintended consequences."
            ),
        };
        let message = paint(message, color, self.color);

        match status.severity() {
            Severity::Ok => info!("{message}"),
            Severity::Skipped => debug!("{message}"),
            Severity::Recoverable => error!("{message}"),
            Severity::Fatal => {
                error!("{message}");
                {
                    let mut state = self.state();
                    state.available = Some(false);
                    state.root_available = Some(false);
                }
                let error = self.fatal_error(status);
                if let Some(hook) = on_fatal {
                    hook(&error);
                }
                return Err(error);
            }
        }
        Ok(status)
    }
}
