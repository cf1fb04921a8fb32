use crate::backup::command::RunOptions;
use crate::backup::location::fsck::FsckStatus;
use crate::backup::location::Location;
use crate::backup::result_error::result::Result;
use crate::backup::shell::shell_quote;
use std::fmt::Debug;

/// Medium-specific behavior of a location's root.
pub trait StorageCapability: Debug + Send + Sync {
    /// Whether the root exists and can be read and written on its host.
    fn probe_root(&self, location: &Location) -> Result<bool>;

    /// Whether the medium is configured to be mounted on demand.
    fn can_automount(&self) -> bool;

    /// Whether the medium is configured for a filesystem check.
    fn can_fsck(&self) -> bool;

    /// Tries to mount the medium at the location root. Returns whether the
    /// mount command succeeded.
    fn automount(&self, location: &Location) -> Result<bool>;

    /// Runs the check procedure and reports where it stopped.
    fn run_fsck(&self, location: &Location, highlight: bool) -> Result<FsckStatus>;
}

pub(crate) fn folder_test_command(root: &str) -> String {
    let root = shell_quote(root);
    format!("test -d {root} && test -r {root} && test -w {root}")
}

/// A plain directory, always mounted.
#[derive(Clone, Copy, Debug, Default)]
pub struct Folder;

impl StorageCapability for Folder {
    fn probe_root(&self, location: &Location) -> Result<bool> {
        let output = location.run_command(
            &folder_test_command(&location.root_str()),
            &RunOptions::silenced(),
        )?;
        Ok(output.success())
    }

    fn can_automount(&self) -> bool {
        false
    }

    fn can_fsck(&self) -> bool {
        false
    }

    fn automount(&self, _location: &Location) -> Result<bool> {
        Ok(false)
    }

    fn run_fsck(&self, _location: &Location, _highlight: bool) -> Result<FsckStatus> {
        Ok(FsckStatus::SkippedDisabled)
    }
}
