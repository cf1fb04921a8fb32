//! Outcome of the one-shot filesystem check run on a disk location before
//! it takes part in a transfer.

use crate::backup::result_error::error::Error;
use derive_more::Display;
use std::sync::Arc;

/// Called when a check leaves a disk unmounted or unchecked. The binary
/// installs a hook that exits the process.
pub type FatalHook = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum FsckStatus {
    #[display("completed successfully")]
    Ok,
    #[display("not enabled")]
    SkippedDisabled,
    #[display("skipped in dry-run mode")]
    SkippedDryRun,
    #[display("mountpoint not found")]
    NoMountpoint,
    #[display("no compatible fsck executable")]
    NoFsckTool,
    #[display("unmount failed")]
    UnmountFailed,
    #[display("check failed on the unmounted volume")]
    CheckFailed,
    #[display("remount failed")]
    RemountFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Skipped,
    Ok,
    Recoverable,
    Fatal,
}

impl FsckStatus {
    /// Numeric code used in logs. The dry-run skip has none.
    pub fn code(&self) -> Option<u8> {
        match self {
            FsckStatus::Ok => Some(0),
            FsckStatus::SkippedDisabled => Some(1),
            FsckStatus::SkippedDryRun => None,
            FsckStatus::NoMountpoint => Some(2),
            FsckStatus::NoFsckTool => Some(3),
            FsckStatus::UnmountFailed => Some(4),
            FsckStatus::CheckFailed => Some(5),
            FsckStatus::RemountFailed => Some(6),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            FsckStatus::SkippedDisabled | FsckStatus::SkippedDryRun => Severity::Skipped,
            FsckStatus::Ok => Severity::Ok,
            FsckStatus::NoMountpoint | FsckStatus::NoFsckTool | FsckStatus::UnmountFailed => {
                Severity::Recoverable
            }
            FsckStatus::CheckFailed | FsckStatus::RemountFailed => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
