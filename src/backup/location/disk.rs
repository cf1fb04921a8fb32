//! Removable disks.
//!
//! A disk location is a folder that must also be the mountpoint of a
//! filesystem, optionally a specific one identified by volume UUID. Disks can
//! be mounted on demand and checked with `fsck` before a transfer.

use crate::backup::command::{CommandOutput, RunOptions};
use crate::backup::location::capability::{folder_test_command, StorageCapability};
use crate::backup::location::fsck::FsckStatus;
use crate::backup::location::{Location, OperatingSystem};
use crate::backup::result_error::result::Result;
use crate::backup::shell::shell_quote;
use crate::backup::validate::validate_uuid;
use bon::Builder;
use getset::{CopyGetters, Getters};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use validator::{Validate, ValidationError};

/// How a missing disk gets mounted during analysis.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(from = "AutomountSetting")]
pub enum Automount {
    #[default]
    Off,
    /// Find the device by volume UUID and mount it at the root.
    ByUuid,
    /// `mount <root>`, relying on the host's fstab entry.
    Fstab,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AutomountSetting {
    Enabled(bool),
    Mode(AutomountMode),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum AutomountMode {
    Fstab,
}

impl From<AutomountSetting> for Automount {
    fn from(setting: AutomountSetting) -> Self {
        match setting {
            AutomountSetting::Enabled(false) => Automount::Off,
            AutomountSetting::Enabled(true) => Automount::ByUuid,
            AutomountSetting::Mode(AutomountMode::Fstab) => Automount::Fstab,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Validate, Builder, Getters, CopyGetters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = validate_disk_config))]
pub struct DiskConfig {
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    automount: Automount,
    #[builder(into)]
    #[getset(get = "pub")]
    uuid: Option<String>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    can_fsck: bool,
}

fn validate_disk_config(disk: &DiskConfig) -> std::result::Result<(), ValidationError> {
    if let Some(uuid) = &disk.uuid {
        validate_uuid(uuid)?;
    } else if disk.automount == Automount::ByUuid {
        return Err(ValidationError::new("MissingUuid")
            .with_message("automount: true needs a disk uuid".into()));
    }
    Ok(())
}

/// `disk:` accepts a bare flag or a full disk description.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DiskSetting {
    Enabled(bool),
    Options(DiskConfig),
}

impl Default for DiskSetting {
    fn default() -> Self {
        DiskSetting::Enabled(false)
    }
}

impl DiskSetting {
    pub fn to_config(&self) -> Option<DiskConfig> {
        match self {
            DiskSetting::Enabled(false) => None,
            DiskSetting::Enabled(true) => Some(DiskConfig::default()),
            DiskSetting::Options(config) => Some(config.clone()),
        }
    }
}

impl Validate for DiskSetting {
    fn validate(&self) -> std::result::Result<(), validator::ValidationErrors> {
        match self {
            DiskSetting::Enabled(_) => Ok(()),
            DiskSetting::Options(config) => config.validate(),
        }
    }
}

/// `key: value` pairs of `diskutil info` style output. Lines with more than
/// one colon are skipped.
fn parse_colon_pairs(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').map(str::trim).collect();
            match parts.as_slice() {
                [key, value] if !key.is_empty() => Some((key.to_string(), value.to_string())),
                _ => None,
            }
        })
        .collect()
}

/// Device and mountpoint of one `df -P` line. The mountpoint is everything
/// after the capacity column and may contain spaces.
fn df_entry(line: &str) -> Option<(&str, &str)> {
    let mut rest = line.trim();
    let mut device = "";
    for column in 0..5 {
        let (field, tail) = rest.split_once(char::is_whitespace)?;
        if column == 0 {
            device = field;
        }
        rest = tail.trim_start();
    }
    Some((device, rest)).filter(|(_, mountpoint)| !mountpoint.is_empty())
}

/// Device of the filesystem mounted exactly at `root` in `df -P` output.
fn mounted_device(df_output: &str, root: &str) -> Option<String> {
    df_output
        .lines()
        .skip(1)
        .filter_map(df_entry)
        .find(|(_, mountpoint)| *mountpoint == root)
        .map(|(device, _)| device.to_string())
}

/// Last entry of `df -P <path> | tail -n1` output.
fn last_df_entry(df_output: &str) -> Option<(&str, &str)> {
    df_output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .last()
        .and_then(df_entry)
}

/// `/proc/mounts` writes whitespace and backslashes in paths as octal escapes.
fn mounts_escape(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            ' ' => "\\040".to_string(),
            '\t' => "\\011".to_string(),
            '\n' => "\\012".to_string(),
            '\\' => "\\134".to_string(),
            c => c.to_string(),
        })
        .collect()
}

fn blkid_device(blkid_output: &str) -> Option<String> {
    blkid_output
        .lines()
        .next()
        .and_then(|line| line.split(':').next())
        .map(str::trim)
        .filter(|device| !device.is_empty())
        .map(str::to_string)
}

fn is_device_node(path: &str) -> bool {
    path.starts_with("/dev/")
}

fn succeeded(result: Result<CommandOutput>) -> bool {
    match result {
        Ok(output) => output.success(),
        Err(e) => {
            warn!("{e}");
            false
        }
    }
}

impl DiskConfig {
    fn uuid_matches(&self, location: &Location, device: &str) -> Result<bool> {
        let Some(uuid) = &self.uuid else {
            return Ok(true);
        };
        let silent = RunOptions::silenced();
        match location.operating_system()? {
            OperatingSystem::Linux => {
                let blkid = location.run_command(
                    &format!("sudo blkid --match-token UUID={}", uuid.to_lowercase()),
                    &silent,
                )?;
                Ok(blkid_device(blkid.output()).as_deref() == Some(device))
            }
            OperatingSystem::Darwin => {
                let info = location.run_command(&format!("diskutil info {device}"), &silent)?;
                let info = parse_colon_pairs(info.output());
                Ok(info.get("Volume UUID") == Some(&uuid.to_uppercase()))
            }
        }
    }

    fn fsck_linux(&self, location: &Location, highlight: bool) -> Result<FsckStatus> {
        let silent = RunOptions::silenced();
        let root = shell_quote(location.root_str());
        let df = location.run_command(&format!("df -P {root} | tail -n1"), &silent)?;
        let Some((part, mountpoint)) = last_df_entry(df.output()) else {
            return Ok(FsckStatus::NoMountpoint);
        };
        if !is_device_node(part) || mountpoint == "/" {
            return Ok(FsckStatus::NoMountpoint);
        }

        let mounts = location.run_command(
            &format!(
                "grep -F {} /proc/mounts",
                shell_quote(format!("{part} {} ", mounts_escape(mountpoint)))
            ),
            &silent,
        )?;
        let mount: Vec<&str> = mounts
            .output()
            .lines()
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .collect();
        let [spec, _, vfstype, mntops, ..] = mount.as_slice() else {
            return Ok(FsckStatus::NoMountpoint);
        };
        if !is_device_node(spec) {
            return Ok(FsckStatus::NoMountpoint);
        }

        let fsck = format!("fsck.{vfstype}");
        if !succeeded(location.run_command(&format!("which {fsck}"), &silent)) {
            return Ok(FsckStatus::NoFsckTool);
        }

        info!(
            "Checking partition {} mounted at {} on {}...",
            location.paint(spec),
            location.paint(mountpoint),
            location.name()
        );
        let spec = shell_quote(spec);
        if !succeeded(location.run_command(&format!("sudo umount {spec}"), &silent)) {
            return Ok(FsckStatus::UnmountFailed);
        }
        let streamed = RunOptions::builder()
            .maybe_color(location.stream_color(highlight))
            .build();
        if !succeeded(location.run_command(&format!("sudo {fsck} -fy {spec}"), &streamed)) {
            return Ok(FsckStatus::CheckFailed);
        }
        let remount = format!(
            "sudo mount {spec} --target {} --options {}",
            shell_quote(mountpoint),
            shell_quote(mntops)
        );
        if !succeeded(location.run_command(&remount, &silent)) {
            return Ok(FsckStatus::RemountFailed);
        }
        Ok(FsckStatus::Ok)
    }

    fn fsck_darwin(&self, location: &Location, highlight: bool) -> Result<FsckStatus> {
        let silent = RunOptions::silenced();
        let root = shell_quote(location.root_str());
        let df = location.run_command(&format!("df -P {root} | tail -n1"), &silent)?;
        let Some((part, mountpoint)) = last_df_entry(df.output()) else {
            return Ok(FsckStatus::NoMountpoint);
        };
        if !is_device_node(part) || mountpoint == "/" {
            return Ok(FsckStatus::NoMountpoint);
        }

        let info = location.run_command(&format!("diskutil info {part}"), &silent)?;
        let info = parse_colon_pairs(info.output());
        let node_ok = info.get("Device Node").is_some_and(|node| is_device_node(node));
        if !node_ok || info.get("Mount Point").is_some_and(|mp| mp == "/") {
            return Ok(FsckStatus::NoMountpoint);
        }
        let Some(bundle) = info.get("Type (Bundle)") else {
            return Ok(FsckStatus::NoFsckTool);
        };
        let fsck = format!("fsck_{bundle}");
        if !succeeded(location.run_command(&format!("which {fsck}"), &silent)) {
            return Ok(FsckStatus::NoFsckTool);
        }

        info!(
            "Checking partition {} mounted at {} on {}...",
            location.paint(part),
            location.paint(mountpoint),
            location.name()
        );
        if !succeeded(location.run_command(&format!("sudo diskutil unmount {part}"), &silent)) {
            return Ok(FsckStatus::UnmountFailed);
        }
        let streamed = RunOptions::builder()
            .maybe_color(location.stream_color(highlight))
            .build();
        if !succeeded(location.run_command(&format!("sudo {fsck} -fy {part}"), &streamed)) {
            return Ok(FsckStatus::CheckFailed);
        }
        if !succeeded(location.run_command(&format!("sudo diskutil mount {part}"), &silent)) {
            return Ok(FsckStatus::RemountFailed);
        }
        Ok(FsckStatus::Ok)
    }
}

impl StorageCapability for DiskConfig {
    fn probe_root(&self, location: &Location) -> Result<bool> {
        let root = location.root_str();
        let command = format!("{} && df -P {}", folder_test_command(&root), shell_quote(&root));
        let df = location.run_command(&command, &RunOptions::silenced())?;
        if !df.success() {
            return Ok(false);
        }
        match mounted_device(df.output(), &root) {
            Some(device) => self.uuid_matches(location, &device),
            None => {
                debug!("Nothing is mounted at {root} on {}", location.name());
                Ok(false)
            }
        }
    }

    fn can_automount(&self) -> bool {
        self.automount != Automount::Off
    }

    fn can_fsck(&self) -> bool {
        self.can_fsck
    }

    fn automount(&self, location: &Location) -> Result<bool> {
        let silent = RunOptions::silenced();
        let root = shell_quote(location.root_str());
        let uuid = match (self.automount, &self.uuid) {
            (Automount::Off, _) => return Ok(false),
            (Automount::Fstab, _) => {
                return Ok(succeeded(location.run_command(&format!("sudo mount {root}"), &RunOptions::default())));
            }
            (Automount::ByUuid, None) => return Ok(false),
            (Automount::ByUuid, Some(uuid)) => uuid,
        };

        match location.operating_system()? {
            OperatingSystem::Linux => {
                let blkid = location.run_command(
                    &format!("sudo blkid --match-token UUID={}", uuid.to_lowercase()),
                    &silent,
                )?;
                let Some(device) = blkid_device(blkid.output()) else {
                    debug!("No device with uuid {uuid} connected to {}", location.name());
                    return Ok(false);
                };
                let mount = format!("sudo mount {} --target {root}", shell_quote(device));
                Ok(succeeded(location.run_command(&mount, &RunOptions::default())))
            }
            OperatingSystem::Darwin => {
                let all = location.run_command("diskutil info -all", &silent)?;
                let wanted = uuid.to_uppercase();
                let node = all
                    .output()
                    .split("**********")
                    .map(parse_colon_pairs)
                    .find(|info| info.get("Volume UUID") == Some(&wanted))
                    .and_then(|info| info.get("Device Node").cloned());
                let Some(node) = node else {
                    debug!("No volume with uuid {wanted} connected to {}", location.name());
                    return Ok(false);
                };
                let mount = format!("diskutil mount {}", shell_quote(node));
                Ok(succeeded(location.run_command(&mount, &RunOptions::default())))
            }
        }
    }

    fn run_fsck(&self, location: &Location, highlight: bool) -> Result<FsckStatus> {
        if !self.can_fsck {
            return Ok(FsckStatus::SkippedDisabled);
        }
        info!("Running fsck on {}", location.painted_name());
        match location.operating_system()? {
            OperatingSystem::Linux => self.fsck_linux(location, highlight),
            OperatingSystem::Darwin => self.fsck_darwin(location, highlight),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_setting_forms() {
        let flag: DiskSetting = serde_yml::from_str("true").unwrap();
        assert_eq!(flag.to_config(), Some(DiskConfig::default()));

        let off: DiskSetting = serde_yml::from_str("false").unwrap();
        assert_eq!(off.to_config(), None);

        let full: DiskSetting =
            serde_yml::from_str("automount: fstab\ncan_fsck: true\n").unwrap();
        let config = full.to_config().unwrap();
        assert_eq!(config.automount(), Automount::Fstab);
        assert!(config.can_fsck());
    }

    #[test]
    fn test_automount_flag() {
        let config: DiskConfig =
            serde_yml::from_str("automount: true\nuuid: ABCD-1234\n").unwrap();
        assert_eq!(config.automount(), Automount::ByUuid);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_automount_by_uuid_needs_uuid() {
        let config: DiskConfig = serde_yml::from_str("automount: true\n").unwrap();
        assert!(config.validate().is_err());
        let setting = DiskSetting::Options(config);
        assert!(setting.validate().is_err());
    }

    #[test]
    fn test_unknown_disk_key_rejected() {
        assert!(serde_yml::from_str::<DiskConfig>("automount: sometimes\n").is_err());
        assert!(serde_yml::from_str::<DiskConfig>("mount: true\n").is_err());
    }

    #[test]
    fn test_mounted_device() {
        let df = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                  /dev/sdb1 961302540 1024 912447036 1% /mnt/backup\n";
        assert_eq!(mounted_device(df, "/mnt/backup").as_deref(), Some("/dev/sdb1"));
        assert_eq!(mounted_device(df, "/mnt"), None);

        let df = "Filesystem 512-blocks Used Available Capacity Mounted on\n\
                  /dev/disk4s1 100 1 99 1% /Volumes/My Backup\n";
        assert_eq!(
            mounted_device(df, "/Volumes/My Backup").as_deref(),
            Some("/dev/disk4s1")
        );
        assert_eq!(mounted_device(df, "Backup"), None);
    }

    #[test]
    fn test_df_entry_and_mounts_escape() {
        assert_eq!(
            last_df_entry("Filesystem ...\n/dev/sdb1 10 1 9 10% /mnt/old  disk\n\n"),
            Some(("/dev/sdb1", "/mnt/old  disk"))
        );
        assert_eq!(last_df_entry("/dev/sdb1 10 1 9\n"), None);
        assert_eq!(mounts_escape("/mnt/my backup"), "/mnt/my\\040backup");
    }

    #[test]
    fn test_blkid_device() {
        let out = "/dev/sdb1: UUID=\"0a1b\" BLOCK_SIZE=\"4096\" TYPE=\"ext4\"\n";
        assert_eq!(blkid_device(out).as_deref(), Some("/dev/sdb1"));
        assert_eq!(blkid_device(""), None);
    }

    #[test]
    fn test_parse_colon_pairs() {
        let info = "   Device Node:              /dev/disk4s1\n\
                    \n   Volume UUID:              0A1B\n   Mounted: Yes: maybe\n";
        let pairs = parse_colon_pairs(info);
        assert_eq!(pairs.get("Device Node").map(String::as_str), Some("/dev/disk4s1"));
        assert_eq!(pairs.get("Volume UUID").map(String::as_str), Some("0A1B"));
        assert!(!pairs.contains_key("Mounted"));
    }
}
