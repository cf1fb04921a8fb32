//! The backup tree.
//!
//! Every node pairs a [`Location`] with the edges leading out of it: the
//! primary targets, which are all attempted, and the failovers, which are
//! only attempted when no primary target could be backed up to. A node
//! holds a reader admission on its own location while its edges run, and
//! every edge holds a writer admission on its target while transferring.

pub mod tree_view;

use crate::backup::command::RunOptions;
use crate::backup::config::{ExecMode, ExecutionNodeConfig, IncomingConfig};
use crate::backup::highlight::bold;
use crate::backup::location::fsck::FatalHook;
use crate::backup::location::ssh::NetworkPath;
use crate::backup::location::Location;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{collect_results, Result};
use crate::backup::rsync::{executing_side, resolve_options, synthesize, Side};
use bon::Builder;
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which locations get a filesystem check before taking part in a backup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FsckSelection {
    #[default]
    Disabled,
    All,
    /// Lowercased location names.
    Only(BTreeSet<String>),
}

impl FsckSelection {
    pub fn only<I: IntoIterator<Item = S>, S: AsRef<str>>(names: I) -> Self {
        FsckSelection::Only(
            names
                .into_iter()
                .map(|name| name.as_ref().to_lowercase())
                .collect(),
        )
    }

    pub fn includes(&self, name: &str) -> bool {
        match self {
            FsckSelection::Disabled => false,
            FsckSelection::All => true,
            FsckSelection::Only(names) => names.contains(&name.to_lowercase()),
        }
    }
}

#[derive(Clone, Default, Builder, Getters, CopyGetters)]
pub struct BackupOptions {
    #[builder(default)]
    #[getset(get_copy = "pub")]
    dry_run: bool,
    #[builder(default)]
    #[getset(get = "pub")]
    fsck: FsckSelection,
    #[getset(get = "pub")]
    on_fatal: Option<FatalHook>,
}

#[derive(Debug, Getters, CopyGetters)]
pub struct ExecutionNode {
    #[getset(get = "pub")]
    host: Arc<Location>,
    #[getset(get_copy = "pub")]
    execution_group: Option<u8>,
    #[getset(get = "pub")]
    incoming: IncomingConfig,
    #[getset(get = "pub")]
    source_folder: String,
    #[getset(get_copy = "pub")]
    exec_mode: Option<ExecMode>,
    #[getset(get_copy = "pub")]
    parallelize: bool,
    outgoing_options: Vec<String>,
    #[getset(get = "pub")]
    targets: Vec<ExecutionNode>,
    #[getset(get = "pub")]
    failovers: Vec<ExecutionNode>,
    rsync_defaults: Arc<[String]>,
}

fn abbreviation(name: &str) -> String {
    name.chars().take(3).collect()
}

impl ExecutionNode {
    pub fn from_config(
        config: &ExecutionNodeConfig,
        locations: &BTreeMap<String, Arc<Location>>,
        rsync_defaults: &Arc<[String]>,
    ) -> Result<Self> {
        let host = locations
            .get(config.location())
            .cloned()
            .ok_or_else(|| Error::UnknownLocation(config.location().clone()))?;
        let children = |nodes: &[ExecutionNodeConfig]| -> Result<Vec<Self>> {
            nodes
                .iter()
                .map(|node| Self::from_config(node, locations, rsync_defaults))
                .collect()
        };
        let outgoing = config.outgoing();

        Ok(Self {
            host,
            execution_group: config.execution_group(),
            incoming: config.incoming().clone(),
            source_folder: outgoing.source_folder().clone(),
            exec_mode: outgoing.exec_mode(),
            parallelize: outgoing.parallelize(),
            outgoing_options: outgoing.merge_options().to_vec(),
            targets: children(outgoing.targets().as_slice())?,
            failovers: children(outgoing.failovers().as_slice())?,
            rsync_defaults: rsync_defaults.clone(),
        })
    }

    /// Subfolder of this node's root sent to `target`.
    fn source_subpath_for<'a>(&'a self, target: &'a ExecutionNode) -> &'a str {
        target
            .incoming
            .source_folder_override()
            .as_deref()
            .unwrap_or(&self.source_folder)
    }

    /// Runs every edge below this node. `exec_mode` is inherited from the
    /// parent unless the node sets its own.
    ///
    /// Returns whether at least one transfer out of this node succeeded.
    pub fn backup(&self, exec_mode: ExecMode, options: &BackupOptions) -> Result<bool> {
        let planned_targets = self
            .targets
            .iter()
            .filter(|target| target.host.available(false))
            .collect_vec();
        let planned_failovers = self
            .failovers
            .iter()
            .filter(|failover| failover.host.available(false))
            .collect_vec();
        if !self.host.available(false) || (planned_targets.is_empty() && planned_failovers.is_empty()) {
            debug!("Nothing to back up from {}", self.host.name());
            return Ok(false);
        }
        let exec_mode = self.exec_mode.unwrap_or(exec_mode);

        let names = |nodes: &[&ExecutionNode]| nodes.iter().map(|n| n.host.painted_name()).join(", ");
        let failovers = if planned_failovers.is_empty() {
            String::new()
        } else {
            format!(" and failovers {}", names(planned_failovers.as_slice()))
        };
        let began = format!(
            "Began backup process for {} with planned targets {}{failovers}",
            self.host.painted_name(),
            names(planned_targets.as_slice())
        );
        info!("{}", bold(began, self.host.colored()));

        let backed_up = AtomicBool::new(false);
        let _reader = self.host.acquire_reader();
        if options.fsck().includes(self.host.name()) {
            check_filesystem(&self.host, self.parallelize, options)?;
        }

        let confirmed = planned_targets
            .into_iter()
            .filter(|target| target.host.available(true))
            .collect_vec();
        if self.parallelize {
            let backed_up = &backed_up;
            let results = std::thread::scope(|s| {
                let handles = confirmed
                    .iter()
                    .map(|&target| {
                        s.spawn(move || self.backup_to_target(target, exec_mode, options, true, backed_up))
                    })
                    .collect_vec();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect_vec()
            });
            collect_results(results)?;
        } else {
            for target in confirmed {
                self.backup_to_target(target, exec_mode, options, false, &backed_up)?;
            }
        }

        if !backed_up.load(Ordering::SeqCst) && !planned_failovers.is_empty() {
            warn!(
                "No primary targets have been backed up to for host {}. Using available failovers.",
                self.host.name()
            );
            if self.parallelize {
                warn!("As a precaution parallel execution will be disabled for these operations.");
            }
            let confirmed = planned_failovers
                .into_iter()
                .filter(|failover| failover.host.available(true))
                .collect_vec();
            for failover in confirmed {
                self.backup_to_target(failover, exec_mode, options, false, &backed_up)?;
            }
        }

        Ok(backed_up.load(Ordering::SeqCst))
    }

    fn backup_to_target(
        &self,
        target: &ExecutionNode,
        exec_mode: ExecMode,
        options: &BackupOptions,
        highlight: bool,
        backed_up: &AtomicBool,
    ) -> Result<()> {
        debug!(
            "Entered backup execution mode: {exec_mode} for {} to target {}",
            self.host.name(),
            target.host.name()
        );
        if exec_mode == ExecMode::Shiftsync {
            target.backup(ExecMode::Shiftsync, options)?;
        }

        {
            let _writer = target.host.acquire_writer();
            if !target.host.available(true) {
                info!(
                    "{} became unavailable, skipping backup from {}",
                    target.host.painted_name(),
                    self.host.painted_name()
                );
                return Ok(());
            }
            info!("{}", self.start_message(target, highlight));
            if options.fsck().includes(target.host.name()) {
                check_filesystem(&target.host, highlight, options)?;
            }

            let executor = match executing_side(self.host.is_remote(), target.host.is_remote()) {
                Side::Source => &self.host,
                Side::Target => &target.host,
            };
            let rsync_options = resolve_options(
                &self.rsync_defaults,
                &self.outgoing_options,
                target.incoming.merge_options(),
                target.incoming.override_options(),
            );
            let command = synthesize()
                .executable(executor.rsync_executable_path()?)
                .options(&rsync_options)
                .source(&self.host.connection_parameters()?)
                .source_subpath(self.source_subpath_for(target))
                .target(&target.host.connection_parameters()?)
                .dest_subpath(target.incoming.dest_folder())
                .dry_run(options.dry_run())
                .call();

            let prefix = format!(
                "{}/{} - ",
                self.host.paint(abbreviation(self.host.name())),
                target.host.paint(abbreviation(target.host.name()))
            );
            let run_options = RunOptions::builder()
                .prefix(prefix)
                .maybe_color(target.host.stream_color(highlight))
                .build();
            let output = executor.run_command(&command.to_shell_string(), &run_options)?;
            if output.success() {
                backed_up.store(true, Ordering::SeqCst);
                info!(
                    "Finished backing up {} to {}",
                    self.host.painted_name(),
                    target.host.painted_name()
                );
            } else {
                warn!(
                    "Backup from {} to {} did not complete successfully",
                    self.host.painted_name(),
                    target.host.painted_name()
                );
            }
        }

        if exec_mode == ExecMode::Fullsync {
            target.backup(ExecMode::Fullsync, options)?;
        }
        Ok(())
    }

    fn start_message(&self, target: &ExecutionNode, highlight: bool) -> String {
        let remotes = [&self.host, &target.host]
            .into_iter()
            .filter(|host| host.is_remote())
            .collect_vec();
        let over_internet = remotes
            .iter()
            .rev()
            .find(|host| host.network_path() == Some(NetworkPath::Remote));
        let route = match over_internet.or(remotes.last()) {
            None => "locally".to_string(),
            Some(host) => {
                let path = host.network_path().unwrap_or(NetworkPath::Local);
                format!("over the {}", host.paint(path.to_string()))
            }
        };
        let mut message = format!(
            "Backing up {} to {} {route}...",
            self.host.painted_name(),
            target.host.painted_name()
        );
        if highlight {
            message.push_str(&target.host.paint(" (Parallelized output will be colored)"));
        }
        message
    }
}

fn check_filesystem(location: &Location, highlight: bool, options: &BackupOptions) -> Result<()> {
    debug!(
        "Host {} {} configured for an fsck check.",
        location.painted_name(),
        if location.can_fsck() { "is" } else { "is not" }
    );
    location.run_fsck(options.dry_run(), highlight, options.on_fatal().as_ref())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::command::CommandRunner;
    use crate::backup::config::BackupChainConfig;
    use crate::backup::test_support::ScriptedRunner;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const LINUX_DISK_DF: &str =
        "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/sdb1 100 1 99 1% /mnt/storage\n";

    fn build(yaml: &str, runner: &Arc<ScriptedRunner>) -> Vec<ExecutionNode> {
        let config = BackupChainConfig::from_yaml_str(yaml).unwrap();
        let runner: Arc<dyn CommandRunner> = runner.clone();
        let locations: BTreeMap<String, Arc<Location>> = config
            .locations()
            .iter()
            .map(|(name, location)| {
                let location = Location::new(name, location, runner.clone())
                    .unwrap()
                    .with_ssh_config_file("/nonexistent/ssh_config");
                (name.clone(), Arc::new(location))
            })
            .collect();
        for location in locations.values() {
            location.available(true);
        }
        let defaults: Arc<[String]> = config.rsync_defaults().clone().into();
        config
            .execution_tree()
            .iter()
            .map(|node| ExecutionNode::from_config(node, &locations, &defaults).unwrap())
            .collect()
    }

    fn run(node: &ExecutionNode) -> bool {
        node.backup(ExecMode::Fullsync, &BackupOptions::default()).unwrap()
    }

    const CHAIN: &str = r#"
locations:
  Home: {root: /src}
  A: {root: /a}
  B: {root: /b}
execution_tree:
  - location: Home
    outgoing:
      targets:
        - location: A
          outgoing:
            targets: [B]
rsync_defaults: [-a]
"#;

    #[test]
    fn test_fsck_selection() {
        let only = FsckSelection::only(["Storage Drive"]);
        assert!(only.includes("storage drive"));
        assert!(only.includes("STORAGE DRIVE"));
        assert!(!only.includes("Home"));
        assert!(FsckSelection::All.includes("Home"));
        assert!(!FsckSelection::default().includes("Home"));
    }

    #[test]
    fn test_unknown_location_rejected() {
        let locations = BTreeMap::new();
        let defaults: Arc<[String]> = Arc::from(Vec::new());
        match ExecutionNode::from_config(&ExecutionNodeConfig::from("Nowhere"), &locations, &defaults) {
            Err(Error::UnknownLocation(name)) => assert_eq!(name, "Nowhere"),
            other => panic!("Expected UnknownLocation, got {other:?}"),
        }
    }

    #[test]
    fn test_no_available_targets_spawns_nothing() {
        let runner = ScriptedRunner::new();
        runner.fail("test -d '/a'").fail("test -d '/b'");
        let trees = build(
            r#"
locations:
  Home: {root: /src}
  A: {root: /a}
  B: {root: /b}
execution_tree:
  - location: Home
    outgoing:
      targets: [A]
      failovers: [B]
"#,
            &runner,
        );
        let before = runner.commands().len();
        assert!(!run(&trees[0]));
        assert_eq!(runner.commands().len(), before);
        assert_eq!(trees[0].host().admission_counts(), (0, 0));
    }

    #[test]
    fn test_unavailable_host_is_noop() {
        let runner = ScriptedRunner::new();
        runner.fail("test -d '/src'");
        let trees = build(CHAIN, &runner);
        let before = runner.commands().len();
        assert!(!run(&trees[0]));
        assert_eq!(runner.commands().len(), before);
    }

    #[test]
    fn test_target_lost_after_admission_is_skipped() {
        let runner = ScriptedRunner::new();
        // Seen during planning and when targets are confirmed, gone once
        // the writer admission is granted.
        runner.fail_from("test -d '/a'", 3);
        let trees = build(CHAIN, &runner);
        let target = &trees[0].targets()[0];
        assert!(target.host().cached_available());

        assert!(!run(&trees[0]));
        assert!(runner.transfers().is_empty());
        assert_eq!(runner.count("test -d '/a'"), 3);
        assert_eq!(runner.count("test -d '/b'"), 1);
        assert!(!target.host().cached_available());
        assert_eq!(trees[0].host().admission_counts(), (0, 0));
        assert_eq!(target.host().admission_counts(), (0, 0));
    }

    #[test]
    fn test_fullsync_transfers_before_recursing() {
        let runner = ScriptedRunner::new();
        let trees = build(CHAIN, &runner);
        assert!(run(&trees[0]));

        let transfers = runner.transfers();
        assert_eq!(transfers.len(), 2);
        assert!(transfers[0].contains("\"/src/\" \"/a/\""));
        assert!(transfers[1].contains("\"/a/\" \"/b/\""));
        assert!(transfers[0].starts_with("rsync -a --exclude .DocumentRevisions-V100"));
    }

    #[test]
    fn test_shiftsync_recurses_before_transfer() {
        let runner = ScriptedRunner::new();
        let trees = build(CHAIN, &runner);
        assert!(trees[0]
            .backup(ExecMode::Shiftsync, &BackupOptions::default())
            .unwrap());

        let transfers = runner.transfers();
        assert_eq!(transfers.len(), 2);
        assert!(transfers[0].contains("\"/a/\" \"/b/\""));
        assert!(transfers[1].contains("\"/src/\" \"/a/\""));
    }

    #[test]
    fn test_node_exec_mode_overrides_inherited() {
        let runner = ScriptedRunner::new();
        let trees = build(
            r#"
locations:
  Home: {root: /src}
  A: {root: /a}
  B: {root: /b}
execution_tree:
  - location: Home
    outgoing:
      exec_mode: shiftsync
      targets:
        - location: A
          outgoing:
            targets: [B]
"#,
            &runner,
        );
        assert!(run(&trees[0]));
        let transfers = runner.transfers();
        assert!(transfers[0].contains("\"/a/\" \"/b/\""));
        assert!(transfers[1].contains("\"/src/\" \"/a/\""));
    }

    #[test]
    fn test_failover_only_after_targets_fail() {
        let yaml = r#"
locations:
  Home: {root: /src}
  A: {root: /a}
  B: {root: /b}
execution_tree:
  - location: Home
    outgoing:
      targets: [A]
      failovers: [B]
"#;
        let runner = ScriptedRunner::new();
        let trees = build(yaml, &runner);
        assert!(run(&trees[0]));
        assert_eq!(runner.transfers().len(), 1);
        assert_eq!(runner.count("\"/b/\""), 0);

        let runner = ScriptedRunner::new();
        runner.fail("\"/a/\"");
        let trees = build(yaml, &runner);
        assert!(run(&trees[0]));
        let transfers = runner.transfers();
        assert_eq!(transfers.len(), 2);
        assert!(transfers[0].contains("\"/src/\" \"/a/\""));
        assert!(transfers[1].contains("\"/src/\" \"/b/\""));
    }

    #[test]
    fn test_failed_everything_returns_false() {
        let runner = ScriptedRunner::new();
        runner.fail("rsync -");
        let trees = build(
            r#"
locations:
  Home: {root: /src}
  A: {root: /a}
  B: {root: /b}
execution_tree:
  - location: Home
    outgoing:
      targets: [A]
      failovers: [B]
"#,
            &runner,
        );
        assert!(!run(&trees[0]));
        assert_eq!(runner.transfers().len(), 2);
    }

    #[test]
    fn test_edge_options_and_subfolders() {
        let runner = ScriptedRunner::new();
        let trees = build(
            r#"
locations:
  Home: {root: /home/user}
  A: {root: /mnt/a}
  B: {root: /mnt/b}
execution_tree:
  - location: Home
    outgoing:
      source_folder: /docs
      rsync_options_merge: [-az, --delete]
      targets:
        - location: A
          incoming:
            dest_folder: /backup
            rsync_options_merge: [-a, --progress]
        - location: B
          incoming:
            source_folder_override: /photos
            rsync_options_override: [-r]
rsync_defaults: [-v]
"#,
            &runner,
        );
        assert!(run(&trees[0]));
        let transfers = runner.transfers();
        assert!(transfers[0].starts_with("rsync -vaz --delete --progress --exclude"));
        assert!(transfers[0].ends_with("\"/home/user/docs/\" \"/mnt/a/backup/\""));
        assert!(transfers[1].starts_with("rsync -r --exclude"));
        assert!(transfers[1].ends_with("\"/home/user/photos/\" \"/mnt/b/\""));
    }

    #[test]
    fn test_dry_run_marks_every_transfer() {
        let runner = ScriptedRunner::new();
        let trees = build(CHAIN, &runner);
        let options = BackupOptions::builder().dry_run(true).build();
        assert!(trees[0].backup(ExecMode::Fullsync, &options).unwrap());
        for transfer in runner.transfers() {
            assert!(transfer.starts_with("rsync -a --dry-run"));
        }
    }

    #[test]
    fn test_parallel_edges_to_same_target_serialize() {
        let runner = ScriptedRunner::new();
        runner.delay_transfers(Duration::from_millis(100));
        let trees = build(
            r#"
locations:
  Home: {root: /src}
  Dst:
    root: /dst
    max_threads: {write: 1}
execution_tree:
  - location: Home
    outgoing:
      parallelize: true
      targets:
        - location: Dst
          incoming: {dest_folder: /x}
        - location: Dst
          incoming: {dest_folder: /y}
"#,
            &runner,
        );
        assert!(run(&trees[0]));
        assert_eq!(runner.transfers().len(), 2);
        assert_eq!(runner.max_concurrent_transfers(), 1);
        assert_eq!(trees[0].host().admission_counts(), (0, 0));
    }

    #[test]
    fn test_parallel_edges_to_distinct_targets_overlap() {
        let runner = ScriptedRunner::new();
        runner.delay_transfers(Duration::from_millis(300));
        let trees = build(
            r#"
locations:
  Home: {root: /src}
  A: {root: /a}
  B: {root: /b}
execution_tree:
  - location: Home
    outgoing:
      parallelize: true
      targets: [A, B]
"#,
            &runner,
        );
        assert!(run(&trees[0]));
        assert_eq!(runner.max_concurrent_transfers(), 2);
    }

    #[test]
    fn test_failovers_run_sequentially_but_their_children_do_not() {
        let runner = ScriptedRunner::new();
        runner.fail("\"/a/\"").delay_transfers(Duration::from_millis(300));
        let trees = build(
            r#"
locations:
  Home: {root: /src}
  A: {root: /a}
  B: {root: /b}
  C: {root: /c}
  D: {root: /d}
  E: {root: /e}
execution_tree:
  - location: Home
    outgoing:
      parallelize: true
      targets: [A]
      failovers:
        - location: B
          outgoing:
            parallelize: true
            targets: [C, D]
        - E
"#,
            &runner,
        );
        assert!(run(&trees[0]));

        let transfers = runner.transfers();
        assert_eq!(transfers.len(), 5);
        assert!(transfers[0].contains("\"/src/\" \"/a/\""));
        assert!(transfers[1].contains("\"/src/\" \"/b/\""));
        assert!(transfers[4].contains("\"/src/\" \"/e/\""));
        // Only the failover's own parallel children ever overlap.
        assert_eq!(runner.max_concurrent_transfers(), 2);
    }

    #[test]
    fn test_fatal_fsck_aborts_before_transfer() {
        let runner = ScriptedRunner::new();
        runner
            .respond("uname", true, "Linux\n")
            .respond("df -P '/mnt/storage'", true, LINUX_DISK_DF)
            .respond("| tail -n1", true, "/dev/sdb1 100 1 99 1% /mnt/storage\n")
            .respond("/proc/mounts", true, "/dev/sdb1 /mnt/storage ext4 rw 0 0\n")
            .fail("fsck.ext4 -fy");
        let trees = build(
            r#"
locations:
  Home: {root: /src}
  Storage:
    root: /mnt/storage
    disk: {can_fsck: true}
execution_tree:
  - location: Home
    outgoing:
      targets: [Storage]
"#,
            &runner,
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let hook: FatalHook = {
            let calls = calls.clone();
            Arc::new(move |_: &Error| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let options = BackupOptions::builder()
            .fsck(FsckSelection::All)
            .on_fatal(hook)
            .build();

        let error = trees[0].backup(ExecMode::Fullsync, &options).unwrap_err();
        assert!(error.is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(runner.transfers().is_empty());
        let storage = &trees[0].targets()[0];
        assert!(!storage.host().available(false));
        assert_eq!(storage.host().admission_counts(), (0, 0));
        assert_eq!(trees[0].host().admission_counts(), (0, 0));
    }

    #[test]
    fn test_fsck_runs_once_per_location() {
        let runner = ScriptedRunner::new();
        runner
            .respond("uname", true, "Linux\n")
            .respond("df -P '/mnt/storage'", true, LINUX_DISK_DF)
            .respond("| tail -n1", true, "/dev/sdb1 100 1 99 1% /mnt/storage\n")
            .respond("/proc/mounts", true, "/dev/sdb1 /mnt/storage ext4 rw 0 0\n");
        let trees = build(
            r#"
locations:
  Home: {root: /src}
  Storage:
    root: /mnt/storage
    disk: {can_fsck: true}
execution_tree:
  - location: Home
    outgoing:
      targets:
        - location: Storage
          incoming: {dest_folder: /one}
        - location: Storage
          incoming: {dest_folder: /two}
"#,
            &runner,
        );
        let options = BackupOptions::builder()
            .fsck(FsckSelection::only(["storage"]))
            .build();
        assert!(trees[0].backup(ExecMode::Fullsync, &options).unwrap());
        assert_eq!(runner.transfers().len(), 2);
        assert_eq!(runner.count("sudo fsck.ext4 -fy"), 1);
    }

    #[test]
    fn test_remote_source_is_pulled_by_local_target() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let runner = ScriptedRunner::new();
        let trees = build(
            &format!(
                r#"
locations:
  Server:
    root: /srv/backup
    ssh:
      credentials: {{user: backup}}
      local: {{addr: 127.0.0.1, port: {port}}}
  Local: {{root: /dst}}
execution_tree:
  - location: Server
    outgoing:
      targets: [Local]
"#
            ),
            &runner,
        );
        assert!(run(&trees[0]));

        let transfers = runner.transfers();
        assert_eq!(transfers.len(), 1);
        assert!(transfers[0].starts_with("rsync "));
        assert!(transfers[0].contains(&format!("-e \"ssh -Tx -o Compression=no -p {port}\"")));
        assert!(transfers[0].ends_with("\"backup@127.0.0.1:/srv/backup/\" \"/dst/\""));
    }

    #[test]
    fn test_local_source_pushes_to_remote_target() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let runner = ScriptedRunner::new();
        let trees = build(
            &format!(
                r#"
locations:
  Home: {{root: /src}}
  Server:
    root: /srv/backup
    ssh:
      credentials: {{user: backup}}
      local: {{addr: 127.0.0.1, port: {port}}}
execution_tree:
  - location: Home
    outgoing:
      targets: [Server]
"#
            ),
            &runner,
        );
        assert!(run(&trees[0]));

        let transfers = runner.transfers();
        assert_eq!(transfers.len(), 1);
        assert!(transfers[0].starts_with("rsync "));
        assert!(transfers[0].ends_with("\"/src/\" \"backup@127.0.0.1:/srv/backup/\""));
    }

    #[test]
    fn test_start_message_names_route() {
        let runner = ScriptedRunner::new();
        let trees = build(CHAIN, &runner);
        let target = &trees[0].targets()[0];
        let message = trees[0].start_message(target, false);
        assert!(message.starts_with("Backing up Home to A locally..."));
    }
}
