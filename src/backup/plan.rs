//! A loaded configuration turned into live locations and execution trees,
//! plus the scheduling of roots by execution group.

use crate::backup::command::CommandRunner;
use crate::backup::config::{BackupChainConfig, ExecMode};
use crate::backup::execution_node::tree_view::legend;
use crate::backup::execution_node::{BackupOptions, ExecutionNode};
use crate::backup::location::Location;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{collect_results, Result};
use crate::backup::highlight::{bold, heading};
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct RunSummary {
    /// Roots that backed up to at least one target.
    completed: usize,
    /// Roots that had nothing to do or whose transfers all failed.
    skipped: usize,
}

impl RunSummary {
    fn record<I: IntoIterator<Item = bool>>(&mut self, outcomes: I) {
        for backed_up in outcomes {
            if backed_up {
                self.completed += 1;
            } else {
                self.skipped += 1;
            }
        }
    }
}

#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct BackupPlan {
    locations: BTreeMap<String, Arc<Location>>,
    trees: Vec<ExecutionNode>,
    /// Whether log output carries terminal colors.
    color: bool,
}

impl BackupPlan {
    pub fn from_config(
        config: &BackupChainConfig,
        runner: Arc<dyn CommandRunner>,
        color: bool,
    ) -> Result<Self> {
        let locations = config
            .locations()
            .iter()
            .map(|(name, location)| {
                Location::new(name, location, runner.clone())
                    .map(|l| (name.clone(), Arc::new(l.with_color(color))))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        let defaults: Arc<[String]> = config.rsync_defaults().clone().into();
        let trees = config
            .execution_tree()
            .iter()
            .map(|root| ExecutionNode::from_config(root, &locations, &defaults))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            locations,
            trees,
            color,
        })
    }

    /// Rejects names that are not defined or have no fsck configured.
    /// Names are compared case-insensitively.
    pub fn check_fsck_names<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        let find = |name: &str| {
            self.locations
                .values()
                .find(|location| location.name().eq_ignore_ascii_case(name))
        };
        let undefined = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| find(name).is_none())
            .map(str::to_string)
            .collect_vec();
        if !undefined.is_empty() {
            return Err(Error::FsckSelection {
                reason: "but are not defined in the config".to_string(),
                names: undefined,
            });
        }
        let disabled = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| find(name).is_some_and(|location| !location.can_fsck()))
            .map(str::to_string)
            .collect_vec();
        if !disabled.is_empty() {
            return Err(Error::FsckSelection {
                reason: "but do not have fsck enabled in the config".to_string(),
                names: disabled,
            });
        }
        Ok(())
    }

    /// Probes every location, mounting missing disks when allowed.
    pub fn analyze(&self, allow_automount: bool) {
        info!("{}", heading("Analyzing Backup Targets", self.color));
        for location in self.locations.values() {
            location.analyze(allow_automount);
        }
    }

    /// The legend followed by every tree.
    pub fn render(&self, color: bool) -> Vec<String> {
        legend(color)
            .into_iter()
            .chain(self.trees.iter().flat_map(|tree| tree.render_tree(color)))
            .collect()
    }

    pub fn show(&self) {
        info!("{}", heading("Confirm Backup Plan", self.color));
        for line in self.render(self.color) {
            info!("{line}");
        }
    }

    /// Runs grouped roots group by group in ascending order, each group's
    /// roots in parallel, then the ungrouped roots one at a time.
    pub fn run(&self, options: &BackupOptions) -> Result<RunSummary> {
        info!("{}", heading("Running Backups", self.color));
        let mut summary = RunSummary::default();
        let mut groups: BTreeMap<u8, Vec<&ExecutionNode>> = BTreeMap::new();
        let mut sequential = Vec::new();
        for tree in &self.trees {
            match tree.execution_group() {
                Some(group) => groups.entry(group).or_default().push(tree),
                None => sequential.push(tree),
            }
        }

        for (group, roots) in groups {
            info!("{}", bold(format!("Execution group {group} running."), self.color));
            let results = std::thread::scope(|s| {
                let handles = roots
                    .iter()
                    .map(|&root| s.spawn(move || root.backup(ExecMode::default(), options)))
                    .collect_vec();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect_vec()
            });
            summary.record(collect_results(results)?);
        }

        if !sequential.is_empty() {
            info!("{}", bold("Sequential backups running", self.color));
        }
        for root in sequential {
            summary.record([root.backup(ExecMode::default(), options)?]);
        }

        info!("{}", heading("Done", self.color));
        Ok(summary)
    }
}
