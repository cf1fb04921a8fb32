//! # backupchain
//!
//! Chained rsync backups between local folders, removable disks and remote
//! hosts reached over ssh.
//!
//! ## Features
//!
//! - **Execution Trees**: Each location backs up to its targets, which pass the data on to theirs
//! - **Failovers**: Alternative targets used only when no primary target could be reached
//! - **Parallelism**: Per-node parallel fan-out and parallel execution groups, bounded per location
//! - **Removable Disks**: Mountpoint and volume UUID checks, automounting and a one-shot fsck
//! - **Remote Hosts**: Local network first, internet as the fallback, resolved through `~/.ssh/config`
//!
//! ## Quick Start
//!
//! ```no_run
//! use backupchain::backup::command::SystemRunner;
//! use backupchain::backup::config::BackupChainConfig;
//! use backupchain::backup::execution_node::BackupOptions;
//! use backupchain::backup::plan::BackupPlan;
//! use std::sync::Arc;
//!
//! let config = BackupChainConfig::from_yaml_str(&std::fs::read_to_string("backupchain.yaml")?)?;
//! let plan = BackupPlan::from_config(&config, Arc::new(SystemRunner), true)?;
//! plan.analyze(true);
//! plan.show();
//! plan.run(&BackupOptions::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
