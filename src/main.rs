use backupchain::backup::command::SystemRunner;
use backupchain::backup::config::{
    default_config_paths, write_example_config, BackupChainConfig, CONFIG_FILE_NAME,
};
use backupchain::backup::execution_node::{BackupOptions, FsckSelection};
use backupchain::backup::location::fsck::FatalHook;
use backupchain::backup::plan::BackupPlan;
use backupchain::backup::result_error::error::Error;
use backupchain::backup::result_error::result::Result;
use backupchain::backup::result_error::WithMsg;
use clap::{ArgAction, Parser};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::{exit, Command};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};
use validator::Validate;

/// Chained rsync backups between folders, removable disks and remote hosts
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Show what would be transferred without changing anything
    #[arg(short, long)]
    dry_run: bool,
    /// Skip the fsck check of every location that has it enabled
    #[arg(long)]
    no_fsck: bool,
    /// Only check these locations
    #[arg(long, value_name = "NAME", num_args = 1.., requires = "no_fsck")]
    fsck_only: Vec<String>,
    /// Write an example config file to the current directory
    #[arg(long, conflicts_with = "edit")]
    init: bool,
    /// Open the config file in $EDITOR
    #[arg(long)]
    edit: bool,
    /// Log more, repeat for even more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Location of config file
    #[arg(long, value_name = "PATH")]
    yaml: Option<PathBuf>,
    /// Run without asking for confirmation
    #[arg(short, long)]
    yes: bool,
}

fn main() {
    let args = Args::parse();
    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = run(&args) {
        error!("{e}");
        exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    if args.init {
        write_example_config(CONFIG_FILE_NAME).with_msg(format!(
            "Could not create ./{CONFIG_FILE_NAME}, rename or delete any existing file first"
        ))?;
        info!("Initialized config file ./{CONFIG_FILE_NAME}");
        return Ok(());
    }

    let paths = args
        .yaml
        .clone()
        .map_or_else(default_config_paths, |path| vec![path]);
    if args.edit {
        return edit(&paths);
    }

    let (path, config) = BackupChainConfig::load_first(&paths)?;
    info!("Loaded config file from {path:?}");
    config
        .validate()
        .map_err(Error::from)
        .with_msg(format!("Config validation failed: {path:?}"))?;
    debug!("The config file was successfully validated against the schema");

    let color = std::io::stdout().is_terminal();
    let plan = BackupPlan::from_config(&config, Arc::new(SystemRunner), color)?;
    plan.check_fsck_names(&args.fsck_only)
        .with_msg("Exiting to prevent unexpected behavior")?;

    plan.analyze(!args.dry_run);
    plan.show();
    if !args.yes && !confirm()? {
        return Ok(());
    }

    let fsck = match (args.no_fsck, args.fsck_only.is_empty()) {
        (false, _) => FsckSelection::All,
        (true, true) => FsckSelection::Disabled,
        (true, false) => FsckSelection::only(&args.fsck_only),
    };
    let on_fatal: FatalHook = Arc::new(|e: &Error| {
        error!("{e}");
        exit(1);
    });
    let options = BackupOptions::builder()
        .dry_run(args.dry_run)
        .fsck(fsck)
        .on_fatal(on_fatal)
        .build();
    let summary = plan.run(&options)?;
    debug!(
        "{} roots backed up, {} had nothing to do",
        summary.completed(),
        summary.skipped()
    );
    Ok(())
}

fn confirm() -> Result<bool> {
    let stdin = std::io::stdin();
    loop {
        print!("\nConfirm? (y/n): ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        if stdin.read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        match answer.trim().to_lowercase().as_str() {
            "y" => return Ok(true),
            "n" => return Ok(false),
            _ => {}
        }
    }
}

fn edit(paths: &[PathBuf]) -> Result<()> {
    let Some(path) = paths.iter().find(|path| path.exists()) else {
        return Err(Error::ConfigNotFound(paths.to_vec()));
    };
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let status = Command::new(&editor)
        .arg(path)
        .status()
        .map_err(|source| Error::CommandSpawn {
            command: format!("{editor} {path:?}"),
            source,
        })?;
    if !status.success() {
        warn!("{editor} exited with {status}");
    }
    Ok(())
}
