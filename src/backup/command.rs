//! Subprocess execution.
//!
//! Every external command (availability probes, fsck steps, rsync transfers)
//! goes through a [`CommandRunner`]. The system runner spawns `sh -c` and
//! streams the merged stdout/stderr into the log line by line while the
//! command runs.

use crate::backup::highlight::paint;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use bon::Builder;
use crossterm::style::Color;
use getset::{CopyGetters, Getters};
use std::fmt::Debug;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use tracing::{debug, info, trace};

/// How a command's output is surfaced while it runs.
#[derive(Clone, Debug, Default, Builder, Getters, CopyGetters)]
pub struct RunOptions {
    /// Log output at trace level instead of info.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    silent: bool,
    /// Prepended to every logged output line.
    #[builder(into)]
    #[getset(get = "pub")]
    prefix: Option<String>,
    /// Color applied to every logged output line.
    #[getset(get_copy = "pub")]
    color: Option<Color>,
}

impl RunOptions {
    pub fn silenced() -> Self {
        Self::builder().silent(true).build()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Getters, CopyGetters)]
pub struct CommandOutput {
    #[getset(get_copy = "pub")]
    success: bool,
    /// Merged stdout and stderr, one `\n` terminated line per output line.
    #[getset(get = "pub")]
    output: String,
}

impl CommandOutput {
    pub fn new<S: Into<String>>(success: bool, output: S) -> Self {
        Self {
            success,
            output: output.into(),
        }
    }
}

pub trait CommandRunner: Send + Sync + Debug {
    /// Runs `command` through the shell and waits for it to exit. Only a
    /// failure to spawn is an error; a non-zero exit is reported through
    /// [`CommandOutput::success`].
    fn run(&self, command: &str, options: &RunOptions) -> Result<CommandOutput>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &str, options: &RunOptions) -> Result<CommandOutput> {
        debug!("Running command: {}", command.trim_end());
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::CommandSpawn {
                command: command.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || forward_lines(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || forward_lines(err, tx));
        }
        drop(tx);

        let prefix = options.prefix().as_deref().unwrap_or("");
        let mut output = String::new();
        for line in rx {
            let shown = format!("{prefix}{}", paint(&line, options.color(), true));
            if options.silent() {
                trace!("{shown}");
            } else {
                info!("{shown}");
            }
            output.push_str(&line);
            output.push('\n');
        }

        let status = child.wait()?;
        Ok(CommandOutput::new(status.success(), output))
    }
}

/// Sends every line of `reader` until EOF. Bytes that are not UTF-8 are
/// replaced rather than ending the stream, so the pipe is drained to the end.
fn forward_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Stopped reading command output: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_runner_captures_both_streams() {
        let output = SystemRunner
            .run("echo out; echo err 1>&2", &RunOptions::silenced())
            .unwrap();
        assert!(output.success());
        assert!(output.output().contains("out\n"));
        assert!(output.output().contains("err\n"));
    }

    #[test]
    fn test_system_runner_reports_exit_status() {
        let output = SystemRunner.run("exit 3", &RunOptions::default()).unwrap();
        assert!(!output.success());
        assert!(output.output().is_empty());
    }

    #[test]
    fn test_system_runner_keeps_lines_after_invalid_utf8() {
        let output = SystemRunner
            .run(r"printf 'before\n\377\nafter\n'", &RunOptions::silenced())
            .unwrap();
        assert!(output.success());
        assert_eq!(output.output(), "before\n\u{fffd}\nafter\n");
    }

    #[test]
    fn test_run_options_builder() {
        let options = RunOptions::builder().prefix("Hom/Bac - ").build();
        assert_eq!(options.prefix().as_deref(), Some("Hom/Bac - "));
        assert!(!options.silent());
        assert!(options.color().is_none());
    }
}
