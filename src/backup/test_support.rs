use crate::backup::command::{CommandOutput, CommandRunner, RunOptions};
use crate::backup::result_error::result::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
struct Rule {
    needle: String,
    output: CommandOutput,
    /// 1-based index of the first matching command the rule answers.
    from: usize,
}

/// Answers commands by substring rules instead of spawning them. The most
/// recently added matching rule wins; unmatched commands succeed silently.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    transfer_delay: Mutex<Option<Duration>>,
    active_transfers: AtomicUsize,
    max_active_transfers: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond<S: Into<String>, O: Into<String>>(&self, needle: S, success: bool, output: O) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.into(),
            output: CommandOutput::new(success, output),
            from: 1,
        });
        self
    }

    pub fn fail<S: Into<String>>(&self, needle: S) -> &Self {
        self.respond(needle, false, "")
    }

    /// Fails the `nth` command matching `needle` and every later one.
    pub fn fail_from<S: Into<String>>(&self, needle: S, nth: usize) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.into(),
            output: CommandOutput::new(false, ""),
            from: nth,
        });
        self
    }

    /// Makes every rsync invocation take `delay`, so overlapping transfers
    /// become observable through [`ScriptedRunner::max_concurrent_transfers`].
    pub fn delay_transfers(&self, delay: Duration) -> &Self {
        *self.transfer_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count<S: AsRef<str>>(&self, needle: S) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.contains(needle.as_ref()))
            .count()
    }

    pub fn transfers(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| is_transfer(c))
            .collect()
    }

    pub fn max_concurrent_transfers(&self) -> usize {
        self.max_active_transfers.load(Ordering::SeqCst)
    }
}

fn is_transfer(command: &str) -> bool {
    command.starts_with("rsync ") || command.contains("'rsync ")
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &str, _options: &RunOptions) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        if is_transfer(command) {
            let active = self.active_transfers.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active_transfers.fetch_max(active, Ordering::SeqCst);
            let delay = *self.transfer_delay.lock().unwrap();
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            self.active_transfers.fetch_sub(1, Ordering::SeqCst);
        }
        let rules = self.rules.lock().unwrap();
        Ok(rules
            .iter()
            .rev()
            .find(|rule| command.contains(&rule.needle) && self.count(&rule.needle) >= rule.from)
            .map(|rule| rule.output.clone())
            .unwrap_or_else(|| CommandOutput::new(true, "")))
    }
}
