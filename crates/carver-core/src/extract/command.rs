//! External command execution for extraction rules.
//!
//! A rule's command is either a template run as one or more child processes,
//! or an in-process callable. Templates understand two placeholders:
//!
//! - `%e` is replaced with the carved file,
//! - `%%name%%` is replaced with a fresh unique path derived from `name`.
//!
//! `&&` splits a template into sub-commands that run in order. Only the exit
//! code of the last one decides whether the rule succeeded.

use super::naming::unique_file_name;
use super::rules::ExitCodes;
use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Placeholder replaced with the carved file
pub const FILE_PLACEHOLDER: &str = "%e";

/// Delimiter around unique-path placeholders
pub const UNIQUE_PATH_DELIMITER: &str = "%%";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Signature of an in-process extractor
pub type Callable = dyn Fn(&Path) -> Result<bool> + Send + Sync;

/// What a rule runs after carving
#[derive(Clone)]
pub enum RuleCommand {
    /// Shell-like command template
    External(String),
    /// In-process extractor
    Internal {
        /// Name shown in logs
        name: String,
        /// The extractor
        run: Arc<Callable>,
    },
}

impl RuleCommand {
    /// Wraps a callable
    pub fn internal(
        name: impl Into<String>,
        run: impl Fn(&Path) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            name: name.into(),
            run: Arc::new(run),
        }
    }
}

impl fmt::Debug for RuleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External(template) => f.debug_tuple("External").field(template).finish(),
            Self::Internal { name, .. } => f.debug_struct("Internal").field("name", name).finish(),
        }
    }
}

impl fmt::Display for RuleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External(template) => f.write_str(template),
            Self::Internal { name, .. } => write!(f, "<{}>", name),
        }
    }
}

/// Outcome of running a rule's command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Exit code accepted by the rule
    Success,
    /// Exit code rejected, or the command timed out
    Failure,
    /// The command could not be started
    Unknown,
}

impl CommandStatus {
    /// Whether the next rule should be tried
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Record of one command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Overall outcome
    pub status: CommandStatus,
    /// The expanded command line(s) that were run
    pub command_line: String,
    /// Exit code of the last sub-command, if it exited normally
    pub exit_code: Option<i32>,
}

impl Execution {
    fn unknown(command_line: String) -> Self {
        Self {
            status: CommandStatus::Unknown,
            command_line,
            exit_code: None,
        }
    }
}

/// Runs rule commands
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
    show_output: bool,
}

impl CommandRunner {
    /// Creates a runner without timeout that discards command output
    pub fn new() -> Self {
        Self::default()
    }

    /// Kills commands that run longer than `timeout`
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lets commands write to the terminal
    pub fn show_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }

    /// Runs `command` on `carved` inside `working_dir`
    pub fn execute(
        &self,
        command: &RuleCommand,
        carved: &Path,
        codes: &ExitCodes,
        working_dir: &Path,
    ) -> Execution {
        match command {
            RuleCommand::Internal { name, run } => {
                debug!("Running internal extractor '{}' on {}", name, carved.display());
                let status = match run(carved) {
                    Ok(true) => CommandStatus::Success,
                    Ok(false) => CommandStatus::Failure,
                    Err(e) => {
                        warn!("Internal extractor '{}' failed: {}", name, e);
                        CommandStatus::Unknown
                    }
                };
                Execution {
                    status,
                    command_line: format!("<{}>", name),
                    exit_code: None,
                }
            }
            RuleCommand::External(template) => {
                self.execute_template(template, carved, codes, working_dir)
            }
        }
    }

    fn execute_template(
        &self,
        template: &str,
        carved: &Path,
        codes: &ExitCodes,
        working_dir: &Path,
    ) -> Execution {
        let expanded = expand_unique_paths(template, working_dir);
        let file = file_argument(carved, working_dir);

        let mut exit_code = None;
        let mut last_status = CommandStatus::Unknown;
        let mut lines = Vec::new();

        for part in expanded.split("&&") {
            let line = part.trim().replace(FILE_PLACEHOLDER, &file);
            if line.is_empty() {
                continue;
            }

            let words = match split_words(&line) {
                Ok(words) => words,
                Err(e) => {
                    warn!("Cannot parse command '{}': {}", line, e);
                    return Execution::unknown(line);
                }
            };
            lines.push(line.clone());

            let Some((program, args)) = words.split_first() else {
                continue;
            };

            debug!("Executing '{}' in {}", line, working_dir.display());
            let child = Command::new(program)
                .args(args)
                .current_dir(working_dir)
                .stdin(Stdio::null())
                .stdout(self.stdio())
                .stderr(self.stdio())
                .spawn();

            let child = match child {
                Ok(child) => child,
                Err(e) => {
                    warn!(
                        "Could not run '{}' ({}); the tool may not be installed",
                        program, e
                    );
                    return Execution::unknown(lines.join(" && "));
                }
            };

            match self.wait(child, &line) {
                Ok(Some(status)) => {
                    exit_code = status.code();
                    last_status = if codes.accepts(exit_code) {
                        CommandStatus::Success
                    } else {
                        CommandStatus::Failure
                    };
                }
                Ok(None) => {
                    exit_code = None;
                    last_status = CommandStatus::Failure;
                }
                Err(e) => {
                    warn!("Lost track of '{}': {}", line, e);
                    return Execution::unknown(lines.join(" && "));
                }
            }
        }

        Execution {
            status: last_status,
            command_line: lines.join(" && "),
            exit_code,
        }
    }

    fn stdio(&self) -> Stdio {
        if self.show_output {
            Stdio::inherit()
        } else {
            Stdio::null()
        }
    }

    /// Waits for `child`; `None` means it was killed after timing out
    fn wait(&self, mut child: Child, line: &str) -> std::io::Result<Option<ExitStatus>> {
        let Some(timeout) = self.timeout else {
            return child.wait().map(Some);
        };

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if started.elapsed() >= timeout {
                warn!("'{}' timed out after {:?}; killing it", line, timeout);
                child.kill()?;
                child.wait()?;
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Replaces every `%%name%%` with a fresh unique path under `working_dir`
fn expand_unique_paths(template: &str, working_dir: &Path) -> String {
    static TOKEN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(token) = TOKEN.get_or_init(|| Regex::new(r"%%([^%]+)%%").ok()) else {
        return template.to_string();
    };

    token
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let path: PathBuf = unique_file_name(working_dir.join(&caps[1]), "");
            path.display().to_string()
        })
        .into_owned()
}

fn file_argument(carved: &Path, working_dir: &Path) -> String {
    match (carved.parent(), carved.file_name()) {
        (Some(parent), Some(name)) if parent == working_dir => name.to_string_lossy().into_owned(),
        _ => carved.display().to_string(),
    }
}

/// Splits a command line into words.
///
/// Whitespace separates words. Single quotes keep their contents literally,
/// double quotes allow `\"` and `\\` escapes, and a backslash outside quotes
/// escapes the next character.
pub fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(unclosed(line, '\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(unclosed(line, '"')),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unclosed(line, '"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(c) = chars.next() {
                    current.push(c);
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn unclosed(line: &str, quote: char) -> Error {
    Error::invalid_argument(format!("unclosed {} in '{}'", quote, line))
}
