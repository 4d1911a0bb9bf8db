//! Records exchanged between modules.
//!
//! A scanning module reports a [`Finding`] for every match it makes. The
//! module graph validates it, fans it out to the module's dependencies (the
//! extractor among them) and keeps it in the module's result list. Problems
//! are recorded as [`Failure`]s, which carry the same information plus the
//! error that caused them.

use crate::error::Error;
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::path::PathBuf;

/// The file a finding was made in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Path the file was opened from
    pub path: PathBuf,
    /// Size of the underlying file in bytes (0 when unknown)
    pub size: u64,
}

impl FileInfo {
    /// Creates a new file description
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// A match reported by a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Absolute offset of the match in the scanned file
    pub offset: u64,
    /// Size of the matched data (0 = unknown, runs to end of data)
    pub size: u64,
    /// Human-readable description; rules are matched against it
    pub description: String,
    /// File the match was made in
    pub file: Option<FileInfo>,
    /// Whether the finding passed validation
    pub valid: bool,
    /// Whether the finding should be shown to the user
    pub display: bool,
    /// Whether the extractor may act on the finding
    pub extract: bool,
    /// Preferred name for carved output
    pub name: Option<String>,
    /// Name of the reporting module, filled in when the finding is recorded
    pub module: String,
}

impl Finding {
    /// Creates a valid, displayable, extractable finding
    pub fn new(offset: u64, description: impl Into<String>) -> Self {
        Self {
            offset,
            size: 0,
            description: description.into(),
            file: None,
            valid: true,
            display: true,
            extract: true,
            name: None,
            module: String::new(),
        }
    }

    /// Sets the size of the matched data
    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Attaches the file the match was made in
    pub fn in_file(mut self, file: FileInfo) -> Self {
        self.file = Some(file);
        self
    }

    /// Sets the preferred output name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Marks the finding as informational: recorded, not shown, not extracted
    pub fn hidden(mut self) -> Self {
        self.display = false;
        self.extract = false;
        self
    }

    /// Marks the finding as invalid
    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12} {:<#12x} {}", self.offset, self.offset, self.description)
    }
}

/// A problem recorded against a module
#[derive(Debug)]
pub struct Failure {
    /// What was being processed when the problem occurred
    pub finding: Finding,
    /// Underlying error, if one was captured
    pub cause: Option<Error>,
}

impl Failure {
    /// Creates a failure with a captured cause
    pub fn new(finding: Finding, cause: Error) -> Self {
        Self {
            finding,
            cause: Some(cause),
        }
    }

    /// Creates a failure from a bare description
    pub fn described(module: &str, description: impl Into<String>) -> Self {
        let mut finding = Finding::new(0, description).hidden();
        finding.module = module.to_string();
        Self {
            finding,
            cause: None,
        }
    }

    /// Name of the module the failure belongs to
    pub fn module(&self) -> &str {
        &self.finding.module
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.finding.module, self.finding.description)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// The extraction rule that handled a finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// Position of the rule in the rule table
    pub index: usize,
    /// Pattern the rule matched with
    pub pattern: String,
    /// Extension used for the carved file
    pub extension: String,
}

/// Include/exclude filters applied to finding descriptions.
///
/// A description is displayed when it matches no exclude filter and, if any
/// include filters exist, at least one of them.
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl ResultFilter {
    /// Creates an empty filter that displays everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an include pattern (case-insensitive)
    pub fn include(mut self, pattern: &str) -> crate::Result<Self> {
        self.include.push(compile_filter(pattern)?);
        Ok(self)
    }

    /// Adds an exclude pattern (case-insensitive)
    pub fn exclude(mut self, pattern: &str) -> crate::Result<Self> {
        self.exclude.push(compile_filter(pattern)?);
        Ok(self)
    }

    /// Returns whether a description should be displayed
    pub fn display(&self, description: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(description)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(description))
    }

    /// Applies the filter to a finding; hidden findings are never extracted
    pub fn apply(&self, finding: &mut Finding) {
        if !self.display(&finding.description) {
            finding.display = false;
            finding.extract = false;
        }
    }
}

/// Compiles a case-insensitive pattern used for filtering
pub(crate) fn compile_filter(pattern: &str) -> crate::Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::invalid_argument(format!("bad filter '{}': {}", pattern, e)))
}
