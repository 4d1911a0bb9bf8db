//! Extraction rules.
//!
//! A rule says what to do with a finding whose description matches its
//! pattern. The text form is
//!
//! ```text
//! pattern:extension[:command[:codes[:recurse]]]
//! ```
//!
//! `codes` is a comma-separated list of accepted exit codes (`0x` prefixes
//! allowed, default `0`) and `recurse` is `true` or anything else. Rule files
//! hold one rule per line; `#` starts a comment.

use super::command::RuleCommand;
use crate::error::{Error, Result};
use crate::module::options::parse_int;
use regex::{Regex, RegexBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Rules compiled into the binary, loaded after any rule files
pub const DEFAULT_RULES: &str = r#"
# Compressed streams
^gzip compressed data:gz:gzip -d -f '%e':0,2
^bzip2 compressed data:bz2:bzip2 -d -f '%e'
^xz compressed data:xz:xz -d -f '%e'

# Archives
^zip archive data:zip:unzip -o '%e':0,1
^posix tar archive:tar:tar xf '%e'

# File systems
^squashfs filesystem:squashfs:unsquashfs -d '%%squashfs-root%%' '%e':0:false

# Executables are carved for inspection only
^elf:elf
"#;

/// File name of user and system rule files
pub const RULES_FILE_NAME: &str = "extract.conf";

/// Exit codes a rule accepts as success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitCodes {
    codes: Vec<i32>,
    allow_unset: bool,
}

impl Default for ExitCodes {
    fn default() -> Self {
        Self {
            codes: vec![0],
            allow_unset: true,
        }
    }
}

impl ExitCodes {
    /// Accepts exactly `codes`
    pub fn new(codes: Vec<i32>) -> Self {
        Self {
            codes,
            allow_unset: false,
        }
    }

    /// Whether an exit code (`None` when the process reported none) is a success
    pub fn accepts(&self, code: Option<i32>) -> bool {
        match code {
            Some(code) => self.codes.contains(&code),
            None => self.allow_unset,
        }
    }

    /// Accepted codes
    pub fn codes(&self) -> &[i32] {
        &self.codes
    }
}

/// A single extraction rule
#[derive(Debug, Clone)]
pub struct ExtractRule {
    /// Pattern matched against lower-cased descriptions
    pub pattern: Regex,
    /// Extension of carved files
    pub extension: String,
    /// Command run on the carved file
    pub command: Option<RuleCommand>,
    /// Exit codes counted as success
    pub codes: ExitCodes,
    /// Whether produced files may be scanned recursively
    pub recurse: bool,
}

impl ExtractRule {
    /// Creates a carve-only rule
    pub fn new(pattern: &str, extension: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::invalid_rule(pattern, "empty pattern"));
        }
        if extension.is_empty() {
            return Err(Error::invalid_rule(pattern, "empty extension"));
        }

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::invalid_rule(pattern, e.to_string()))?;

        Ok(Self {
            pattern: regex,
            extension: extension.to_string(),
            command: None,
            codes: ExitCodes::default(),
            recurse: true,
        })
    }

    /// Sets the command
    pub fn command(mut self, command: RuleCommand) -> Self {
        self.command = Some(command);
        self
    }

    /// Sets the accepted exit codes
    pub fn codes(mut self, codes: ExitCodes) -> Self {
        self.codes = codes;
        self
    }

    /// Sets whether produced files may be scanned recursively
    pub fn recurse(mut self, recurse: bool) -> Self {
        self.recurse = recurse;
        self
    }

    /// Parses the text form of a rule
    pub fn parse(line: &str) -> Result<Self> {
        let mut fields = line.splitn(5, ':');
        let pattern = fields.next().unwrap_or_default().trim();
        let extension = fields
            .next()
            .ok_or_else(|| Error::invalid_rule(line, "missing extension"))?
            .trim();

        let mut rule = Self::new(pattern, extension)?;

        if let Some(command) = fields.next().map(str::trim).filter(|c| !c.is_empty()) {
            rule = rule.command(RuleCommand::External(command.to_string()));
        }

        if let Some(codes) = fields.next().map(str::trim).filter(|c| !c.is_empty()) {
            let parsed: Vec<i32> = codes
                .split(',')
                .filter_map(|code| {
                    let value = parse_int(code).and_then(|v| i32::try_from(v).ok());
                    if value.is_none() {
                        warn!("Ignoring bad exit code '{}' in rule '{}'", code.trim(), line);
                    }
                    value
                })
                .collect();
            rule = rule.codes(ExitCodes::new(parsed));
        }

        if let Some(recurse) = fields.next() {
            rule = rule.recurse(recurse.trim().eq_ignore_ascii_case("true"));
        }

        Ok(rule)
    }

    /// Whether the rule applies to a description
    pub fn matches(&self, description: &str) -> bool {
        self.pattern.is_match(&description.to_lowercase())
    }
}

/// Ordered rule table
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ExtractRule>,
}

impl RuleSet {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rule
    pub fn add(&mut self, rule: ExtractRule) {
        debug!(
            "Added extraction rule '{}' -> .{}",
            rule.pattern.as_str(),
            rule.extension
        );
        self.rules.push(rule);
    }

    /// Parses and appends a single rule given verbatim, `#` included
    pub fn add_line(&mut self, line: &str) -> Result<()> {
        let rule = ExtractRule::parse(line.trim())?;
        self.add(rule);
        Ok(())
    }

    /// Parses and appends rule-file text, skipping (and logging) bad lines.
    ///
    /// `#` starts a comment. Returns the number of rules added.
    pub fn add_text(&mut self, text: &str) -> usize {
        let mut added = 0;
        for line in text.lines() {
            let line = strip_comment(line).trim();
            if line.is_empty() {
                continue;
            }
            match ExtractRule::parse(line) {
                Ok(rule) => {
                    self.add(rule);
                    added += 1;
                }
                Err(e) => warn!("Skipping extraction rule: {}", e),
            }
        }
        added
    }

    /// Loads a rule file
    pub fn load_from_file(&mut self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let added = self.add_text(&text);
        debug!("Loaded {} rule(s) from {}", added, path.display());
        Ok(added)
    }

    /// Loads every existing rule file in `paths`, then the built-in rules.
    ///
    /// Unreadable files are skipped with a warning, or returned as an error
    /// in debug mode.
    pub fn load_defaults(&mut self, paths: &[PathBuf], debug: bool) -> Result<usize> {
        let mut added = 0;
        for path in paths {
            if !path.exists() {
                continue;
            }
            match self.load_from_file(path) {
                Ok(count) => added += count,
                Err(e) if debug => return Err(e),
                Err(e) => warn!("Could not load rules: {}", e),
            }
        }
        Ok(added + self.add_text(DEFAULT_RULES))
    }

    /// All rules matching `description`, in registration order
    pub fn matches(&self, description: &str) -> Vec<(usize, &ExtractRule)> {
        let lowered = description.to_lowercase();
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.pattern.is_match(&lowered))
            .collect()
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterates in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ExtractRule> {
        self.rules.iter()
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(index) => &line[..index],
        None => line,
    }
}

/// User and system rule file locations, most specific first
pub fn default_rule_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    let user_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
    if let Some(dir) = user_dir {
        paths.push(dir.join("carver").join(RULES_FILE_NAME));
    }

    paths.push(PathBuf::from("/etc/carver").join(RULES_FILE_NAME));
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_rule() {
        let rule = ExtractRule::parse("^gzip:gz:gzip -d '%e':0,0x2:false").unwrap();
        assert_eq!(rule.extension, "gz");
        assert_eq!(rule.codes.codes(), &[0, 2]);
        assert!(!rule.codes.accepts(None));
        assert!(!rule.recurse);
        assert!(matches!(rule.command, Some(RuleCommand::External(ref c)) if c == "gzip -d '%e'"));
    }

    #[test]
    fn test_parse_minimal_rule() {
        let rule = ExtractRule::parse("elf:elf").unwrap();
        assert!(rule.command.is_none());
        assert!(rule.recurse);
        assert!(rule.codes.accepts(Some(0)));
        assert!(rule.codes.accepts(None));
        assert!(!rule.codes.accepts(Some(1)));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(ExtractRule::parse("gzip").is_err());
        assert!(ExtractRule::parse(":gz").is_err());
        assert!(ExtractRule::parse("gzip:").unwrap_err().is_recoverable());
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let rule = ExtractRule::parse("^Zip Archive:zip").unwrap();
        assert!(rule.matches("ZIP archive data, v2.0"));
        assert!(!rule.matches("gzip compressed data"));
    }

    #[test]
    fn test_matches_returns_all_in_order() {
        let mut rules = RuleSet::new();
        let added = rules.add_text(
            "gzip:gz:first\n\
             # comment only\n\
             zip:zip\n\
             bad line without extension\n\
             ^gzip:gz:second # trailing comment\n",
        );
        assert_eq!(added, 3);

        let matched: Vec<_> = rules
            .matches("gzip compressed data")
            .into_iter()
            .map(|(index, rule)| (index, rule.command.as_ref().map(|c| c.to_string())))
            .collect();
        assert_eq!(
            matched,
            vec![
                (0, Some("first".to_string())),
                (1, None),
                (2, Some("second".to_string())),
            ]
        );
    }

    #[test]
    fn test_single_line_keeps_hash() {
        let mut rules = RuleSet::new();
        rules.add_line("blob:bin:sh -c 'echo a#b > out'").unwrap();
        assert!(rules.add_line("no extension").is_err());

        let command = rules.iter().next().unwrap().command.as_ref().unwrap();
        assert_eq!(command.to_string(), "sh -c 'echo a#b > out'");
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn test_load_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(RULES_FILE_NAME);
        std::fs::write(&file, "^custom:bin\n").unwrap();
        let missing = dir.path().join("missing.conf");

        let mut rules = RuleSet::new();
        let added = rules.load_defaults(&[missing, file], false).unwrap();
        assert_eq!(added, rules.len());
        assert!(rules.matches("custom blob")[0].0 == 0);
        assert!(!rules.matches("gzip compressed data, from Unix").is_empty());
    }

    #[test]
    fn test_unreadable_rules_surface_in_debug() {
        let dir = tempfile::tempdir().unwrap();
        // A directory exists but cannot be read as a file.
        let path = dir.path().join("rules.d");
        std::fs::create_dir(&path).unwrap();

        let mut rules = RuleSet::new();
        assert!(rules.load_defaults(&[path.clone()], false).is_ok());
        assert!(RuleSet::new().load_defaults(&[path], true).is_err());
    }
}
