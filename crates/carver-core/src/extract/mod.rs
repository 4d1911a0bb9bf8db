//! The extraction engine.
//!
//! The extractor is bound as a dependency of every scanning module and sees
//! each of their findings through [`Module::callback`]. For a finding whose
//! description matches one or more rules it:
//!
//! 1. picks an output directory for the scanned file,
//! 2. carves the finding's bytes into that directory,
//! 3. runs the rule's command on the carved file, falling back to the next
//!    matching rule if the command fails,
//! 4. diffs the directory listing to find what the command produced,
//! 5. queues produced files for scanning when recursion is enabled.
//!
//! ## Recursion
//!
//! The first output directory created in a run is the recursion anchor.
//! Files produced below it are queued only while their depth below the anchor
//! stays within the configured limit, so nested archives are unpacked
//! breadth-first until the limit is reached:
//!
//! ```text
//! _fw.bin.extracted/            anchor
//! ├── 100                       depth 1
//! └── _100.extracted/
//!     └── rootfs.img            depth 2
//! ```

pub mod command;
pub mod naming;
pub mod rules;

use crate::config::{General, GeneralConfig};
use crate::error::{Error, Result};
use crate::finding::{FileInfo, Finding, RuleMatch};
use crate::module::{
    Dependencies, Dependency, Kwargs, Module, ModuleContext, ModuleOption, ModuleSpec,
    OptionValue, ValueKind, CONFIG_ATTRIBUTE, EXTRACTOR_MODULE, GENERAL_MODULE,
};
use crate::reader::{BoundedReader, ReaderOptions, Whence};
use naming::{base_name, depth_below, unique_file_name};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

pub use command::{CommandRunner, CommandStatus, Execution, RuleCommand};
pub use rules::{default_rule_paths, ExitCodes, ExtractRule, RuleSet};

/// Recursion depth used by `--matryoshka`
pub const MATRYOSHKA_DEPTH: i64 = 8;

/// Extension of per-target output directories
pub const OUTPUT_DIRECTORY_EXTENSION: &str = "extracted";

const CARVE_BLOCK_SIZE: usize = 1024 * 1024;

/// Extractor settings
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Whether the extractor acts on findings
    pub enabled: bool,
    /// Load rule files from the default locations plus the built-in rules
    pub load_default_rules: bool,
    /// Rules given in text form
    pub manual_rules: Vec<String>,
    /// Additional rule files
    pub rule_files: Vec<PathBuf>,
    /// Maximum recursion depth below the anchor (0 = no recursion)
    pub matryoshka: usize,
    /// Base directory for output (default: the working directory)
    pub directory: Option<PathBuf>,
    /// Maximum bytes per carved file (0 = unlimited)
    pub max_size: u64,
    /// Maximum number of extractions per run (0 = unlimited)
    pub max_count: usize,
    /// Delete carved files that a successful command left untouched
    pub remove_after_execute: bool,
    /// Run rule commands; when off, every rule counts as succeeded after carving
    pub run_commands: bool,
    /// Kill commands that run longer than this
    pub timeout: Option<Duration>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            load_default_rules: false,
            manual_rules: Vec::new(),
            rule_files: Vec::new(),
            matryoshka: 0,
            directory: None,
            max_size: 0,
            max_count: 0,
            remove_after_execute: false,
            run_commands: true,
            timeout: None,
        }
    }
}

impl ExtractorConfig {
    /// Creates an enabled configuration with no rules
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Builds the configuration from validated module parameters
    pub fn from_kwargs(kwargs: &Kwargs) -> Result<Self> {
        let directory = kwargs.string("directory")?;
        let timeout = kwargs.uint("timeout")?;
        let matryoshka = kwargs.uint("matryoshka")?;
        let max_count = kwargs.uint("max_count")?;

        Ok(Self {
            enabled: kwargs.enabled(),
            load_default_rules: kwargs.flag("load_default_rules")?,
            manual_rules: kwargs.list("manual_rules")?,
            rule_files: kwargs
                .list("rule_files")?
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            matryoshka: usize::try_from(matryoshka).unwrap_or(usize::MAX),
            directory: (!directory.is_empty()).then(|| PathBuf::from(directory)),
            max_size: kwargs.uint("max_size")?,
            max_count: usize::try_from(max_count).unwrap_or(usize::MAX),
            remove_after_execute: kwargs.flag("remove_after_execute")?,
            run_commands: kwargs.flag("run_commands")?,
            timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
        })
    }

    /// Adds a rule in text form
    pub fn rule(mut self, rule: impl Into<String>) -> Self {
        self.manual_rules.push(rule.into());
        self
    }

    /// Loads the default rules
    pub fn load_default_rules(mut self, load: bool) -> Self {
        self.load_default_rules = load;
        self
    }

    /// Sets the recursion depth
    pub fn matryoshka(mut self, depth: usize) -> Self {
        self.matryoshka = depth;
        self
    }

    /// Sets the base output directory
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Limits the size of carved files
    pub fn max_size(mut self, size: u64) -> Self {
        self.max_size = size;
        self
    }

    /// Limits the number of extractions
    pub fn max_count(mut self, count: usize) -> Self {
        self.max_count = count;
        self
    }

    /// Deletes untouched carved files after a successful command
    pub fn remove_after_execute(mut self, remove: bool) -> Self {
        self.remove_after_execute = remove;
        self
    }

    /// Enables or disables running rule commands
    pub fn run_commands(mut self, run: bool) -> Self {
        self.run_commands = run;
        self
    }

    /// Sets the command timeout
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What one rule produced for one finding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractDetails {
    /// Files the command created next to the carved file
    pub files: Vec<PathBuf>,
    /// Command line that was run, if any
    pub command: Option<String>,
    /// Rule that handled the finding
    pub rule: Option<RuleMatch>,
}

/// Extraction record for one scanned file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractInfo {
    /// Output directory of the file
    pub directory: PathBuf,
    /// Carved file per finding offset
    pub carved: BTreeMap<u64, PathBuf>,
    /// Command results per finding offset
    pub extracted: BTreeMap<u64, ExtractDetails>,
}

/// Result of [`Extractor::extract`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Directory the data was carved into
    pub directory: PathBuf,
    /// The carved file (may have been removed by the command or by `--rm`)
    pub carved: PathBuf,
    /// Whether produced files may be scanned recursively
    pub recurse: bool,
    /// Command line of the last command run
    pub command: Option<String>,
    /// The last rule tried
    pub rule: RuleMatch,
    /// Outcome of the last rule
    pub status: CommandStatus,
}

/// The extraction engine module
#[derive(Debug)]
pub struct Extractor {
    config: ExtractorConfig,
    general: GeneralConfig,
    rules: RuleSet,
    runner: CommandRunner,
    base_directory: PathBuf,
    output: BTreeMap<PathBuf, ExtractInfo>,
    directories: HashMap<PathBuf, PathBuf>,
    listings: HashMap<PathBuf, BTreeSet<OsString>>,
    pending: Vec<PathBuf>,
    recursion_anchor: Option<PathBuf>,
    extraction_count: usize,
}

impl Extractor {
    /// Creates an extractor; rules are loaded by [`Module::load`]
    pub fn new(config: ExtractorConfig, general: GeneralConfig) -> Self {
        let runner = CommandRunner::new().timeout(config.timeout);
        Self {
            config,
            general,
            rules: RuleSet::new(),
            runner,
            base_directory: PathBuf::new(),
            output: BTreeMap::new(),
            directories: HashMap::new(),
            listings: HashMap::new(),
            pending: Vec::new(),
            recursion_anchor: None,
            extraction_count: 0,
        }
    }

    /// The active configuration
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// The rule table
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Appends a rule
    pub fn add_rule(&mut self, rule: ExtractRule) {
        self.rules.add(rule);
    }

    /// Rules matching `description`, in the order they will be tried
    pub fn matches(&self, description: &str) -> Vec<&ExtractRule> {
        self.rules
            .matches(description)
            .into_iter()
            .map(|(_, rule)| rule)
            .collect()
    }

    /// Extraction records, keyed by scanned file
    pub fn output(&self) -> &BTreeMap<PathBuf, ExtractInfo> {
        &self.output
    }

    /// Files queued for recursive scanning
    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    /// The first output directory created in this run
    pub fn recursion_anchor(&self) -> Option<&Path> {
        self.recursion_anchor.as_deref()
    }

    /// Number of findings extracted so far
    pub fn extraction_count(&self) -> usize {
        self.extraction_count
    }

    /// Returns the output directory for `input`, creating it on first use.
    ///
    /// Files found inside an earlier extraction get their directory next to
    /// them; everything else goes directly into the base directory.
    pub fn build_output_directory(&mut self, input: &Path) -> Result<PathBuf> {
        if let Some(directory) = self.directories.get(input) {
            return Ok(directory.clone());
        }

        let base = self.base_directory()?;
        let real_input = fs::canonicalize(input).map_err(|e| Error::io(input, e))?;
        let subdir = real_input
            .parent()
            .and_then(|parent| parent.strip_prefix(&base).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let stem = base.join(subdir).join(format!("_{}", base_name(input)));
        let directory = unique_file_name(stem, OUTPUT_DIRECTORY_EXTENSION);
        fs::create_dir_all(&directory).map_err(|e| Error::directory_create(&directory, e))?;
        let directory = fs::canonicalize(&directory).map_err(|e| Error::io(&directory, e))?;

        if self.recursion_anchor.is_none() {
            debug!("Recursion anchor is {}", directory.display());
            self.recursion_anchor = Some(directory.clone());
        }

        info!("Extracting {} to {}", input.display(), directory.display());
        self.directories.insert(input.to_path_buf(), directory.clone());
        Ok(directory)
    }

    fn base_directory(&mut self) -> Result<PathBuf> {
        if self.base_directory.as_os_str().is_empty() {
            let directory = match &self.config.directory {
                Some(directory) => directory.clone(),
                None => std::env::current_dir().map_err(|e| Error::io(".", e))?,
            };
            fs::create_dir_all(&directory).map_err(|e| Error::directory_create(&directory, e))?;
            self.base_directory = fs::canonicalize(&directory).map_err(|e| Error::io(&directory, e))?;
        }
        Ok(self.base_directory.clone())
    }

    /// Copies `size` bytes at `offset` of `input` into a new file in `directory`.
    ///
    /// The file is named `name` (reduced to its last component) or, by
    /// default, the upper-case hex of `offset` plus the base address, with
    /// `extension` appended. A size of 0 carves to the end of the file.
    pub fn carve(
        &self,
        input: &Path,
        offset: u64,
        size: u64,
        extension: &str,
        name: Option<&str>,
        directory: &Path,
    ) -> Result<PathBuf> {
        let default_name = format!("{:X}", offset.wrapping_add(self.general.base_address));
        let requested = name
            .map(|n| base_name(Path::new(n)))
            .filter(|n| !n.is_empty() && n != "." && n != "..");

        let mut size = if size == 0 {
            file_size(input)?.saturating_sub(offset)
        } else {
            size
        };
        if self.config.max_size > 0 && size > self.config.max_size {
            size = self.config.max_size;
        }

        let swap = self.general.swap_size as u64;
        let adjust = if swap > 0 { offset % swap } else { 0 };
        let start = i64::try_from(offset - adjust).map_err(|_| {
            Error::carve(
                input,
                directory.join(&default_name),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("offset {:#x} is out of range", offset),
                ),
            )
        })?;

        let mut output = unique_file_name(
            directory.join(requested.as_deref().unwrap_or(default_name.as_str())),
            extension,
        );
        let mut writer = match BoundedReader::create(&output) {
            Ok(writer) => writer,
            Err(e) if requested.is_some() => {
                warn!("Cannot create {} ({}); using the default name", output.display(), e);
                output = unique_file_name(directory.join(&default_name), extension);
                BoundedReader::create(&output).map_err(|e| carve_error(input, &output, e))?
            }
            Err(e) => return Err(carve_error(input, &output, e)),
        };

        let options = ReaderOptions::new().swap_size(self.general.swap_size);
        let mut reader =
            BoundedReader::open(input, &options).map_err(|e| carve_error(input, &output, e))?;
        reader
            .seek(start, Whence::Start)
            .map_err(|e| carve_error(input, &output, e))?;

        let mut skip = adjust as usize;
        let mut remaining = size;
        while remaining > 0 {
            let block = reader
                .read(CARVE_BLOCK_SIZE)
                .map_err(|e| carve_error(input, &output, e))?;
            if block.is_empty() {
                break;
            }

            let data = &block[skip.min(block.len())..];
            skip = 0;
            let take = data.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
            writer
                .write(&data[..take])
                .map_err(|e| carve_error(input, &output, e))?;
            remaining -= take as u64;
        }
        writer.flush().map_err(|e| carve_error(input, &output, e))?;

        debug!(
            "Carved {:#x}..{:#x} of {} to {}",
            offset,
            offset + (size - remaining),
            input.display(),
            output.display()
        );
        Ok(output)
    }

    /// Carves and unpacks one finding.
    ///
    /// Matching rules are tried in order until one succeeds. A failed rule's
    /// carved file is removed unless it was the last candidate. Returns
    /// `None` when no rule matches or `input` is not a regular file. Carving
    /// errors abort the extraction; command failures never do.
    pub fn extract(
        &mut self,
        offset: u64,
        description: &str,
        input: &Path,
        size: u64,
        name: Option<&str>,
    ) -> Result<Option<Extraction>> {
        let candidates: Vec<(usize, ExtractRule)> = self
            .rules
            .matches(description)
            .into_iter()
            .map(|(index, rule)| (index, rule.clone()))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        if !input.is_file() {
            debug!("Not extracting from {}: not a regular file", input.display());
            return Ok(None);
        }

        debug!(
            "Found {} extraction rule(s) for '{}'",
            candidates.len(),
            description
        );
        let directory = self.build_output_directory(input)?;
        let last = candidates.len() - 1;
        let mut outcome = None;

        for (position, (index, rule)) in candidates.into_iter().enumerate() {
            let carved = self.carve(input, offset, size, &rule.extension, name, &directory)?;
            let rule_match = RuleMatch {
                index,
                pattern: rule.pattern.as_str().to_string(),
                extension: rule.extension.clone(),
            };

            let Some(command) = &rule.command else {
                outcome = Some(Extraction {
                    directory: directory.clone(),
                    carved,
                    recurse: rule.recurse,
                    command: None,
                    rule: rule_match,
                    status: CommandStatus::Success,
                });
                break;
            };

            let digest = if self.config.remove_after_execute {
                file_digest(&carved)
            } else {
                None
            };

            let execution = if self.config.run_commands {
                self.runner.execute(command, &carved, &rule.codes, &directory)
            } else {
                Execution {
                    status: CommandStatus::Success,
                    command_line: String::new(),
                    exit_code: None,
                }
            };
            let success = execution.status.is_success();
            debug!(
                "Ran '{}' on {}: {:?}",
                execution.command_line,
                carved.display(),
                execution.status
            );

            if self.config.remove_after_execute
                && (success || position == last)
                && digest.is_some()
                && file_digest(&carved) == digest
            {
                remove_quietly(&carved);
            }

            if !success {
                warn!(
                    "Extraction rule '{}' failed for '{}' ({:?})",
                    command, description, execution.status
                );
                if position != last {
                    remove_quietly(&carved);
                }
            }

            outcome = Some(Extraction {
                directory: directory.clone(),
                carved,
                recurse: rule.recurse,
                command: Some(execution.command_line),
                rule: rule_match,
                status: execution.status,
            });

            if success {
                break;
            }
        }

        Ok(outcome)
    }

    /// Checks `entry` (and anything below it) for symlinks leaving `root`
    fn sanitize_symlinks(&self, root: &Path, entry: &Path) {
        let Ok(meta) = entry.symlink_metadata() else {
            return;
        };

        if meta.file_type().is_symlink() {
            sanitize_symlink(root, entry);
        } else if meta.is_dir() {
            for item in WalkDir::new(entry).follow_links(false).min_depth(1) {
                match item {
                    Ok(item) if item.path_is_symlink() => sanitize_symlink(root, item.path()),
                    Ok(_) => {}
                    Err(e) => warn!("Cannot inspect {}: {}", entry.display(), e),
                }
            }
        }
    }

    /// Queues `path` (or the regular files below it) if it is within the recursion limit
    fn enqueue(&mut self, path: &Path) {
        let Some(anchor) = self.recursion_anchor.clone() else {
            return;
        };
        let limit = self.config.matryoshka;
        let within = |candidate: &Path| depth_below(&anchor, candidate).is_some_and(|d| d <= limit);

        if !within(path) {
            debug!("Not recursing into {}: outside depth limit", path.display());
            return;
        }

        let Ok(meta) = path.symlink_metadata() else {
            return;
        };

        if meta.is_dir() {
            let walker = WalkDir::new(path).follow_links(false).sort_by_file_name();
            for item in walker {
                match item {
                    Ok(item) if item.file_type().is_file() && within(item.path()) => {
                        trace!("Queued {}", item.path().display());
                        self.pending.push(item.into_path());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Cannot walk {}: {}", path.display(), e),
                }
            }
        } else if meta.is_file() {
            trace!("Queued {}", path.display());
            self.pending.push(path.to_path_buf());
        }
    }
}

impl Module for Extractor {
    fn load(&mut self) -> Result<()> {
        if self.config.load_default_rules {
            self.rules
                .load_defaults(&default_rule_paths(), self.general.debug)?;
        }

        for file in &self.config.rule_files {
            if let Err(e) = self.rules.load_from_file(file) {
                if self.general.debug {
                    return Err(e);
                }
                warn!("Could not load rules: {}", e);
            }
        }

        for rule in &self.config.manual_rules {
            if let Err(e) = self.rules.add_line(rule) {
                warn!("Skipping extraction rule: {}", e);
            }
        }

        if self.config.directory.is_some() {
            self.base_directory()?;
        }

        debug!("Extractor loaded with {} rule(s)", self.rules.len());
        Ok(())
    }

    /// Reports every carved and produced file
    fn run(&mut self, ctx: &mut ModuleContext<'_>) -> Result<bool> {
        for (input, info) in &self.output {
            let file = FileInfo::new(input.clone(), 0);
            for (offset, carved) in &info.carved {
                ctx.result(
                    Finding::new(*offset, carved.display().to_string())
                        .in_file(file.clone())
                        .hidden(),
                );
            }
            for (offset, details) in &info.extracted {
                for produced in &details.files {
                    ctx.result(
                        Finding::new(*offset, produced.display().to_string())
                            .in_file(file.clone())
                            .hidden(),
                    );
                }
            }
        }
        Ok(true)
    }

    fn callback(&mut self, finding: &Finding) -> Result<()> {
        let Some(file) = &finding.file else {
            return Ok(());
        };
        if !self.config.enabled || self.rules.is_empty() {
            return Ok(());
        }
        if !(finding.valid && finding.extract && finding.display) {
            return Ok(());
        }
        if self.config.max_count > 0 && self.extraction_count >= self.config.max_count {
            debug!("Extraction limit of {} reached", self.config.max_count);
            return Ok(());
        }

        let size = if finding.size > 0 {
            finding.size
        } else {
            file.size.saturating_sub(finding.offset)
        };

        let Some(extraction) = self.extract(
            finding.offset,
            &finding.description,
            &file.path,
            size,
            finding.name.as_deref(),
        )?
        else {
            return Ok(());
        };
        self.extraction_count += 1;

        let directory = extraction.directory.clone();
        let listing = list_directory(&directory)?;
        let previous = self.listings.remove(&directory).unwrap_or_default();
        let carved_name = extraction.carved.file_name().map(|n| n.to_os_string());

        let mut produced = Vec::new();
        for name in listing.difference(&previous) {
            let path = directory.join(name);
            self.sanitize_symlinks(&directory, &path);
            if carved_name.as_ref() == Some(name) {
                continue;
            }

            trace!("{} produced {}", extraction.rule.pattern, path.display());
            produced.push(path.clone());
            if extraction.recurse && self.config.matryoshka > 0 {
                self.enqueue(&path);
            }
        }
        self.listings.insert(directory.clone(), listing);

        let info = self
            .output
            .entry(file.path.clone())
            .or_insert_with(|| ExtractInfo {
                directory,
                ..ExtractInfo::default()
            });
        info.carved.insert(finding.offset, extraction.carved);
        info.extracted.insert(
            finding.offset,
            ExtractDetails {
                files: produced,
                command: extraction.command,
                rule: Some(extraction.rule),
            },
        );

        Ok(())
    }

    fn take_pending(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.pending)
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.directories.clear();
        self.listings.clear();
    }
}

fn carve_error(input: &Path, output: &Path, error: Error) -> Error {
    match error {
        Error::Io { source, .. } => Error::carve(input, output, source),
        other => other,
    }
}

fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(|e| Error::io(path, e))
}

fn file_digest(path: &Path) -> Option<blake3::Hash> {
    let mut file = fs::File::open(path).ok()?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher).ok()?;
    Some(hasher.finalize())
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => trace!("Removed {}", path.display()),
        Err(e) => debug!("Could not remove {}: {}", path.display(), e),
    }
}

fn list_directory(directory: &Path) -> Result<BTreeSet<OsString>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(directory).map_err(|e| Error::io(directory, e))? {
        let entry = entry.map_err(|e| Error::io(directory, e))?;
        names.insert(entry.file_name());
    }
    Ok(names)
}

/// Points `link` at `/dev/null` if its target, resolved lexically, lies outside `root`
fn sanitize_symlink(root: &Path, link: &Path) {
    let inside = match fs::read_link(link) {
        Ok(target) => {
            let parent = link.parent().unwrap_or(root);
            normalize_lexically(&parent.join(target)).starts_with(root)
        }
        Err(e) => {
            warn!("Could not read link {}: {}", link.display(), e);
            false
        }
    };
    if inside {
        return;
    }

    warn!("{}; replacing it with a link to /dev/null", Error::path_traversal(link));
    if let Err(e) = fs::remove_file(link) {
        warn!("Could not remove {}: {}", link.display(), e);
        return;
    }

    #[cfg(unix)]
    if let Err(e) = std::os::unix::fs::symlink("/dev/null", link) {
        warn!("Could not relink {}: {}", link.display(), e);
    }
}

/// Folds `.` and `..` components without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn build(kwargs: &Kwargs, dependencies: &Dependencies) -> Result<Box<dyn Module>> {
    let config = ExtractorConfig::from_kwargs(kwargs)?;
    let general = dependencies
        .get::<General>(CONFIG_ATTRIBUTE)
        .map(|general| general.config().clone())
        .unwrap_or_default();
    Ok(Box::new(Extractor::new(config, general)))
}

/// Registry entry for the extractor
pub fn spec() -> ModuleSpec {
    let enable = || OptionValue::Bool(true);

    ModuleSpec::new(EXTRACTOR_MODULE, build)
        .title("Extraction")
        .priority(-1)
        .depends_on(vec![Dependency::new(CONFIG_ATTRIBUTE, GENERAL_MODULE)])
        .kwarg("load_default_rules", OptionValue::Bool(false))
        .kwarg("manual_rules", OptionValue::List(Vec::new()))
        .kwarg("rule_files", OptionValue::List(Vec::new()))
        .kwarg("matryoshka", OptionValue::Int(0))
        .kwarg("directory", OptionValue::Str(String::new()))
        .kwarg("max_size", OptionValue::Int(0))
        .kwarg("max_count", OptionValue::Int(0))
        .kwarg("remove_after_execute", OptionValue::Bool(false))
        .kwarg("run_commands", OptionValue::Bool(true))
        .kwarg("timeout", OptionValue::Int(0))
        .option(
            ModuleOption::flag("extract", "Automatically extract known file types")
                .short('e')
                .sets("enabled", enable())
                .sets("load_default_rules", enable()),
        )
        .option(
            ModuleOption::new("dd", ValueKind::List, "Extract <pattern:ext[:cmd[:codes[:recurse]]]> signatures")
                .short('D')
                .sets("enabled", enable())
                .takes("manual_rules"),
        )
        .option(
            ModuleOption::new("rules", ValueKind::List, "Load extraction rules from a file")
                .sets("enabled", enable())
                .takes("rule_files"),
        )
        .option(
            ModuleOption::flag("matryoshka", "Recursively scan extracted files")
                .short('M')
                .sets("matryoshka", OptionValue::Int(MATRYOSHKA_DEPTH)),
        )
        .option(
            ModuleOption::new("depth", ValueKind::Int, "Limit matryoshka recursion depth")
                .short('d')
                .takes("matryoshka")
                .priority(1),
        )
        .option(
            ModuleOption::new("directory", ValueKind::Str, "Extract files into this directory")
                .short('C')
                .takes("directory"),
        )
        .option(
            ModuleOption::new("size", ValueKind::Int, "Limit the size of each carved file")
                .short('j')
                .takes("max_size"),
        )
        .option(
            ModuleOption::new("count", ValueKind::Int, "Limit the number of extracted files")
                .short('n')
                .takes("max_count"),
        )
        .option(
            ModuleOption::flag("rm", "Delete carved files after extraction")
                .short('r')
                .sets("remove_after_execute", enable()),
        )
        .option(
            ModuleOption::flag("carve", "Carve data but do not run extraction commands")
                .short('z')
                .sets("run_commands", OptionValue::Bool(false)),
        )
        .option(
            ModuleOption::new("timeout", ValueKind::Int, "Kill extraction commands after this many seconds")
                .takes("timeout"),
        )
}
