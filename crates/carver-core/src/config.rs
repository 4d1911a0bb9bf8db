//! General configuration shared by every module.
//!
//! The `general` module owns the options that apply to the whole run: the
//! target files, the reader geometry and the result filters. It does no work
//! of its own; other modules bind it as their `config` dependency and read
//! the typed [`GeneralConfig`] from it.

use crate::error::{Error, Result};
use crate::finding::{compile_filter, ResultFilter};
use crate::module::{
    Dependencies, Kwargs, Module, ModuleContext, ModuleOption, ModuleSpec, OptionValue,
    ValueKind, GENERAL_MODULE,
};
use crate::reader::{BoundedReader, ReaderOptions, DEFAULT_BLOCK_SIZE, DEFAULT_PEEK_SIZE};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Settings that apply to every scanned file
#[derive(Debug, Clone)]
pub struct GeneralConfig {
    /// Target files given on the command line
    pub files: Vec<PathBuf>,
    /// Start of the scanned view in each target (negative counts from the end)
    pub offset: i64,
    /// Bytes to scan in each target (0 = to the end)
    pub length: u64,
    /// Added to offsets when naming carved files
    pub base_address: u64,
    /// Reader block size
    pub block_size: usize,
    /// Reader look-ahead size
    pub peek_size: usize,
    /// Byte-swap group width (0 = off)
    pub swap_size: usize,
    /// Filters on finding descriptions
    pub filter: ResultFilter,
    /// Only scan files whose name matches one of these
    pub file_include: Vec<Regex>,
    /// Never scan files whose name matches one of these
    pub file_exclude: Vec<Regex>,
    /// Keep findings that failed validation
    pub show_invalid: bool,
    /// Surface errors that are normally only logged
    pub debug: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            offset: 0,
            length: 0,
            base_address: 0,
            block_size: DEFAULT_BLOCK_SIZE,
            peek_size: DEFAULT_PEEK_SIZE,
            swap_size: 0,
            filter: ResultFilter::default(),
            file_include: Vec::new(),
            file_exclude: Vec::new(),
            show_invalid: false,
            debug: false,
        }
    }
}

impl GeneralConfig {
    /// Creates a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the configuration from validated module parameters
    pub fn from_kwargs(kwargs: &Kwargs) -> Result<Self> {
        let mut filter = ResultFilter::new();
        for pattern in kwargs.list("include")? {
            filter = filter.include(&pattern)?;
        }
        for pattern in kwargs.list("exclude")? {
            filter = filter.exclude(&pattern)?;
        }

        let mut config = Self::new()
            .files(kwargs.list("files")?.into_iter().map(PathBuf::from).collect())
            .offset(kwargs.int("offset")?)
            .length(kwargs.uint("length")?)
            .base_address(kwargs.uint("base")?)
            .swap_size(usize_kwarg(kwargs, "swap")?)
            .filter(filter)
            .show_invalid(kwargs.flag("invalid")?)
            .debug(kwargs.flag("debug")?);

        let block = usize_kwarg(kwargs, "block")?;
        if block > 0 {
            config = config.block_size(block);
        }
        let peek = usize_kwarg(kwargs, "peek")?;
        if peek > 0 {
            config = config.peek_size(peek);
        }

        for pattern in kwargs.list("file_include")? {
            config.file_include.push(compile_filter(&pattern)?);
        }
        for pattern in kwargs.list("file_exclude")? {
            config.file_exclude.push(compile_filter(&pattern)?);
        }

        Ok(config)
    }

    /// Sets the target files
    pub fn files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }

    /// Sets the view offset
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the view length
    pub fn length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    /// Sets the base address used for carved file names
    pub fn base_address(mut self, base: u64) -> Self {
        self.base_address = base;
        self
    }

    /// Sets the reader block size
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the reader look-ahead size
    pub fn peek_size(mut self, size: usize) -> Self {
        self.peek_size = size;
        self
    }

    /// Sets the byte-swap group width
    pub fn swap_size(mut self, size: usize) -> Self {
        self.swap_size = size;
        self
    }

    /// Sets the description filters
    pub fn filter(mut self, filter: ResultFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Keeps invalid findings
    pub fn show_invalid(mut self, show: bool) -> Self {
        self.show_invalid = show;
        self
    }

    /// Enables debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Reader geometry for `path`.
    ///
    /// The offset and length only apply to the targets given on the command
    /// line; files discovered during extraction are scanned whole.
    pub fn reader_options(&self, path: &Path) -> ReaderOptions {
        let options = ReaderOptions::new()
            .block_size(self.block_size)
            .peek_size(self.peek_size)
            .swap_size(self.swap_size);

        if self.files.iter().any(|file| file == path) {
            options.offset(self.offset).length(self.length)
        } else {
            options
        }
    }

    /// Opens `path` with the configured geometry
    pub fn open_file(&self, path: &Path) -> Result<BoundedReader> {
        BoundedReader::open(path, &self.reader_options(path))
    }

    /// Whether a target passes the file-name filters
    pub fn file_name_filter(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.file_exclude.iter().any(|re| re.is_match(&name)) {
            return false;
        }
        self.file_include.is_empty() || self.file_include.iter().any(|re| re.is_match(&name))
    }
}

fn usize_kwarg(kwargs: &Kwargs, name: &str) -> Result<usize> {
    let value = kwargs.uint(name)?;
    usize::try_from(value)
        .map_err(|_| Error::invalid_argument(format!("{} is too large ({})", name, value)))
}

/// The general configuration module
#[derive(Debug)]
pub struct General {
    config: GeneralConfig,
}

impl General {
    /// Wraps an existing configuration
    pub fn new(config: GeneralConfig) -> Self {
        Self { config }
    }

    /// The typed configuration
    pub fn config(&self) -> &GeneralConfig {
        &self.config
    }
}

impl Module for General {
    fn run(&mut self, _ctx: &mut ModuleContext<'_>) -> Result<bool> {
        Ok(true)
    }
}

fn build(kwargs: &Kwargs, _dependencies: &Dependencies) -> Result<Box<dyn Module>> {
    Ok(Box::new(General::new(GeneralConfig::from_kwargs(kwargs)?)))
}

/// Registry entry for the general module
pub fn spec() -> ModuleSpec {
    let list = || OptionValue::List(Vec::new());

    ModuleSpec::new(GENERAL_MODULE, build)
        .title("General")
        .depends_on(Vec::new())
        .kwarg("enabled", OptionValue::Bool(true))
        .kwarg("files", list())
        .kwarg("offset", OptionValue::Int(0))
        .kwarg("length", OptionValue::Int(0))
        .kwarg("base", OptionValue::Int(0))
        .kwarg("block", OptionValue::Int(0))
        .kwarg("peek", OptionValue::Int(0))
        .kwarg("swap", OptionValue::Int(0))
        .kwarg("include", list())
        .kwarg("exclude", list())
        .kwarg("file_include", list())
        .kwarg("file_exclude", list())
        .kwarg("invalid", OptionValue::Bool(false))
        .kwarg("debug", OptionValue::Bool(false))
        .option(
            ModuleOption::new("files", ValueKind::List, "Files to scan")
                .positional()
                .takes("files"),
        )
        .option(
            ModuleOption::new("offset", ValueKind::Int, "Start scanning at this file offset")
                .short('O')
                .takes("offset"),
        )
        .option(
            ModuleOption::new("length", ValueKind::Int, "Number of bytes to scan")
                .short('l')
                .takes("length"),
        )
        .option(
            ModuleOption::new("base", ValueKind::Int, "Add a base address to all printed offsets")
                .short('o')
                .takes("base"),
        )
        .option(
            ModuleOption::new("block", ValueKind::Int, "Set file block size")
                .short('K')
                .takes("block"),
        )
        .option(ModuleOption::new("peek", ValueKind::Int, "Set look-ahead size").takes("peek"))
        .option(
            ModuleOption::new("swap", ValueKind::Int, "Reverse every n bytes before scanning")
                .short('g')
                .takes("swap"),
        )
        .option(
            ModuleOption::new("include", ValueKind::List, "Only show results matching this regex")
                .short('y')
                .takes("include"),
        )
        .option(
            ModuleOption::new("exclude", ValueKind::List, "Do not show results matching this regex")
                .short('x')
                .takes("exclude"),
        )
        .option(
            ModuleOption::new("file-include", ValueKind::List, "Only scan files whose names match this regex")
                .takes("file_include"),
        )
        .option(
            ModuleOption::new("file-exclude", ValueKind::List, "Do not scan files whose names match this regex")
                .takes("file_exclude"),
        )
        .option(
            ModuleOption::flag("invalid", "Show results marked as invalid")
                .short('I')
                .sets("invalid", OptionValue::Bool(true)),
        )
        .option(
            ModuleOption::flag("debug", "Surface errors that are normally only logged")
                .sets("debug", OptionValue::Bool(true)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{argv, ParsedArgs};
    use std::io::Write;

    fn resolve(args: ParsedArgs) -> Result<GeneralConfig> {
        let spec = spec();
        let kwargs = Kwargs::resolve(spec.name, &spec.kwargs, argv(&spec, &args)?)?;
        GeneralConfig::from_kwargs(&kwargs)
    }

    #[test]
    fn test_defaults() {
        let config = resolve(ParsedArgs::new()).unwrap();
        assert!(config.files.is_empty());
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.peek_size, DEFAULT_PEEK_SIZE);
        assert!(!config.show_invalid);
    }

    #[test]
    fn test_options_map_to_config() {
        let mut args = ParsedArgs::new();
        args.insert("files".into(), OptionValue::List(vec!["fw.bin".into()]));
        args.insert("offset".into(), OptionValue::Int(-16));
        args.insert("base".into(), OptionValue::Int(0x8000_0000));
        args.insert("block".into(), OptionValue::Int(4096));
        args.insert("invalid".into(), OptionValue::Bool(true));

        let config = resolve(args).unwrap();
        assert_eq!(config.files, vec![PathBuf::from("fw.bin")]);
        assert_eq!(config.offset, -16);
        assert_eq!(config.base_address, 0x8000_0000);
        assert_eq!(config.block_size, 4096);
        assert!(config.show_invalid);
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut args = ParsedArgs::new();
        args.insert("length".into(), OptionValue::Int(-1));
        assert!(resolve(args).unwrap_err().is_fatal());
    }

    #[test]
    fn test_file_name_filter() {
        let mut args = ParsedArgs::new();
        args.insert("file-include".into(), OptionValue::List(vec![r"\.bin$".into()]));
        args.insert("file-exclude".into(), OptionValue::List(vec!["^skip".into()]));
        let config = resolve(args).unwrap();

        assert!(config.file_name_filter(Path::new("/tmp/fw.bin")));
        assert!(!config.file_name_filter(Path::new("/tmp/fw.img")));
        assert!(!config.file_name_filter(Path::new("/tmp/skip.bin")));
    }

    #[test]
    fn test_view_applies_to_command_line_targets_only() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.bin");
        let nested = dir.path().join("nested.bin");
        for path in [&target, &nested] {
            std::fs::File::create(path).unwrap().write_all(&[0u8; 64]).unwrap();
        }

        let config = GeneralConfig::new()
            .files(vec![target.clone()])
            .offset(16)
            .length(8);

        let reader = config.open_file(&target).unwrap();
        assert_eq!((reader.offset(), reader.length()), (16, 8));

        let reader = config.open_file(&nested).unwrap();
        assert_eq!((reader.offset(), reader.length()), (0, 64));
    }
}
