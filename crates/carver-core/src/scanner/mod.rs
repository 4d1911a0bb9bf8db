//! Built-in signature scanning.
//!
//! The `signature` module is the primary module that turns target files into
//! findings. It pulls each file through a [`BoundedReader`] one block at a
//! time and searches every block, look-ahead included, for known magic
//! byte sequences.
//!
//! ## Algorithm Overview
//!
//! 1. Read a block plus its peek tail
//! 2. Search the whole buffer for every magic sequence
//! 3. Report matches that start inside the block proper; matches starting in
//!    the peek tail are reported with the next block
//! 4. Subtract the magic's offset adjustment to get the start of the data
//!
//! ## Extensibility
//!
//! The [`ScanStrategy`] trait allows custom matchers:
//!
//! ```no_run
//! use carver_core::scanner::{ScanStrategy, Match};
//!
//! struct NullScanner;
//!
//! impl ScanStrategy for NullScanner {
//!     fn scan(&self, data: &[u8]) -> Vec<Match> {
//!         // Custom matching logic
//!         Vec::new()
//!     }
//! }
//! ```

use crate::error::{Error, Result};
use crate::finding::Finding;
use crate::module::{
    Dependencies, Kwargs, Module, ModuleContext, ModuleOption, ModuleSpec, OptionValue, ValueKind,
};
use crate::reader::BoundedReader;
use std::io::{Read, Seek};
use tracing::{debug, trace, warn};

/// Registry name of the signature module
pub const SIGNATURE_MODULE: &str = "signature";

/// A byte sequence identifying a file format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Magic {
    /// Bytes to search for
    pub bytes: Vec<u8>,
    /// Distance from the start of the data to the magic bytes
    pub offset_adjust: u64,
    /// Description reported for a match
    pub description: String,
}

impl Magic {
    /// Creates a magic that sits at the start of its data
    pub fn new(bytes: impl Into<Vec<u8>>, description: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            offset_adjust: 0,
            description: description.into(),
        }
    }

    /// Sets the distance from the start of the data to the magic bytes
    pub fn offset_adjust(mut self, adjust: u64) -> Self {
        self.offset_adjust = adjust;
        self
    }
}

/// The built-in magic table
pub fn builtin_magic() -> Vec<Magic> {
    vec![
        Magic::new(&b"\x1f\x8b\x08"[..], "gzip compressed data"),
        Magic::new(&b"BZh91AY&SY"[..], "bzip2 compressed data, block size = 900k"),
        Magic::new(&b"\xfd7zXZ\x00"[..], "xz compressed data"),
        Magic::new(&b"PK\x03\x04"[..], "Zip archive data"),
        Magic::new(&b"ustar"[..], "POSIX tar archive").offset_adjust(257),
        Magic::new(&b"hsqs"[..], "Squashfs filesystem, little endian"),
        Magic::new(&b"\x7fELF"[..], "ELF, executable or object file"),
    ]
}

/// A match within one buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Position of the magic bytes in the buffer
    pub position: usize,
    /// Distance from the start of the data to the magic bytes
    pub offset_adjust: u64,
    /// Description of what was found
    pub description: String,
}

/// Trait for implementing custom matchers
pub trait ScanStrategy {
    /// Returns every match in `data`, in any order
    fn scan(&self, data: &[u8]) -> Vec<Match>;
}

/// Matcher for a table of literal magic sequences
#[derive(Debug, Clone, Default)]
pub struct MagicScanner {
    magic: Vec<Magic>,
}

impl MagicScanner {
    /// Creates a matcher for `magic`
    pub fn new(magic: Vec<Magic>) -> Self {
        Self { magic }
    }

    /// Adds a magic sequence
    pub fn push(&mut self, magic: Magic) {
        self.magic.push(magic);
    }

    /// Number of sequences searched for
    pub fn len(&self) -> usize {
        self.magic.len()
    }

    /// Whether there is nothing to search for
    pub fn is_empty(&self) -> bool {
        self.magic.is_empty()
    }
}

impl ScanStrategy for MagicScanner {
    fn scan(&self, data: &[u8]) -> Vec<Match> {
        let mut matches = Vec::new();

        for magic in &self.magic {
            let mut position = 0;
            while position < data.len() {
                let Some(relative) = find_subsequence(&data[position..], &magic.bytes) else {
                    break;
                };
                let absolute = position + relative;
                trace!("'{}' at buffer position {}", magic.description, absolute);

                matches.push(Match {
                    position: absolute,
                    offset_adjust: magic.offset_adjust,
                    description: magic.description.clone(),
                });
                position = absolute + 1;
            }
        }

        matches.sort_by_key(|m| m.position);
        matches
    }
}

/// Find a subsequence within a byte slice
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Scans everything `reader` can see, handing each finding to `emit`.
///
/// Returns the number of findings emitted.
pub fn scan_reader<T: Read + Seek>(
    strategy: &dyn ScanStrategy,
    reader: &mut BoundedReader<T>,
    mut emit: impl FnMut(Finding),
) -> Result<usize> {
    let file = reader.file_info();
    let view_start = reader.offset();
    let mut emitted = 0;

    loop {
        let block_start = reader.tell();
        let (data, consumed) = reader.read_block()?;
        if consumed == 0 {
            break;
        }

        for hit in strategy.scan(&data) {
            // Matches starting in the look-ahead belong to the next block.
            if hit.position >= consumed {
                continue;
            }
            let Some(offset) = (block_start + hit.position as u64).checked_sub(hit.offset_adjust)
            else {
                continue;
            };
            if offset < view_start {
                continue;
            }

            emit(Finding::new(offset, hit.description).in_file(file.clone()));
            emitted += 1;
        }
    }

    debug!("Scanned {}: {} finding(s)", reader.name(), emitted);
    Ok(emitted)
}

/// Decodes `\xNN`, `\n`, `\t`, `\r`, `\0` and `\\` escapes in a raw signature
pub fn parse_escaped(raw: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        match chars.next() {
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&hex, 16).map_err(|_| {
                    Error::invalid_argument(format!("bad escape '\\x{}' in '{}'", hex, raw))
                })?;
                bytes.push(byte);
            }
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('r') => bytes.push(b'\r'),
            Some('0') => bytes.push(0),
            Some('\\') => bytes.push(b'\\'),
            Some(other) => {
                return Err(Error::invalid_argument(format!(
                    "unknown escape '\\{}' in '{}'",
                    other, raw
                )))
            }
            None => return Err(Error::invalid_argument(format!("trailing '\\' in '{}'", raw))),
        }
    }

    Ok(bytes)
}

/// Configuration for the signature module
#[derive(Debug, Clone, Default)]
pub struct SignatureConfig {
    /// Search for the built-in magic table
    pub builtin: bool,
    /// Raw byte sequences to search for
    pub raw: Vec<Vec<u8>>,
}

impl SignatureConfig {
    /// Creates a configuration that searches for nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the configuration from validated module parameters
    pub fn from_kwargs(kwargs: &Kwargs) -> Result<Self> {
        let mut config = Self::new().builtin(kwargs.flag("builtin")?);
        for raw in kwargs.list("raw")? {
            config = config.raw(parse_escaped(&raw)?);
        }
        Ok(config)
    }

    /// Enables the built-in magic table
    pub fn builtin(mut self, builtin: bool) -> Self {
        self.builtin = builtin;
        self
    }

    /// Adds a raw byte sequence
    pub fn raw(mut self, bytes: Vec<u8>) -> Self {
        self.raw.push(bytes);
        self
    }

    /// Builds the matcher described by this configuration
    pub fn scanner(&self) -> MagicScanner {
        let mut scanner = if self.builtin {
            MagicScanner::new(builtin_magic())
        } else {
            MagicScanner::default()
        };

        for bytes in &self.raw {
            let description = format!("Raw signature ({})", escape_bytes(bytes));
            scanner.push(Magic::new(bytes.clone(), description));
        }
        scanner
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| match b {
            0x20..=0x7e if *b != b'\\' => (*b as char).to_string(),
            _ => format!("\\x{:02x}", b),
        })
        .collect()
}

/// The signature scanning module
pub struct Signature {
    strategy: Box<dyn ScanStrategy>,
}

impl Signature {
    /// Creates a module scanning with `strategy`
    pub fn new(strategy: Box<dyn ScanStrategy>) -> Self {
        Self { strategy }
    }
}

impl Module for Signature {
    fn run(&mut self, ctx: &mut ModuleContext<'_>) -> Result<bool> {
        while let Some(mut reader) = ctx.next_file() {
            let path = reader.path().to_path_buf();
            let scanned = scan_reader(self.strategy.as_ref(), &mut reader, |finding| {
                ctx.result(finding);
            });

            if let Err(e) = scanned {
                warn!("Scan of {} stopped: {}", path.display(), e);
                ctx.error(format!("scan of {} failed", path.display()), e);
            }
        }
        Ok(true)
    }
}

fn build(kwargs: &Kwargs, _dependencies: &Dependencies) -> Result<Box<dyn Module>> {
    let config = SignatureConfig::from_kwargs(kwargs)?;
    let scanner = config.scanner();
    if kwargs.enabled() && scanner.is_empty() {
        return Err(Error::invalid_argument("no signatures to scan for"));
    }
    Ok(Box::new(Signature::new(Box::new(scanner))))
}

/// Registry entry for the signature module
pub fn spec() -> ModuleSpec {
    ModuleSpec::new(SIGNATURE_MODULE, build)
        .title("Signature Scan")
        .primary()
        .priority(10)
        .kwarg("builtin", OptionValue::Bool(false))
        .kwarg("raw", OptionValue::List(Vec::new()))
        .option(
            ModuleOption::flag("signature", "Scan target file(s) for common file signatures")
                .short('B')
                .sets("enabled", OptionValue::Bool(true))
                .sets("builtin", OptionValue::Bool(true)),
        )
        .option(
            ModuleOption::new(
                "raw",
                ValueKind::List,
                "Scan target file(s) for the specified sequence of bytes",
            )
            .short('R')
            .sets("enabled", OptionValue::Bool(true))
            .takes("raw"),
        )
}
