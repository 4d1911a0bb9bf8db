//! # carver-core
//!
//! A library for scanning firmware images and recursively carving out the
//! files embedded in them.
//!
//! This crate provides the core functionality for:
//! - Reading a bounded window of a file block by block, with look-ahead
//! - Scanning for known file signatures
//! - Carving matched data to disk and running external extraction tools
//! - Feeding extracted files back into the scan ("matryoshka" mode)
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`reader`]: Bounded, block-oriented file access
//! - [`finding`]: Findings, failures and result filtering
//! - [`module`]: Module registry, option aggregation and the dependency graph
//! - [`config`]: The `general` module holding scan-wide settings
//! - [`extract`]: The `extractor` module: rules, carving and commands
//! - [`scanner`]: The `signature` module
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use carver_core::{ModuleGraph, OptionValue, ParsedArgs, Registry};
//!
//! let mut args = ParsedArgs::new();
//! args.insert("files".into(), OptionValue::List(vec!["firmware.bin".into()]));
//! args.insert("signature".into(), OptionValue::Bool(true));
//! args.insert("extract".into(), OptionValue::Bool(true));
//!
//! let mut graph = ModuleGraph::new(Registry::builtin(), args)?;
//! for report in graph.execute()? {
//!     for finding in report.findings.iter().filter(|f| f.display) {
//!         println!("{:#x}  {}", finding.offset, finding.description);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! The library provides several traits for customization:
//!
//! - [`Module`]: Add analysis modules to a [`Registry`]
//! - [`Plugin`]: Observe and veto files and findings while modules run
//! - [`ScanStrategy`]: Customize the matching done by the signature module

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod error;
pub mod extract;
pub mod finding;
pub mod module;
pub mod plugin;
pub mod reader;
pub mod scanner;
pub mod status;

// Re-export primary types for convenience
pub use config::{General, GeneralConfig};
pub use error::{Error, Result};
pub use extract::{ExtractRule, Extractor, ExtractorConfig, RuleSet};
pub use finding::{Failure, FileInfo, Finding, ResultFilter, RuleMatch};
pub use module::{
    Module, ModuleContext, ModuleGraph, ModuleReport, ModuleSpec, OptionValue, ParsedArgs,
    Registry,
};
pub use plugin::Plugin;
pub use reader::{BoundedReader, ReaderOptions, Whence};
pub use scanner::{MagicScanner, ScanStrategy, SignatureConfig};
pub use status::{Progress, ScanStatus};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
