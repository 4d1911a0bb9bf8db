//! Error types for the carver-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate,
//! with detailed error variants for different failure modes.
//!
//! Errors fall into three groups:
//!
//! - configuration errors ([`Error::is_fatal`]) abort the entire run,
//! - dependency errors abort only the module that requested the dependency,
//! - rule and command errors ([`Error::is_recoverable`]) are logged and skipped.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for carver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all carver operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O failure on a file the library was asked to touch
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Path to the file involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to create an output directory
    #[error("failed to create directory '{path}': {source}")]
    DirectoryCreate {
        /// Path to the directory that failed to create
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Path traversal attempt detected (security error)
    #[error("path traversal detected: '{path}' would escape output directory")]
    PathTraversal {
        /// The suspicious path
        path: PathBuf,
    },

    /// A module name was not present in the registry
    #[error("module '{name}' is not registered (required by '{required_by}')")]
    ModuleNotFound {
        /// Name of the missing module
        name: String,
        /// Module that asked for it
        required_by: String,
    },

    /// A dependency module reported failures while loading
    #[error("failed to load dependency '{dependency}' of module '{module}'")]
    DependencyFailed {
        /// Module that declared the dependency
        module: String,
        /// Dependency that failed
        dependency: String,
    },

    /// Dependency resolution re-entered a module already being resolved
    #[error("dependency cycle detected: {}", chain.join(" -> "))]
    DependencyCycle {
        /// Resolution chain, ending with the repeated module
        chain: Vec<String>,
    },

    /// Two modules declared the same command-line option
    #[error("option '{option}' declared by both '{first}' and '{second}'")]
    OptionConflict {
        /// The conflicting flag
        option: String,
        /// First declaring module
        first: String,
        /// Second declaring module
        second: String,
    },

    /// A kwarg was supplied that the module does not declare
    #[error("module '{module}' has no parameter named '{name}'")]
    UnknownKwarg {
        /// Module being configured
        module: String,
        /// Offending parameter name
        name: String,
    },

    /// Invalid value or usage for a module parameter
    #[error("invalid usage: {0}")]
    InvalidArgument(String),

    /// An extraction rule could not be parsed or compiled
    #[error("invalid extraction rule '{rule}': {reason}")]
    InvalidRule {
        /// Rule text or pattern
        rule: String,
        /// What went wrong
        reason: String,
    },

    /// Carving a byte range to disk failed
    #[error("failed to carve data from '{input}' to '{output}': {source}")]
    Carve {
        /// File being carved from
        input: PathBuf,
        /// Destination file
        output: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new I/O error bound to a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a new directory creation error
    pub fn directory_create(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreate {
            path: path.into(),
            source,
        }
    }

    /// Creates a new path traversal error
    pub fn path_traversal(path: impl Into<PathBuf>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    /// Creates a new missing module error
    pub fn module_not_found(name: impl Into<String>, required_by: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            name: name.into(),
            required_by: required_by.into(),
        }
    }

    /// Creates a new dependency failure error
    pub fn dependency_failed(module: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::DependencyFailed {
            module: module.into(),
            dependency: dependency.into(),
        }
    }

    /// Creates a new invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a new invalid rule error
    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new carve error
    pub fn carve(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Carve {
            input: input.into(),
            output: output.into(),
            source,
        }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true for configuration errors that must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OptionConflict { .. }
                | Self::UnknownKwarg { .. }
                | Self::InvalidArgument(_)
        )
    }

    /// Returns true if this is a recoverable error that should be skipped
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidRule { .. } | Self::PathTraversal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::path_traversal("/etc/passwd");
        assert!(err.to_string().contains("path traversal"));
        assert!(err.to_string().contains("/etc/passwd"));
    }

    #[test]
    fn test_cycle_display() {
        let err = Error::DependencyCycle {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_classification() {
        assert!(Error::invalid_rule("gzip", "missing extension").is_recoverable());
        assert!(!Error::path_traversal("/test").is_fatal());
        assert!(Error::invalid_argument("bad").is_fatal());
        assert!(!Error::module_not_found("x", "y").is_fatal());
        assert!(!Error::DependencyCycle { chain: Vec::new() }.is_fatal());
    }
}
