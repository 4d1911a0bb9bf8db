//! Statically registered scan hooks.
//!
//! Plugins are handed to the [`ModuleGraph`](crate::module::ModuleGraph) at
//! construction and observe every module run. All hooks have no-op defaults.

use crate::finding::Finding;
use std::path::Path;

/// Hooks invoked around each module run
pub trait Plugin {
    /// Name used in log output
    fn name(&self) -> &str;

    /// Called after a module's `init` and before its `run`
    fn pre_scan(&mut self, module: &str) {
        let _ = module;
    }

    /// Called before a target file is opened; returning `false` skips it
    fn new_file(&mut self, path: &Path) -> bool {
        let _ = path;
        true
    }

    /// Called for every finding before it is validated and dispatched
    fn result(&mut self, finding: &mut Finding) {
        let _ = finding;
    }

    /// Called after a module's `run` returns
    fn post_scan(&mut self, module: &str) {
        let _ = module;
    }
}
