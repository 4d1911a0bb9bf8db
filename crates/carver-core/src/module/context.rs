//! Per-run state handed to a module.

use super::{Dependencies, CONFIG_ATTRIBUTE};
use crate::config::{General, GeneralConfig};
use crate::error::Error;
use crate::finding::{Failure, Finding};
use crate::plugin::Plugin;
use crate::reader::BoundedReader;
use crate::status::ScanStatus;
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{debug, info, trace, warn};

/// What a running module sees of the graph.
///
/// The context owns the module's target queue and its result lists, and
/// routes every reported finding through validation, plugins and the
/// module's dependencies.
pub struct ModuleContext<'a> {
    name: &'static str,
    dependencies: &'a Dependencies,
    config: GeneralConfig,
    targets: VecDeque<PathBuf>,
    plugins: &'a mut [Box<dyn Plugin>],
    status: &'a ScanStatus,
    findings: Vec<Finding>,
    failures: Vec<Failure>,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(
        name: &'static str,
        dependencies: &'a Dependencies,
        plugins: &'a mut [Box<dyn Plugin>],
        status: &'a ScanStatus,
    ) -> Self {
        let config = dependencies
            .get::<General>(CONFIG_ATTRIBUTE)
            .map(|general| general.config().clone())
            .unwrap_or_default();
        let targets = config.files.iter().cloned().collect();

        Self {
            name,
            dependencies,
            config,
            targets,
            plugins,
            status,
            findings: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Name of the running module
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// General configuration in effect for this run
    pub fn config(&self) -> &GeneralConfig {
        &self.config
    }

    /// Dependencies bound to the running module
    pub fn dependencies(&self) -> &'a Dependencies {
        self.dependencies
    }

    /// Appends a file to the end of the target queue
    pub fn queue_target(&mut self, path: impl Into<PathBuf>) {
        self.targets.push_back(path.into());
    }

    /// Number of targets still queued
    pub fn remaining_targets(&self) -> usize {
        self.targets.len()
    }

    /// Opens the next target file.
    ///
    /// Files discovered by dependencies since the last call are appended to
    /// the queue, then every dependency is reset. Targets rejected by the
    /// file-name filters or vetoed by a plugin are skipped; targets that
    /// cannot be opened are recorded as failures.
    pub fn next_file(&mut self) -> Option<BoundedReader> {
        let pending = self.dependencies.take_pending();
        if !pending.is_empty() {
            debug!("Queueing {} file(s) discovered during extraction", pending.len());
            self.targets.extend(pending);
        }

        self.dependencies.reset_all();

        while let Some(path) = self.targets.pop_front() {
            if !self.config.file_name_filter(&path) {
                debug!("Skipping {} (filtered by name)", path.display());
                continue;
            }

            if path.is_dir() {
                warn!("Skipping {}: is a directory", path.display());
                continue;
            }

            let mut vetoed = false;
            for plugin in self.plugins.iter_mut() {
                if !plugin.new_file(&path) {
                    debug!("Plugin '{}' skipped {}", plugin.name(), path.display());
                    vetoed = true;
                    break;
                }
            }
            if vetoed {
                continue;
            }

            match self.config.open_file(&path) {
                Ok(reader) => {
                    info!("Scanning {} ({} bytes)", path.display(), reader.length());
                    self.status.begin_file(reader.length());
                    return Some(reader);
                }
                Err(e) => {
                    warn!("Could not open {}: {}", path.display(), e);
                    self.error(format!("could not open target {}", path.display()), e);
                }
            }
        }

        self.status.clear();
        None
    }

    /// Records a finding.
    ///
    /// The finding is run through the description filters and the plugins,
    /// then handed to every dependency's callback. A failing callback is
    /// recorded as a failure and does not stop the scan. Returns whether the
    /// finding was kept.
    pub fn result(&mut self, mut finding: Finding) -> bool {
        finding.module = self.name.to_string();
        self.config.filter.apply(&mut finding);

        for plugin in self.plugins.iter_mut() {
            plugin.result(&mut finding);
        }

        if finding.file.is_some() && finding.offset > 0 {
            self.status.advance(finding.offset);
        }

        let dependencies = self.dependencies;
        for (_, module, shared) in dependencies.iter() {
            let outcome = match shared.try_borrow_mut() {
                Ok(mut dependency) => dependency.callback(&finding),
                Err(_) => {
                    trace!("Dependency '{}' is busy; skipping callback", module);
                    continue;
                }
            };

            if let Err(e) = outcome {
                warn!("{} failed on '{}': {}", module, finding.description, e);
                let mut failed = finding.clone();
                failed.description = format!("{} failed on '{}'", module, finding.description);
                self.failures.push(Failure::new(failed, e));
            }
        }

        if finding.valid || self.config.show_invalid {
            trace!("{}: {}", self.name, finding);
            self.findings.push(finding);
            true
        } else {
            false
        }
    }

    /// Records a failure against the running module
    pub fn error(&mut self, description: impl Into<String>, cause: Error) {
        let mut finding = Finding::new(0, description).hidden();
        finding.module = self.name.to_string();
        self.failures.push(Failure::new(finding, cause));
    }

    /// Findings recorded so far
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Failures recorded so far
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub(crate) fn pre_scan(&mut self) {
        for plugin in self.plugins.iter_mut() {
            plugin.pre_scan(self.name);
        }
    }

    pub(crate) fn post_scan(&mut self) {
        for plugin in self.plugins.iter_mut() {
            plugin.post_scan(self.name);
        }
    }

    pub(crate) fn finish(self) -> (Vec<Finding>, Vec<Failure>) {
        (self.findings, self.failures)
    }
}
